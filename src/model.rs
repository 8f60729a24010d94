use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

/// Resolved settings for invoking the external conversion tool.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub program: PathBuf,
    pub script: Option<PathBuf>,
    pub working_dir: Option<PathBuf>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("python"),
            script: Some(PathBuf::from("ido_tool.py")),
            working_dir: None,
        }
    }
}

impl ToolConfig {
    /// Build the concrete invocation for one request: `program [script] <op> <in> <out>`.
    pub fn command_for(&self, request: &RunRequest) -> ToolCommand {
        let mut args: Vec<OsString> = Vec::with_capacity(4);
        if let Some(script) = &self.script {
            args.push(script.clone().into_os_string());
        }
        args.push(request.operation.as_str().into());
        args.push(request.input.clone().into());
        args.push(request.output.clone().into());
        ToolCommand {
            program: self.program.clone(),
            args,
            working_dir: self.working_dir.clone(),
        }
    }
}

/// A fully-resolved external process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Decompile,
    Compile,
}

impl Operation {
    pub const ALL: [Operation; 2] = [Operation::Decompile, Operation::Compile];

    /// Argument passed to the external tool.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Decompile => "decompile",
            Operation::Compile => "compile",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "decompile" => Some(Operation::Decompile),
            "compile" => Some(Operation::Compile),
            _ => None,
        }
    }

    /// Human label used in banners ("Decompilation", "Compilation").
    pub fn noun(self) -> &'static str {
        match self {
            Operation::Decompile => "Decompilation",
            Operation::Compile => "Compilation",
        }
    }

    fn output_extension(self) -> &'static str {
        match self {
            Operation::Decompile => "xml",
            Operation::Compile => "ido",
        }
    }

    /// Output path suggested right after an input is picked.
    ///
    /// Files keep their directory and stem with the target extension. A compile
    /// input folder gets `output.ido` inside it.
    pub fn suggest_output(self, input: &Path, kind: InputKind) -> PathBuf {
        match kind {
            InputKind::Folder => input.join(format!("output.{}", self.output_extension())),
            InputKind::File => input.with_extension(self.output_extension()),
        }
    }

    /// File name proposed by the save destination picker.
    pub fn default_output_name(self, input: Option<&Path>) -> String {
        let stem = input
            .and_then(|p| p.file_stem())
            .map(|s| s.to_string_lossy().into_owned())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "output".to_string());
        format!("{stem}.{}", self.output_extension())
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a selected input is a single file or a folder of sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    File,
    Folder,
}

/// Snapshot of one user-initiated invocation. Paths are passed through untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub operation: Operation,
    pub input: String,
    pub output: String,
}

/// Log severity. The tool may send levels outside the known set; those are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
    Other(String),
}

impl LogLevel {
    pub fn as_str(&self) -> &str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Success => "SUCCESS",
            LogLevel::Other(s) => s,
        }
    }
}

impl From<String> for LogLevel {
    fn from(s: String) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => LogLevel::Info,
            "WARNING" | "WARN" => LogLevel::Warning,
            "ERROR" => LogLevel::Error,
            "SUCCESS" => LogLevel::Success,
            _ => LogLevel::Other(s),
        }
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_str().to_string()
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Info
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default)]
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Success, message)
    }
}

/// Final payload reported by the tool on its `RESULT:` line.
///
/// Only `success` is interpreted; everything else is optional and unknown keys are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ResultPayload {
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// Terminal result of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub success: bool,
    pub payload: Option<ResultPayload>,
    pub exit_code: i32,
    pub logs: Vec<LogEntry>,
}

impl RunOutcome {
    pub fn error(&self) -> Option<&str> {
        self.payload.as_ref().and_then(|p| p.error.as_deref())
    }

    pub fn output(&self) -> Option<&str> {
        self.payload.as_ref().and_then(|p| p.output.as_deref())
    }

    /// Flatten into the shape delivered on the result channel.
    pub fn to_response(&self) -> RunResponse {
        let payload = self.payload.clone().unwrap_or_default();
        RunResponse {
            success: self.success,
            output: payload.output,
            meta: payload.meta,
            size: payload.size,
            error: payload.error,
            extra: payload.extra,
            exit_code: self.exit_code,
            logs: self.logs.clone(),
        }
    }
}

/// `{success, output?, meta?, size?, error?, exitCode, logs}` as printed by `--json`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
    pub exit_code: i32,
    pub logs: Vec<LogEntry>,
}
