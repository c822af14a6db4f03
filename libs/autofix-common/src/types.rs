use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Languages the sandbox knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Python,
    JavaScript,
    TypeScript,
    Go,
    Rust,
    Bash,
}

impl Language {
    pub const ALL: [Language; 6] = [
        Language::Python,
        Language::JavaScript,
        Language::TypeScript,
        Language::Go,
        Language::Rust,
        Language::Bash,
    ];

    /// Match a friendly name, canonical key or alias, ignoring case
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "python" | "python3" | "py" => Some(Language::Python),
            "javascript" | "js" | "node" | "nodejs" => Some(Language::JavaScript),
            "typescript" | "ts" => Some(Language::TypeScript),
            "go" | "golang" => Some(Language::Go),
            "rust" | "rs" => Some(Language::Rust),
            "bash" | "sh" | "shell" => Some(Language::Bash),
            _ => None,
        }
    }

    /// Same as `from_name`, falling back to the default language
    pub fn resolve(name: &str) -> Self {
        Self::from_name(name).unwrap_or_default()
    }

    pub fn key(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Go => "go",
            Language::Rust => "rust",
            Language::Bash => "bash",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Language::Python => "Python",
            Language::JavaScript => "JavaScript",
            Language::TypeScript => "TypeScript",
            Language::Go => "Go",
            Language::Rust => "Rust",
            Language::Bash => "Bash",
        }
    }

    /// Built-in (runtime id, version) pair understood by the sandbox
    pub fn default_runtime(&self) -> (&'static str, &'static str) {
        match self {
            Language::Python => ("python", "3.10"),
            Language::JavaScript => ("javascript", "18.15.0"),
            Language::TypeScript => ("typescript", "5.0.3"),
            Language::Go => ("go", "1.16.2"),
            Language::Rust => ("rust", "1.50.0"),
            Language::Bash => ("bash", "5.2.0"),
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            Language::Python => "py",
            Language::JavaScript => "js",
            Language::TypeScript => "ts",
            Language::Go => "go",
            Language::Rust => "rs",
            Language::Bash => "sh",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A language resolved to the concrete runtime the sandbox will use
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runtime {
    pub language: Language,
    pub runtime: String,
    pub version: String,
    pub file_extension: String,
}

impl Runtime {
    pub fn builtin(language: Language) -> Self {
        let (runtime, version) = language.default_runtime();
        Self {
            language,
            runtime: runtime.to_string(),
            version: version.to_string(),
            file_extension: language.file_extension().to_string(),
        }
    }

    /// Name of the single file submitted to the sandbox
    pub fn file_name(&self) -> String {
        format!("main.{}", self.file_extension)
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub runtime: Runtime,
    pub source: String,
    pub stdin: String,
    pub timeout: Duration,
}

/// Normalized sandbox reply.
///
/// `transport_ok == false` means the call itself failed and the remaining
/// fields describe that failure, not program output. Always check it before
/// looking at `exit_code`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub transport_ok: bool,
}

impl ExecutionResult {
    pub fn completed(stdout: impl Into<String>, stderr: impl Into<String>, exit_code: i64) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code,
            transport_ok: true,
        }
    }

    pub fn transport_failure(stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: -1,
            transport_ok: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptAction {
    GeneratedSuccess,
    ExecutionApiFailed,
    FailedWithExitCode(i64),
    ModelErrorOnFix,
}

impl fmt::Display for AttemptAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptAction::GeneratedSuccess => f.write_str("Success"),
            AttemptAction::ExecutionApiFailed => f.write_str("Execution API Failed"),
            AttemptAction::FailedWithExitCode(code) => write!(f, "Failed with Exit Code {}", code),
            AttemptAction::ModelErrorOnFix => f.write_str("Model Error on Fix"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub index: u32,
    pub action: AttemptAction,
    pub result: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    Success,
    Failed,
    Error,
    Cancelled,
}

impl fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoopStatus::Success => "success",
            LoopStatus::Failed => "failed",
            LoopStatus::Error => "error",
            LoopStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Terminal result of one repair loop run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopOutcome {
    pub run_id: Uuid,
    pub status: LoopStatus,
    pub language: Language,
    pub iterations: u32,
    pub final_code: String,
    pub execution_output: String,
    pub history: Vec<Attempt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl LoopOutcome {
    pub fn is_success(&self) -> bool {
        self.status == LoopStatus::Success
    }
}
