//! Sandbox Client - Remote Code Execution
//!
//! **Core Responsibility:**
//! Submit one source file (plus stdin) to a Piston-compatible execution
//! service and normalize the reply into an `ExecutionResult`.
//!
//! **Critical Architectural Boundary:**
//! - Client knows HOW to reach the sandbox (HTTP, timeouts, retries)
//! - Client does NOT judge whether a run succeeded
//! - A failing program is a normal result (`transport_ok = true`)
//! - Only a failing *call* produces `transport_ok = false`
//!
//! Nothing in here returns `Err`: every failure of the call itself is
//! folded into a transport-failure result.

use async_trait::async_trait;
use autofix_common::config::SandboxConfig;
use autofix_common::languages::LanguageRegistry;
use autofix_common::types::{ExecutionRequest, ExecutionResult};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Requests larger than this never leave the process
pub const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
pub const MAX_STDIN_BYTES: usize = 10 * 1024 * 1024; // 10MB

/// Anything that can run an `ExecutionRequest`
#[async_trait]
pub trait SandboxExecutor: Send + Sync {
    async fn execute_request(&self, request: &ExecutionRequest) -> ExecutionResult;

    /// Language lookup used to build requests
    fn registry(&self) -> &LanguageRegistry;

    /// Timeout applied to requests built by callers
    fn default_timeout(&self) -> Duration;
}

#[derive(Debug, Serialize)]
struct PistonFile<'a> {
    name: String,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct PistonRequest<'a> {
    language: &'a str,
    version: &'a str,
    files: Vec<PistonFile<'a>>,
    stdin: &'a str,
}

#[derive(Debug, Deserialize)]
struct PistonStage {
    stdout: Option<String>,
    stderr: Option<String>,
    code: Option<i64>,
    signal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PistonResponse {
    run: Option<PistonStage>,
    compile: Option<PistonStage>,
}

#[derive(Debug, Deserialize)]
struct PistonErrorBody {
    message: Option<String>,
}

/// HTTP client for a Piston-style execution API.
///
/// Construct once and share by reference; it holds a pooled `reqwest::Client`
/// and the read-only language table.
pub struct SandboxExecutionClient {
    http: reqwest::Client,
    url: String,
    timeout: Duration,
    transport_retries: u32,
    retry_backoff: Duration,
    registry: Arc<LanguageRegistry>,
}

impl SandboxExecutionClient {
    pub fn new(config: &SandboxConfig, registry: Arc<LanguageRegistry>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            http,
            url: config.url.clone(),
            timeout: config.timeout,
            transport_retries: config.transport_retries,
            retry_backoff: config.retry_backoff,
            registry,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build a request for a friendly language name. Unknown names fall back
    /// to the default runtime.
    pub fn request(&self, language: &str, code: &str, stdin: &str) -> ExecutionRequest {
        ExecutionRequest {
            runtime: self.registry.resolve(language),
            source: code.to_string(),
            stdin: stdin.to_string(),
            timeout: self.timeout,
        }
    }

    /// Run `code` in the sandbox
    pub async fn execute(&self, language: &str, code: &str, stdin: &str) -> ExecutionResult {
        let request = self.request(language, code, stdin);
        self.execute_request(&request).await
    }

    async fn send(&self, request: &ExecutionRequest) -> ExecutionResult {
        let payload = PistonRequest {
            language: &request.runtime.runtime,
            version: &request.runtime.version,
            files: vec![PistonFile {
                name: request.runtime.file_name(),
                content: &request.source,
            }],
            stdin: &request.stdin,
        };

        let mut retries_used = 0;
        loop {
            let sent = self
                .http
                .post(&self.url)
                .timeout(request.timeout)
                .json(&payload)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) => return transport_error(&e, request.timeout),
            };

            let status = response.status();
            if status.is_success() {
                let body = match response.bytes().await {
                    Ok(body) => body,
                    Err(e) => return transport_error(&e, request.timeout),
                };
                return match serde_json::from_slice::<PistonResponse>(&body) {
                    Ok(parsed) => normalize(parsed),
                    Err(e) => ExecutionResult::transport_failure(
                        String::new(),
                        format!("Sandbox API error: malformed response: {}", e),
                    ),
                };
            }

            let body = response.text().await.unwrap_or_default();
            if is_retryable(status) && retries_used < self.transport_retries {
                retries_used += 1;
                warn!(
                    status = %status,
                    retry = retries_used,
                    backoff_ms = self.retry_backoff.as_millis() as u64,
                    "Sandbox busy, retrying"
                );
                tokio::time::sleep(self.retry_backoff).await;
                continue;
            }

            let detail = serde_json::from_str::<PistonErrorBody>(&body)
                .ok()
                .and_then(|b| b.message)
                .unwrap_or(body);
            return ExecutionResult::transport_failure(
                String::new(),
                format!("Sandbox API error: HTTP {}: {}", status, detail.trim()),
            );
        }
    }
}

#[async_trait]
impl SandboxExecutor for SandboxExecutionClient {
    #[tracing::instrument(
        skip(self, request),
        fields(
            language = %request.runtime.language,
            version = %request.runtime.version,
            source_bytes = request.source.len()
        )
    )]
    async fn execute_request(&self, request: &ExecutionRequest) -> ExecutionResult {
        // GUARDRAIL: oversized payloads are rejected before any network call
        if request.source.len() > MAX_SOURCE_CODE_BYTES {
            return ExecutionResult::transport_failure(
                String::new(),
                format!("Sandbox API error: source exceeds maximum size of {} bytes", MAX_SOURCE_CODE_BYTES),
            );
        }
        if request.stdin.len() > MAX_STDIN_BYTES {
            return ExecutionResult::transport_failure(
                String::new(),
                format!("Sandbox API error: stdin exceeds maximum size of {} bytes", MAX_STDIN_BYTES),
            );
        }

        debug!(url = %self.url, "Submitting code to sandbox");
        let start = Instant::now();
        let result = self.send(request).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        if result.transport_ok {
            info!(
                exit_code = result.exit_code,
                stdout_bytes = result.stdout.len(),
                stderr_bytes = result.stderr.len(),
                elapsed_ms,
                "Sandbox run finished"
            );
        } else {
            warn!(error = %result.stderr, elapsed_ms, "Sandbox call failed");
        }

        result
    }

    fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    fn default_timeout(&self) -> Duration {
        self.timeout
    }
}

fn is_retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
}

fn transport_error(error: &reqwest::Error, timeout: Duration) -> ExecutionResult {
    if error.is_timeout() {
        ExecutionResult::transport_failure(
            "Execution timed out.",
            format!("API timeout after {}.", describe_duration(timeout)),
        )
    } else {
        ExecutionResult::transport_failure(String::new(), format!("Sandbox API error: {}", error))
    }
}

fn describe_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 {
        format!("{} seconds", duration.as_secs())
    } else {
        format!("{} ms", duration.as_millis())
    }
}

/// Map the typed Piston reply onto the four-field result.
///
/// A failed or killed compile stage wins over the run stage, since compiled
/// languages never reach `run` when compilation fails. A reply with neither
/// stage is malformed.
fn normalize(response: PistonResponse) -> ExecutionResult {
    match (response.compile, response.run) {
        (Some(compile), _) if compile.failed() => stage_result(compile),
        (_, Some(run)) => stage_result(run),
        (Some(compile), None) => stage_result(compile),
        (None, None) => ExecutionResult::transport_failure(
            String::new(),
            "Sandbox API error: malformed response: missing run and compile stages",
        ),
    }
}

impl PistonStage {
    fn failed(&self) -> bool {
        match self.code {
            Some(code) => code != 0,
            None => self.signal.is_some(),
        }
    }
}

fn stage_result(stage: PistonStage) -> ExecutionResult {
    let stdout = stage.stdout.unwrap_or_default();
    let mut stderr = stage.stderr.unwrap_or_default();

    let exit_code = match (stage.code, stage.signal) {
        (Some(code), _) => code,
        (None, Some(signal)) => {
            // A killed process has no exit code; never report it as 0
            if !stderr.is_empty() && !stderr.ends_with('\n') {
                stderr.push('\n');
            }
            stderr.push_str(&format!("[terminated by signal {}]", signal));
            1
        }
        (None, None) => 0,
    };

    ExecutionResult::completed(stdout, stderr, exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autofix_common::types::Language;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, timeout: Duration) -> SandboxExecutionClient {
        let config = SandboxConfig {
            url: format!("{}/api/v2/execute", server.uri()),
            timeout,
            transport_retries: 1,
            retry_backoff: Duration::from_millis(10),
        };
        SandboxExecutionClient::new(&config, Arc::new(LanguageRegistry::builtin())).unwrap()
    }

    fn run_body(stdout: &str, stderr: &str, code: Option<i64>) -> serde_json::Value {
        json!({
            "language": "python",
            "version": "3.10.0",
            "run": { "stdout": stdout, "stderr": stderr, "code": code, "signal": null, "output": "" }
        })
    }

    #[tokio::test]
    async fn test_successful_run_is_reported_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v2/execute"))
            .and(body_partial_json(json!({
                "language": "python",
                "version": "3.10",
                "files": [{ "name": "main.py", "content": "print('hi')" }],
                "stdin": ""
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(run_body("hi\n", "", Some(0))))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let result = client.execute("Python", "print('hi')", "").await;

        assert!(result.transport_ok);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.stderr, "");
    }

    #[tokio::test]
    async fn test_program_failure_keeps_transport_ok() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(run_body(
                "",
                "ZeroDivisionError: division by zero\n",
                Some(1),
            )))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let result = client.execute("python", "print(1/0)", "").await;

        assert!(result.transport_ok);
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("ZeroDivisionError"));
    }

    #[tokio::test]
    async fn test_missing_exit_code_defaults_to_zero() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "run": { "stdout": "ok" } })))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let result = client.execute("python", "print('ok')", "").await;

        assert!(result.transport_ok);
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "ok");
        assert_eq!(result.stderr, "");
    }

    #[tokio::test]
    async fn test_signal_without_code_is_not_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "run": { "stdout": "", "stderr": "", "code": null, "signal": "SIGKILL" }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let result = client.execute("python", "while True: pass", "").await;

        assert!(result.transport_ok);
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stderr, "[terminated by signal SIGKILL]");
    }

    #[tokio::test]
    async fn test_compile_failure_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "language": "rust", "files": [{ "name": "main.rs" }] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "compile": { "stdout": "", "stderr": "error[E0425]: cannot find value `x`", "code": 1 }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let result = client.execute("Rust", "fn main() { x }", "").await;

        assert!(result.transport_ok);
        assert_eq!(result.exit_code, 1);
        assert!(result.stderr.contains("E0425"));
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "stdin": "5\n" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(run_body("10\n", "", Some(0))))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let result = client.execute("python", "print(int(input()) * 2)", "5\n").await;
        assert_eq!(result.stdout, "10\n");
    }

    #[tokio::test]
    async fn test_unknown_language_falls_back_to_default_runtime() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "language": "python", "version": "3.10" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(run_body("", "", Some(0))))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let request = client.request("klingon", "print()", "");
        assert_eq!(request.runtime.language, Language::Python);

        let result = client.execute_request(&request).await;
        assert!(result.transport_ok);
    }

    #[tokio::test]
    async fn test_timeout_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(run_body("late", "", Some(0)))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_millis(100));
        let result = client.execute("python", "print('late')", "").await;

        assert!(!result.transport_ok);
        assert_eq!(result.exit_code, -1);
        assert_eq!(result.stdout, "Execution timed out.");
        assert_eq!(result.stderr, "API timeout after 100 ms.");
    }

    #[tokio::test]
    async fn test_server_error_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "message": "runtime is unknown"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let result = client.execute("python", "print()", "").await;

        assert!(!result.transport_ok);
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.starts_with("Sandbox API error: HTTP 400"));
        assert!(result.stderr.contains("runtime is unknown"));
    }

    #[tokio::test]
    async fn test_rate_limit_is_retried_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(run_body("ok", "", Some(0))))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let result = client.execute("python", "print('ok')", "").await;

        assert!(result.transport_ok);
        assert_eq!(result.stdout, "ok");
    }

    #[tokio::test]
    async fn test_rate_limit_gives_up_after_retry_budget() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let result = client.execute("python", "print('ok')", "").await;

        assert!(!result.transport_ok);
        assert!(result.stderr.contains("429"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let result = client.execute("python", "print()", "").await;

        assert!(!result.transport_ok);
        assert!(result.stderr.contains("malformed response"));
    }

    #[tokio::test]
    async fn test_killed_compile_stage_is_program_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "language": "rust",
                "compile": { "stdout": "", "stderr": "", "code": null, "signal": "SIGKILL" }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let result = client.execute("rust", "fn main() { loop {} }", "").await;

        assert!(result.transport_ok);
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.stderr, "[terminated by signal SIGKILL]");
    }

    #[tokio::test]
    async fn test_clean_compile_without_run_stage_is_completed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "compile": { "stdout": "", "stderr": "", "code": 0 }
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let result = client.execute("go", "package main\nfunc main() {}", "").await;

        assert!(result.transport_ok);
        assert_eq!(result.exit_code, 0);
    }

    #[tokio::test]
    async fn test_body_without_run_stage_is_transport_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "language": "python" })))
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let result = client.execute("python", "print()", "").await;

        assert!(!result.transport_ok);
        assert!(result.stderr.contains("missing run and compile stages"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_failure() {
        let config = SandboxConfig {
            url: "http://127.0.0.1:1/api/v2/execute".to_string(),
            timeout: Duration::from_secs(2),
            transport_retries: 0,
            retry_backoff: Duration::from_millis(10),
        };
        let client = SandboxExecutionClient::new(&config, Arc::new(LanguageRegistry::builtin())).unwrap();
        let result = client.execute("python", "print()", "").await;

        assert!(!result.transport_ok);
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.starts_with("Sandbox API error:"));
    }

    #[tokio::test]
    async fn test_oversized_source_never_reaches_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = client_for(&server, Duration::from_secs(5));
        let source = "#".repeat(MAX_SOURCE_CODE_BYTES + 1);
        let result = client.execute("python", &source, "").await;

        assert!(!result.transport_ok);
        assert!(result.stderr.contains("maximum size"));
    }

    #[test]
    fn test_client_builds_from_config() {
        let client = SandboxExecutionClient::new(&SandboxConfig::default(), Arc::new(LanguageRegistry::builtin()));
        let client = client.unwrap();
        assert_eq!(client.url(), SandboxConfig::default().url);
        assert_eq!(client.default_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_describe_duration() {
        assert_eq!(describe_duration(Duration::from_secs(30)), "30 seconds");
        assert_eq!(describe_duration(Duration::from_millis(1500)), "1500 ms");
    }
}
