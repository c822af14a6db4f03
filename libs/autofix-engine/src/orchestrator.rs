//! Repair Loop - Generate, Execute, Classify, Repair
//!
//! **Responsibility:**
//! Drive one bounded generate → execute → repair cycle and hand back a single
//! `LoopOutcome`.
//!
//! **Architecture:**
//! 1. Ask the `CodeGenerator` for an initial candidate
//! 2. Run each candidate through the `SandboxExecutor`
//! 3. Use the classifier to pick: stop (clean), abort (transport), repair
//! 4. Feed failures back through a repair prompt
//!
//! This module is the glue layer - it knows nothing about:
//! - How code executes (sandbox client's job)
//! - How text is generated (generator's job)
//! - What counts as a clean run (classifier's job)
//!
//! Every path ends in a `LoopOutcome`; nothing here returns `Err`.
//! Calls are strictly sequential: each network call finishes before the next
//! decision is made.

use crate::classify::{classify, failure_text, Verdict};
use crate::generator::{CodeGenerator, GenerationError};
use crate::prompt::{build_initial_context, build_repair_prompt, strip_code_fences};
use crate::sandbox::SandboxExecutor;
use autofix_common::config::{StderrPolicy, DEFAULT_MAX_RETRIES};
use autofix_common::types::{
    Attempt, AttemptAction, ExecutionRequest, ExecutionResult, Language, LoopOutcome, LoopStatus,
};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Input of one loop run
#[derive(Debug, Clone)]
pub struct LoopRequest {
    pub prompt: String,
    pub context: String,
    pub language: String,
    pub max_retries: u32,
    /// Output of an earlier architecture phase, if any
    pub blueprint: Option<String>,
}

impl LoopRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: String::new(),
            language: Language::default().key().to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            blueprint: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_blueprint(mut self, blueprint: impl Into<String>) -> Self {
        self.blueprint = Some(blueprint.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Fixed identity of a run, stamped onto whichever outcome it ends with
struct RunInfo {
    run_id: Uuid,
    language: Language,
    started_at: DateTime<Utc>,
}

/// What the loop has produced so far
#[derive(Default)]
struct Progress {
    iterations: u32,
    code: String,
    output: String,
    history: Vec<Attempt>,
}

impl RunInfo {
    fn finish(&self, status: LoopStatus, progress: Progress, message: Option<String>) -> LoopOutcome {
        let outcome = LoopOutcome {
            run_id: self.run_id,
            status,
            language: self.language,
            iterations: progress.iterations,
            final_code: progress.code,
            execution_output: progress.output,
            history: progress.history,
            message,
            started_at: self.started_at,
            finished_at: Utc::now(),
        };

        info!(
            run_id = %outcome.run_id,
            status = %outcome.status,
            iterations = outcome.iterations,
            attempts = outcome.history.len(),
            elapsed_ms = (outcome.finished_at - outcome.started_at).num_milliseconds(),
            "Repair loop finished"
        );
        outcome
    }

    /// Outcome for a run that ended before anything was executed
    fn error(&self, message: String) -> LoopOutcome {
        self.finish(LoopStatus::Error, Progress::default(), Some(message))
    }
}

pub struct CodeFixOrchestrator<'a> {
    generator: &'a dyn CodeGenerator,
    sandbox: &'a dyn SandboxExecutor,
    stderr_policy: StderrPolicy,
}

impl<'a> CodeFixOrchestrator<'a> {
    pub fn new(generator: &'a dyn CodeGenerator, sandbox: &'a dyn SandboxExecutor) -> Self {
        Self {
            generator,
            sandbox,
            stderr_policy: StderrPolicy::default(),
        }
    }

    pub fn with_stderr_policy(mut self, policy: StderrPolicy) -> Self {
        self.stderr_policy = policy;
        self
    }

    /// Run the loop to completion
    pub async fn autonomous_loop(&self, request: &LoopRequest) -> LoopOutcome {
        self.autonomous_loop_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Run the loop, checking `cancel` before every execution. A cancelled
    /// run keeps the attempts recorded so far.
    #[tracing::instrument(
        skip_all,
        fields(run_id = tracing::field::Empty, language = %request.language, max_retries = request.max_retries)
    )]
    pub async fn autonomous_loop_with_cancel(
        &self,
        request: &LoopRequest,
        cancel: &CancellationToken,
    ) -> LoopOutcome {
        let runtime = self.sandbox.registry().resolve(&request.language);
        let run = RunInfo {
            run_id: Uuid::new_v4(),
            language: runtime.language,
            started_at: Utc::now(),
        };
        tracing::Span::current().record("run_id", tracing::field::display(run.run_id));

        let max_retries = request.max_retries;
        if max_retries == 0 {
            return run.error("max_retries must be at least 1".to_string());
        }
        if request.prompt.trim().is_empty() {
            return run.error("Initial generation failed: prompt is empty".to_string());
        }

        let context = build_initial_context(run.language, request.blueprint.as_deref(), &request.context);

        info!(run_id = %run.run_id, "Generating initial candidate");
        let code = match self.generate_candidate(&request.prompt, &context).await {
            Ok(code) => code,
            Err(e) => {
                warn!(run_id = %run.run_id, error = %e, "Initial generation failed");
                return run.error(format!("Initial generation failed: {}", e));
            }
        };
        let mut progress = Progress {
            code,
            ..Progress::default()
        };

        for attempt in 1..=max_retries {
            if cancel.is_cancelled() {
                warn!(run_id = %run.run_id, completed = progress.iterations, "Repair loop cancelled");
                let message = format!("Cancelled after {} attempts.", progress.iterations);
                return run.finish(LoopStatus::Cancelled, progress, Some(message));
            }

            info!(run_id = %run.run_id, attempt, max_retries, "Executing candidate");
            let execution = ExecutionRequest {
                runtime: runtime.clone(),
                source: progress.code.clone(),
                stdin: String::new(),
                timeout: self.sandbox.default_timeout(),
            };
            let result = self.sandbox.execute_request(&execution).await;
            progress.iterations = attempt;

            match classify(&result, self.stderr_policy) {
                Verdict::TransportFailure => {
                    let summary = transport_summary(&result);
                    warn!(run_id = %run.run_id, attempt, error = %summary, "Sandbox unreachable, aborting");
                    let message = format!("Sandbox execution failed on attempt {}: {}", attempt, summary);
                    progress.history.push(Attempt {
                        index: attempt,
                        action: AttemptAction::ExecutionApiFailed,
                        result: summary,
                    });
                    return run.finish(LoopStatus::Failed, progress, Some(message));
                }
                Verdict::Clean => {
                    info!(run_id = %run.run_id, attempt, "Candidate ran cleanly");
                    progress.history.push(Attempt {
                        index: attempt,
                        action: AttemptAction::GeneratedSuccess,
                        result: result.stdout.clone(),
                    });
                    progress.output = result.stdout;
                    return run.finish(LoopStatus::Success, progress, None);
                }
                Verdict::ProgramFailure { exit_code } => {
                    let error_text = failure_text(&result);
                    progress.output = result.stdout;
                    info!(
                        run_id = %run.run_id,
                        attempt,
                        exit_code,
                        error_preview = error_text.lines().next().unwrap_or(""),
                        "Candidate failed"
                    );
                    progress.history.push(Attempt {
                        index: attempt,
                        action: AttemptAction::FailedWithExitCode(exit_code),
                        result: error_text.clone(),
                    });

                    // No budget left to run a repaired candidate
                    if attempt == max_retries {
                        break;
                    }

                    let repair_prompt = build_repair_prompt(&request.prompt, &progress.code, &error_text);
                    match self.generate_candidate(&repair_prompt, &context).await {
                        Ok(code) => progress.code = code,
                        Err(e) => {
                            warn!(run_id = %run.run_id, attempt, error = %e, "Repair generation failed");
                            progress.history.push(Attempt {
                                index: attempt,
                                action: AttemptAction::ModelErrorOnFix,
                                result: e.to_string(),
                            });
                            let message =
                                format!("Code generation failed while repairing attempt {}: {}", attempt, e);
                            return run.finish(LoopStatus::Failed, progress, Some(message));
                        }
                    }
                }
            }
        }

        let message = format!("Failed to produce working code after {} attempts.", max_retries);
        run.finish(LoopStatus::Failed, progress, Some(message))
    }

    /// One generator call, fence-stripped. Blank code counts as a failure.
    async fn generate_candidate(&self, prompt: &str, context: &str) -> Result<String, GenerationError> {
        let raw = self.generator.generate(prompt, context).await?;
        let code = strip_code_fences(&raw);
        if code.trim().is_empty() {
            return Err(GenerationError::Empty);
        }
        debug!(code_bytes = code.len(), "Candidate ready");
        Ok(code)
    }
}

fn transport_summary(result: &ExecutionResult) -> String {
    [result.stdout.trim(), result.stderr.trim()]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
}
