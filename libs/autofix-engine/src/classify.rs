//! Run Classifier - Verdicts for Sandbox Results
//!
//! **Core Responsibility:**
//! Decide what a sandbox result means for the repair loop.
//!
//! **Critical Properties:**
//! - Knows nothing about HTTP
//! - Knows nothing about the generation collaborator
//! - Pure functions: (result, policy) → verdict
//!
//! **Classification Rules:**
//! - `transport_ok == false` → TransportFailure (abort, repairing cannot help)
//! - exit code 0 and stderr acceptable under the policy → Clean
//! - anything else → ProgramFailure (consumes a retry, triggers a repair)

use autofix_common::config::StderrPolicy;
use autofix_common::types::ExecutionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Clean,
    ProgramFailure { exit_code: i64 },
    TransportFailure,
}

/// Success predicate on raw run fields.
///
/// An absent exit code is treated as 0, matching how the sandbox client
/// defaults a missing code.
pub fn is_clean_run(exit_code: Option<i64>, stderr: &str, policy: StderrPolicy) -> bool {
    if exit_code.unwrap_or(0) != 0 {
        return false;
    }
    match policy {
        StderrPolicy::Strict => stderr.is_empty(),
        StderrPolicy::Whitespace => stderr.trim().is_empty(),
        StderrPolicy::Lenient => true,
    }
}

pub fn classify(result: &ExecutionResult, policy: StderrPolicy) -> Verdict {
    if !result.transport_ok {
        Verdict::TransportFailure
    } else if is_clean_run(Some(result.exit_code), &result.stderr, policy) {
        Verdict::Clean
    } else {
        Verdict::ProgramFailure {
            exit_code: result.exit_code,
        }
    }
}

/// Text handed back to the generator after a failed run: stderr if there is
/// any, otherwise stdout, otherwise a synthesized note so the repair prompt
/// never carries an empty error section.
pub fn failure_text(result: &ExecutionResult) -> String {
    if !result.stderr.is_empty() {
        result.stderr.clone()
    } else if !result.stdout.is_empty() {
        result.stdout.clone()
    } else {
        format!(
            "Process exited with code {} and produced no output.",
            result.exit_code
        )
    }
}
