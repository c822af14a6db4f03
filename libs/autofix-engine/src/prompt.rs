// Prompt construction and response cleanup for the generation collaborator.
// Everything here is pure and deterministic.

use autofix_common::types::Language;

const FENCE: &str = "```";

pub const NO_ARCHITECTURE: &str = "No architecture layout provided.";

/// System prompt used by the HTTP generator for both initial and repair calls
pub const CODER_SYSTEM_PROMPT: &str = "You are the Coder agent in an autonomous code-and-test loop. \
Write complete, runnable programs in the requested language. \
Return ONLY source code, without explanations.";

pub const REPAIR_INSTRUCTION: &str = "Your previous code failed to run. \
Analyze the execution error above and rewrite the code so that it works correctly.\n\
Return ONLY the corrected code.";

/// Remove markdown fences wrapped around generated code.
///
/// A leading fence line (with its language tag) and a trailing fence line are
/// dropped, repeatedly, until the text no longer opens with a fence. Text
/// that does not open with a fence comes back unchanged, so partial or
/// malformed fencing never fails and stripping twice equals stripping once.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with(FENCE) {
        return text.to_string();
    }

    let mut lines: Vec<&str> = trimmed.lines().skip(1).collect();
    if lines
        .last()
        .is_some_and(|line| line.trim_start().starts_with(FENCE))
    {
        lines.pop();
    }
    strip_code_fences(&lines.join("\n"))
}

/// Context for the first generation call: target language, optional
/// blueprint and caller-supplied context, as delimited sections.
pub fn build_initial_context(language: Language, blueprint: Option<&str>, context: &str) -> String {
    let blueprint = blueprint
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .unwrap_or(NO_ARCHITECTURE);

    let mut out = format!(
        "--- TARGET LANGUAGE ---\n{}\n\n--- ARCHITECTURE ---\n{}\n",
        language.display_name(),
        blueprint
    );
    if !context.trim().is_empty() {
        out.push_str(&format!("\n--- ADDITIONAL CONTEXT ---\n{}\n", context.trim()));
    }
    out
}

/// Prompt asking the generator to repair `failed_code`.
///
/// The three inputs land in separate, labelled sections so the generator can
/// tell the request, the attempt and the failure apart.
pub fn build_repair_prompt(original_prompt: &str, failed_code: &str, error_text: &str) -> String {
    format!(
        "--- ORIGINAL REQUEST ---\n{}\n\n--- FAILED CODE ---\n{}\n\n--- EXECUTION ERROR ---\n{}\n\n{}\n",
        original_prompt, failed_code, error_text, REPAIR_INSTRUCTION
    )
}
