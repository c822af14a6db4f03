// CLI commands for the autofix loop and the sandbox client
use anyhow::{bail, Context, Result};
use autofix_common::config::AutofixConfig;
use autofix_common::languages::LanguageRegistry;
use autofix_common::types::{ExecutionRequest, LoopOutcome, Runtime};
use autofix_engine::{
    ChatCompletionsGenerator, CodeFixOrchestrator, LoopRequest, SandboxExecutionClient, SandboxExecutor,
};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Load configuration and the language table the way every command does
fn load_environment() -> Result<(AutofixConfig, LanguageRegistry)> {
    let config = AutofixConfig::from_env().context("Invalid configuration")?;
    let registry = LanguageRegistry::load(&config.languages_config)
        .with_context(|| format!("Failed to load {}", config.languages_config.display()))?;
    Ok((config, registry))
}

fn read_optional(path: Option<&Path>) -> Result<Option<String>> {
    path.map(|p| fs::read_to_string(p).with_context(|| format!("Failed to read {}", p.display())))
        .transpose()
}

/// Run the repair loop. Returns whether it ended in success.
pub async fn run_autofix(
    prompt: &str,
    language: &str,
    max_retries: Option<u32>,
    context_file: Option<&Path>,
    blueprint_file: Option<&Path>,
    json: bool,
) -> Result<bool> {
    if prompt.trim().is_empty() {
        bail!("Prompt cannot be empty");
    }

    let (config, registry) = load_environment()?;
    let sandbox = SandboxExecutionClient::new(&config.sandbox, Arc::new(registry))
        .context("Failed to build sandbox client")?;
    let generator =
        ChatCompletionsGenerator::new(&config.generator).context("Failed to build generator client")?;

    let mut request = LoopRequest::new(prompt)
        .with_language(language)
        .with_max_retries(max_retries.unwrap_or(config.max_retries));
    if let Some(context) = read_optional(context_file)? {
        request = request.with_context(context);
    }
    if let Some(blueprint) = read_optional(blueprint_file)? {
        request = request.with_blueprint(blueprint);
    }

    if !json {
        println!("🚀 Starting autofix loop ({} attempt(s), {})", request.max_retries, language);
        println!("   Generator: {} ({})", generator.endpoint(), config.generator.model);
        println!("   Sandbox:   {}", sandbox.url());
    }

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n⚠️  Interrupt received, stopping before the next attempt...");
                cancel.cancel();
            }
        })
    };

    let orchestrator =
        CodeFixOrchestrator::new(&generator, &sandbox).with_stderr_policy(config.stderr_policy);
    let outcome = orchestrator.autonomous_loop_with_cancel(&request, &cancel).await;
    watcher.abort();

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("Failed to serialize outcome")?
        );
    } else {
        print_outcome(&outcome);
    }

    Ok(outcome.is_success())
}

fn print_outcome(outcome: &LoopOutcome) {
    println!("\n📋 Attempt history:");
    for attempt in &outcome.history {
        let first_line = attempt.result.lines().next().unwrap_or("");
        println!("  #{:<3} {:<28} {}", attempt.index, attempt.action.to_string(), first_line);
    }

    println!("\n📝 Final code ({}):", outcome.language.display_name());
    println!("{}", "─".repeat(60));
    println!("{}", outcome.final_code);
    println!("{}", "─".repeat(60));

    if !outcome.execution_output.is_empty() {
        println!("\n📤 Output:\n{}", outcome.execution_output.trim_end());
    }

    if outcome.is_success() {
        println!("\n✅ Working code after {} execution(s)", outcome.iterations);
    } else {
        println!("\n❌ {} after {} execution(s)", outcome.status, outcome.iterations);
        if let Some(message) = &outcome.message {
            println!("   {}", message);
        }
    }
}

/// Pick a runtime by matching the file extension against the registry
fn runtime_for_path(registry: &LanguageRegistry, path: &Path) -> Option<Runtime> {
    let ext = path.extension()?.to_str()?;
    registry
        .list()
        .into_iter()
        .find(|runtime| runtime.file_extension.eq_ignore_ascii_case(ext))
}

/// Run one file in the sandbox. Returns whether it exited cleanly.
pub async fn exec_file(file: &Path, language: Option<&str>, stdin_file: Option<&Path>) -> Result<bool> {
    let source = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let stdin = read_optional(stdin_file)?.unwrap_or_default();

    let (config, registry) = load_environment()?;
    let runtime = match language {
        Some(name) => registry.resolve(name),
        None => match runtime_for_path(&registry, file) {
            Some(runtime) => runtime,
            None => bail!(
                "Cannot infer language from {}; pass --language",
                file.display()
            ),
        },
    };

    let sandbox = SandboxExecutionClient::new(&config.sandbox, Arc::new(registry))
        .context("Failed to build sandbox client")?;
    println!("🐳 Running {} as {} {}...", file.display(), runtime.runtime, runtime.version);

    let request = ExecutionRequest {
        runtime,
        source,
        stdin,
        timeout: sandbox.default_timeout(),
    };
    let result = sandbox.execute_request(&request).await;

    if !result.stdout.is_empty() {
        println!("\n📤 stdout:\n{}", result.stdout.trim_end());
    }
    if !result.stderr.is_empty() {
        println!("\n📥 stderr:\n{}", result.stderr.trim_end());
    }

    if !result.transport_ok {
        println!("\n❌ Sandbox call failed");
        return Ok(false);
    }
    println!("\n{} Exit code: {}", if result.exit_code == 0 { "✅" } else { "❌" }, result.exit_code);
    Ok(result.exit_code == 0)
}

/// Print the runtime table
pub fn list_languages() -> Result<()> {
    let (config, registry) = load_environment()?;
    let runtimes = registry.list();

    println!("📋 Sandbox runtimes ({}):\n", config.languages_config.display());
    println!("{:<12} {:<12} {:<10} {:<10}", "LANGUAGE", "RUNTIME", "VERSION", "FILE");
    println!("{}", "─".repeat(48));
    for runtime in &runtimes {
        println!(
            "{:<12} {:<12} {:<10} {:<10}",
            runtime.language.key(),
            runtime.runtime,
            runtime.version,
            runtime.file_name()
        );
    }
    println!("\n✅ Total: {} language(s)", runtimes.len());
    Ok(())
}
