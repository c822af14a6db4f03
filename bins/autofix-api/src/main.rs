mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use autofix_common::config::AutofixConfig;
use autofix_common::languages::LanguageRegistry;
use autofix_engine::{ChatCompletionsGenerator, CodeGenerator, SandboxExecutionClient, SandboxExecutor};
use axum::Router;
use metrics::Metrics;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub struct AppState {
    pub sandbox: Arc<dyn SandboxExecutor>,
    pub generator: Arc<dyn CodeGenerator>,
    pub config: AutofixConfig,
    pub metrics: Metrics,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    info!("Autofix API booting...");

    let config = AutofixConfig::from_env().context("Invalid configuration")?;
    let registry = LanguageRegistry::load(&config.languages_config)
        .context("Failed to load language configuration")?;
    info!(
        sandbox_url = %config.sandbox.url,
        generator_url = %config.generator.base_url,
        model = %config.generator.model,
        max_retries = config.max_retries,
        stderr_policy = %config.stderr_policy,
        "Configuration loaded"
    );

    let sandbox = SandboxExecutionClient::new(&config.sandbox, Arc::new(registry))
        .context("Failed to build sandbox client")?;
    let generator =
        ChatCompletionsGenerator::new(&config.generator).context("Failed to build generator client")?;
    let addr = config.api_addr.clone();

    let state = Arc::new(AppState {
        sandbox: Arc::new(sandbox),
        generator: Arc::new(generator),
        config,
        metrics: Metrics::new().context("Failed to register metrics")?,
    });

    let app = Router::new().merge(routes::routes()).with_state(state);

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Autofix API stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
