// Prometheus metrics for the autofix API

use autofix_common::types::{AttemptAction, ExecutionResult, LoopOutcome};
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    runs_total: IntCounterVec,
    iterations: Histogram,
    sandbox_executions_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let runs_total = IntCounterVec::new(
            Opts::new("autofix_runs_total", "Repair loop runs by final status"),
            &["status"],
        )?;
        let iterations = Histogram::with_opts(
            HistogramOpts::new("autofix_iterations", "Sandbox executions per repair loop run")
                .buckets(vec![0.0, 1.0, 2.0, 3.0, 5.0, 8.0, 13.0]),
        )?;
        let sandbox_executions_total = IntCounterVec::new(
            Opts::new("sandbox_executions_total", "Sandbox calls by outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(runs_total.clone()))?;
        registry.register(Box::new(iterations.clone()))?;
        registry.register(Box::new(sandbox_executions_total.clone()))?;

        Ok(Self {
            registry,
            runs_total,
            iterations,
            sandbox_executions_total,
        })
    }

    /// Record a finished loop run, including every execution it made
    pub fn observe_outcome(&self, outcome: &LoopOutcome) {
        let status = outcome.status.to_string();
        self.runs_total.with_label_values(&[status.as_str()]).inc();
        self.iterations.observe(f64::from(outcome.iterations));

        for attempt in &outcome.history {
            let label = match attempt.action {
                AttemptAction::GeneratedSuccess | AttemptAction::FailedWithExitCode(_) => "completed",
                AttemptAction::ExecutionApiFailed => "transport_failure",
                AttemptAction::ModelErrorOnFix => continue,
            };
            self.sandbox_executions_total.with_label_values(&[label]).inc();
        }
    }

    /// Record a single direct sandbox call
    pub fn observe_execution(&self, result: &ExecutionResult) {
        let label = if result.transport_ok {
            "completed"
        } else {
            "transport_failure"
        };
        self.sandbox_executions_total.with_label_values(&[label]).inc();
    }

    /// Prometheus text exposition of everything registered
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
