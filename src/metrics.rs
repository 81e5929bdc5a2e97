//! Prometheus metrics for the agent service
//!
//! All metrics live in one process-wide registry so the HTTP layer can render
//! them at `/metrics` without threading handles through every component.

use lazy_static::lazy_static;
use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry,
    TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Finished agent runs by outcome ("success", "upstream_error", "storage_error",
    /// "incomplete", or "cancelled" when the consumer went away first)
    pub static ref AGENT_RUNS: IntCounterVec = IntCounterVec::new(
        Opts::new("copywriter_agent_runs_total", "Agent runs by outcome"),
        &["status"]
    ).expect("metric can be created");

    /// End-to-end duration of agent runs
    pub static ref AGENT_RUN_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("copywriter_agent_run_duration_seconds", "Agent run duration")
            .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0, 160.0, 300.0])
    ).expect("metric can be created");

    /// Runs currently streaming
    pub static ref AGENT_RUNS_IN_FLIGHT: Gauge = Gauge::new(
        "copywriter_agent_runs_in_flight", "Agent runs currently in progress"
    ).expect("metric can be created");

    /// Model rounds that requested tools, per run
    pub static ref AGENT_TOOL_ROUNDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("copywriter_agent_tool_rounds", "Tool-calling rounds per run")
            .buckets(vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 8.0])
    ).expect("metric can be created");

    /// Tool invocations by tool name and outcome
    pub static ref AGENT_TOOL_CALLS: IntCounterVec = IntCounterVec::new(
        Opts::new("copywriter_agent_tool_calls_total", "Tool invocations"),
        &["tool", "status"]
    ).expect("metric can be created");

    /// Latency of one streamed model completion
    pub static ref LLM_CALL_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("copywriter_llm_call_duration_seconds", "LLM completion duration")
            .buckets(vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["model"]
    ).expect("metric can be created");

    /// Session store failures by operation
    pub static ref STORE_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("copywriter_store_errors_total", "Session store failures"),
        &["operation"]
    ).expect("metric can be created");
}

/// Register every metric with the global registry.
///
/// Safe to call more than once; duplicate registrations are ignored.
pub fn register_metrics() {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(AGENT_RUNS.clone()),
        Box::new(AGENT_RUN_DURATION.clone()),
        Box::new(AGENT_RUNS_IN_FLIGHT.clone()),
        Box::new(AGENT_TOOL_ROUNDS.clone()),
        Box::new(AGENT_TOOL_CALLS.clone()),
        Box::new(LLM_CALL_DURATION.clone()),
        Box::new(STORE_ERRORS.clone()),
    ];
    for collector in collectors {
        let _ = REGISTRY.register(collector);
    }
}

/// Render the registry in the Prometheus text exposition format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}
