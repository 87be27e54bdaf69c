//! LangHook - Metrics
//!
//! Process-wide pipeline metrics with Prometheus text exposition.
//!
//! # Overview
//!
//! A single [`PipelineMetrics`] value is built at startup and shared as an
//! `Arc` by every component. All counters are lock-free; `render()` produces
//! the text format served by `GET /metrics`.
//!
//! # Metric families
//!
//! - `langhook_events_processed_total{source}` / `_mapped_total` / `_failed_total`
//! - `langhook_events_ingested_total{source, outcome}`
//! - `langhook_llm_invocations_total{kind}`
//! - `langhook_llm_cost_today_usd`
//! - `langhook_budget_alerts_total{kind}`
//! - `langhook_gate_decisions_total{decision}`
//! - `langhook_webhook_deliveries_total{outcome}`
//! - `langhook_map_duration_seconds` / `langhook_gate_duration_seconds`

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, IntCounterVec, Opts, Registry, TextEncoder,
};
use thiserror::Error;

/// Metrics registration or rendering failure
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("metrics error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Pipeline-wide metric families
pub struct PipelineMetrics {
    registry: Registry,

    /// Raw events consumed by the map worker, by source
    pub events_processed: IntCounterVec,
    /// Canonical events emitted, by source
    pub events_mapped: IntCounterVec,
    /// Events that ended on a DLQ, by source
    pub events_failed: IntCounterVec,
    /// Ingest requests by source and outcome (accepted, rejected, ...)
    pub events_ingested: IntCounterVec,
    /// LLM calls by prompt kind (mapping-synthesis, subject-filter-synthesis, gate-evaluation)
    pub llm_invocations: IntCounterVec,
    /// Estimated USD spent today
    pub llm_cost_today: Gauge,
    /// Budget alerts by kind (threshold, exhausted)
    pub budget_alerts: IntCounterVec,
    /// Gate decisions by outcome (pass, block)
    pub gate_decisions: IntCounterVec,
    /// Webhook channel deliveries by outcome (sent, failed)
    pub webhook_deliveries: IntCounterVec,
    /// Time to canonicalize one raw event
    pub map_duration: Histogram,
    /// Time to evaluate one gate
    pub gate_duration: Histogram,
}

impl PipelineMetrics {
    /// Build and register all metric families
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let events_processed = IntCounterVec::new(
            Opts::new(
                "langhook_events_processed_total",
                "Raw events consumed by the map worker",
            ),
            &["source"],
        )?;
        let events_mapped = IntCounterVec::new(
            Opts::new("langhook_events_mapped_total", "Canonical events emitted"),
            &["source"],
        )?;
        let events_failed = IntCounterVec::new(
            Opts::new(
                "langhook_events_failed_total",
                "Events dead-lettered during mapping",
            ),
            &["source"],
        )?;
        let events_ingested = IntCounterVec::new(
            Opts::new("langhook_events_ingested_total", "Ingest requests"),
            &["source", "outcome"],
        )?;
        let llm_invocations = IntCounterVec::new(
            Opts::new("langhook_llm_invocations_total", "LLM calls by prompt kind"),
            &["kind"],
        )?;
        let llm_cost_today = Gauge::new(
            "langhook_llm_cost_today_usd",
            "Estimated LLM spend today in USD",
        )?;
        let budget_alerts = IntCounterVec::new(
            Opts::new("langhook_budget_alerts_total", "Budget alerts emitted"),
            &["kind"],
        )?;
        let gate_decisions = IntCounterVec::new(
            Opts::new("langhook_gate_decisions_total", "LLM gate outcomes"),
            &["decision"],
        )?;
        let webhook_deliveries = IntCounterVec::new(
            Opts::new(
                "langhook_webhook_deliveries_total",
                "Webhook channel dispatch outcomes",
            ),
            &["outcome"],
        )?;
        let map_duration = Histogram::with_opts(HistogramOpts::new(
            "langhook_map_duration_seconds",
            "Time to canonicalize one raw event",
        ))?;
        let gate_duration = Histogram::with_opts(HistogramOpts::new(
            "langhook_gate_duration_seconds",
            "Time to evaluate one gate",
        ))?;

        registry.register(Box::new(events_processed.clone()))?;
        registry.register(Box::new(events_mapped.clone()))?;
        registry.register(Box::new(events_failed.clone()))?;
        registry.register(Box::new(events_ingested.clone()))?;
        registry.register(Box::new(llm_invocations.clone()))?;
        registry.register(Box::new(llm_cost_today.clone()))?;
        registry.register(Box::new(budget_alerts.clone()))?;
        registry.register(Box::new(gate_decisions.clone()))?;
        registry.register(Box::new(webhook_deliveries.clone()))?;
        registry.register(Box::new(map_duration.clone()))?;
        registry.register(Box::new(gate_duration.clone()))?;

        Ok(Self {
            registry,
            events_processed,
            events_mapped,
            events_failed,
            events_ingested,
            llm_invocations,
            llm_cost_today,
            budget_alerts,
            gate_decisions,
            webhook_deliveries,
            map_duration,
            gate_duration,
        })
    }

    /// Render the registry in Prometheus text format
    pub fn render(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buf = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }
}
