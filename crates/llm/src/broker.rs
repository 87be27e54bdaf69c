//! The LLM broker
//!
//! All model calls in the pipeline flow through here so the budget, metrics
//! and degraded-mode behavior live in exactly one place.

use std::sync::Arc;

use langhook_metrics::PipelineMetrics;
use langhook_protocol::{subject, SchemaSummary};
use serde_json::Value;

use crate::budget::Budget;
use crate::error::LlmError;
use crate::parse::{extract_expression, extract_pattern, parse_gate_response};
use crate::prompts;
use crate::provider::ChatModel;
use crate::Result;

/// Prompt kind labels, used for metrics
pub const KIND_MAPPING: &str = "mapping-synthesis";
pub const KIND_PATTERN: &str = "subject-filter-synthesis";
pub const KIND_GATE: &str = "gate-evaluation";

/// Gate evaluation outcome
#[derive(Debug, Clone)]
pub struct GateDecision {
    pub decision: bool,
    /// Model confidence in [0, 1]
    pub confidence: f64,
    pub reasoning: String,
}

/// Budget-governed entry point for every model call
pub struct LlmBroker {
    chat: Option<Arc<dyn ChatModel>>,
    budget: Arc<Budget>,
    metrics: Arc<PipelineMetrics>,
}

impl LlmBroker {
    pub fn new(
        chat: Option<Arc<dyn ChatModel>>,
        budget: Arc<Budget>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        if chat.is_none() {
            tracing::info!("no LLM configured; synthesis degraded to heuristics");
        }
        Self {
            chat,
            budget,
            metrics,
        }
    }

    /// Whether a model is configured
    pub fn is_available(&self) -> bool {
        self.chat.is_some()
    }

    /// Budget counter, for health and metrics surfaces
    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    async fn invoke(&self, kind: &'static str, system: &str, user: &str) -> Result<String> {
        let chat = self
            .chat
            .as_ref()
            .ok_or_else(|| LlmError::Unavailable("no model configured".into()))?;

        self.budget.check()?;
        self.metrics.llm_invocations.with_label_values(&[kind]).inc();

        let outcome = chat.chat(system, user).await?;

        let cost = crate::cost::estimate(
            chat.model(),
            outcome.prompt_tokens,
            outcome.completion_tokens,
        );
        let status = self.budget.charge(cost);
        self.metrics.llm_cost_today.set(status.spent_usd);

        if status.alert_crossed {
            self.metrics
                .budget_alerts
                .with_label_values(&["threshold"])
                .inc();
            tracing::warn!(
                spent_usd = status.spent_usd,
                "daily LLM spend crossed the alert threshold"
            );
        }
        if status.exhausted_crossed {
            self.metrics
                .budget_alerts
                .with_label_values(&["exhausted"])
                .inc();
            tracing::warn!(
                spent_usd = status.spent_usd,
                "daily LLM spend cap exceeded; further calls fail until UTC rollover"
            );
        }

        tracing::debug!(kind, cost_usd = cost, "llm call completed");
        Ok(outcome.content)
    }

    /// Synthesize a transform expression from a sample payload
    ///
    /// The caller round-trips the expression against the sample before
    /// persisting it.
    pub async fn synthesize_mapping(&self, publisher: &str, sample: &Value) -> Result<String> {
        let user = prompts::mapping_user(publisher, sample);
        let response = self
            .invoke(KIND_MAPPING, prompts::MAPPING_SYNTHESIS_SYSTEM, &user)
            .await?;
        extract_expression(&response)
    }

    /// Synthesize a broker subject filter from a description
    ///
    /// Falls back to keyword heuristics when no model is configured or the
    /// call fails; the returned pattern is always validated against the
    /// schema registry.
    pub async fn synthesize_pattern(
        &self,
        description: &str,
        schema: &SchemaSummary,
    ) -> Result<String> {
        let pattern = if self.is_available() {
            let user = prompts::pattern_user(description, schema);
            match self
                .invoke(KIND_PATTERN, prompts::PATTERN_SYNTHESIS_SYSTEM, &user)
                .await
                .and_then(|response| extract_pattern(&response))
            {
                Ok(pattern) => pattern,
                Err(e) => {
                    tracing::warn!(error = %e, "pattern synthesis failed, using heuristic fallback");
                    fallback_pattern(description)
                }
            }
        } else {
            fallback_pattern(description)
        };

        validate_pattern(&pattern, schema)?;
        Ok(pattern)
    }

    /// Evaluate a gate for one canonical event
    ///
    /// Returns the raw decision; threshold and failover policy are the
    /// caller's concern.
    pub async fn evaluate_gate(
        &self,
        prompt: Option<&str>,
        description: &str,
        event: &Value,
    ) -> Result<GateDecision> {
        let user = prompts::gate_user(prompt, description, event);
        let response = self.invoke(KIND_GATE, prompts::GATE_SYSTEM, &user).await?;
        Ok(parse_gate_response(&response))
    }
}

/// Validate a synthesized pattern against the live schema registry
///
/// Every non-wildcard publisher / resource-type / action token must be a
/// known schema token; the resource-id position is unconstrained.
pub fn validate_pattern(pattern: &str, schema: &SchemaSummary) -> Result<()> {
    subject::validate_filter(pattern)
        .map_err(|e| LlmError::BadResponse(e.to_string()))?;

    let prefix = format!("{}.", subject::CANONICAL_PREFIX);
    if pattern != subject::CANONICAL_PREFIX && !pattern.starts_with(&prefix) {
        return Err(LlmError::BadResponse(format!(
            "pattern must start with '{}': {}",
            subject::CANONICAL_PREFIX,
            pattern
        )));
    }

    let tokens: Vec<&str> = pattern.split('.').skip(2).collect();
    let mut unknown = Vec::new();

    let publisher = tokens.first().copied();
    if let Some(p) = publisher {
        if p != "*" && p != ">" && !schema.has_publisher(p) {
            unknown.push(format!("publisher '{}'", p));
        }
    }

    if let Some(t) = tokens.get(1).copied() {
        if t != "*" && t != ">" {
            let scope = publisher.filter(|p| *p != "*" && *p != ">");
            if !schema.has_resource_type(scope, t) {
                unknown.push(format!("resource type '{}'", t));
            }
        }
    }

    // tokens[2] is the resource id: unconstrained
    if let Some(a) = tokens.get(3).copied() {
        if a != "*" && a != ">" && !schema.has_action(a) {
            unknown.push(format!("action '{}'", a));
        }
    }

    if !unknown.is_empty() {
        return Err(LlmError::UnknownSchema(unknown.join(", ")));
    }

    Ok(())
}

/// Keyword-based pattern synthesis, used when no model is reachable
fn fallback_pattern(description: &str) -> String {
    let lower = description.to_lowercase();

    let mut publisher = "*";
    let mut resource_type = "*".to_string();

    if lower.contains("github") || lower.contains("pull request") || lower.contains(" pr ")
        || lower.starts_with("pr ") || lower.contains(" pr,")
    {
        publisher = "github";
        if lower.contains("pull request") || lower.contains("pr ") {
            resource_type = "pull_request".to_string();
        } else if lower.contains("issue") {
            resource_type = "issue".to_string();
        }
    } else if lower.contains("stripe") || lower.contains("payment") {
        publisher = "stripe";
        if lower.contains("payment") {
            resource_type = "payment_intent".to_string();
        }
    } else if lower.contains("issue") {
        resource_type = "issue".to_string();
    }

    let resource_id = lower
        .split(|c: char| !c.is_ascii_digit())
        .find(|token| !token.is_empty())
        .unwrap_or("*");

    let action = if ["create", "created", "new", "opened"]
        .iter()
        .any(|w| lower.contains(w))
    {
        "create"
    } else if ["delete", "deleted", "remove", "removed", "closed"]
        .iter()
        .any(|w| lower.contains(w))
    {
        "delete"
    } else if ["update", "updated", "change", "modified", "approve", "approved", "merged"]
        .iter()
        .any(|w| lower.contains(w))
    {
        "update"
    } else {
        "*"
    };

    let pattern = format!(
        "{}.{}.{}.{}.{}",
        subject::CANONICAL_PREFIX,
        publisher,
        resource_type,
        resource_id,
        action
    );

    tracing::info!(description = %description, pattern = %pattern, "heuristic pattern synthesis");
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::SystemClock;
    use crate::provider::ChatOutcome;
    use async_trait::async_trait;
    use langhook_config::GateBudgetSettings;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn schema() -> SchemaSummary {
        let mut schema = SchemaSummary::default();
        schema.publishers = vec!["github".into(), "stripe".into()];
        schema
            .resource_types
            .insert("github".into(), vec!["pull_request".into()]);
        schema
            .resource_types
            .insert("stripe".into(), vec!["payment_intent".into()]);
        schema.actions = vec!["create".into(), "update".into()];
        schema
    }

    struct StaticChat {
        reply: String,
        calls: AtomicU32,
    }

    impl StaticChat {
        fn new(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ChatModel for StaticChat {
        async fn chat(&self, _system: &str, _user: &str) -> Result<ChatOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatOutcome {
                content: self.reply.clone(),
                prompt_tokens: 100,
                completion_tokens: 20,
            })
        }

        fn model(&self) -> &str {
            "gpt-4o-mini"
        }
    }

    fn broker_with(chat: Option<Arc<dyn ChatModel>>, limit: f64) -> LlmBroker {
        let budget = Arc::new(Budget::new(
            &GateBudgetSettings {
                daily_cost_limit_usd: limit,
                cost_alert_threshold: 0.8,
            },
            Arc::new(SystemClock),
        ));
        LlmBroker::new(chat, budget, Arc::new(PipelineMetrics::new().unwrap()))
    }

    #[tokio::test]
    async fn test_pattern_synthesis_validates_against_schema() {
        let chat = StaticChat::new("langhook.events.github.pull_request.1374.update");
        let broker = broker_with(Some(chat), 10.0);

        let pattern = broker
            .synthesize_pattern("Notify me when PR 1374 is approved", &schema())
            .await
            .unwrap();
        assert_eq!(pattern, "langhook.events.github.pull_request.1374.update");
    }

    #[tokio::test]
    async fn test_pattern_with_unknown_tokens_rejected() {
        let chat = StaticChat::new("langhook.events.jira.ticket.42.create");
        let broker = broker_with(Some(chat), 10.0);

        let err = broker
            .synthesize_pattern("jira ticket 42 created", &schema())
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::UnknownSchema(_)));
    }

    #[tokio::test]
    async fn test_no_model_falls_back_to_heuristic() {
        let broker = broker_with(None, 10.0);

        let pattern = broker
            .synthesize_pattern("Notify me when PR 1374 is approved", &schema())
            .await
            .unwrap();
        assert_eq!(pattern, "langhook.events.github.pull_request.1374.update");
    }

    #[tokio::test]
    async fn test_budget_exhaustion_blocks_mapping_synthesis() {
        let chat = StaticChat::new(r#"{"publisher": "github"}"#);
        let broker = broker_with(Some(Arc::clone(&chat) as Arc<dyn ChatModel>), 0.000_001);

        // first call goes through and spends past the cap
        broker
            .synthesize_mapping("github", &serde_json::json!({"a": 1}))
            .await
            .unwrap();

        let err = broker
            .synthesize_mapping("github", &serde_json::json!({"a": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::BudgetExhausted));
        assert_eq!(chat.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gate_evaluation_parses_decision() {
        let chat =
            StaticChat::new(r#"{"decision": true, "confidence": 0.95, "reasoning": "approval"}"#);
        let broker = broker_with(Some(chat), 10.0);

        let decision = broker
            .evaluate_gate(None, "only approvals", &serde_json::json!({"action": "update"}))
            .await
            .unwrap();
        assert!(decision.decision);
        assert!((decision.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_validate_pattern_wildcards_allowed() {
        assert!(validate_pattern("langhook.events.*.*.*.*", &schema()).is_ok());
        assert!(validate_pattern("langhook.events.>", &schema()).is_ok());
        assert!(validate_pattern("langhook.events.github.>", &schema()).is_ok());
    }

    #[test]
    fn test_validate_pattern_scopes_resource_type_to_publisher() {
        // payment_intent belongs to stripe, not github
        let err =
            validate_pattern("langhook.events.github.payment_intent.*.create", &schema())
                .unwrap_err();
        assert!(matches!(err, LlmError::UnknownSchema(_)));

        // with a wildcard publisher any publisher's resource types count
        assert!(validate_pattern("langhook.events.*.payment_intent.*.create", &schema()).is_ok());
    }

    #[test]
    fn test_validate_pattern_requires_prefix() {
        assert!(validate_pattern("raw.github", &schema()).is_err());
    }

    #[test]
    fn test_fallback_extracts_numeric_id() {
        let pattern = fallback_pattern("tell me when stripe payment 999 is created");
        assert_eq!(pattern, "langhook.events.stripe.payment_intent.999.create");
    }
}
