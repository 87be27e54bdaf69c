//! Mapping engine
//!
//! Fingerprint-keyed lookup of transforms, with LLM-assisted synthesis of
//! new ones. Synthesis is single-flight per fingerprint: concurrent lookups
//! for the same structure coalesce onto one model call and share the
//! persisted outcome. A failed synthesis is not cached; the next arrival
//! retries.

use std::collections::HashMap;
use std::sync::Arc;

use langhook_llm::LlmBroker;
use langhook_protocol::{canonical_subject, sanitize_token, CanonicalEvent, RawEvent, Resource};
use langhook_store::{IngestMapping, MappingSource, Store};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::error::MapError;
use crate::expr::{CanonicalFields, TransformExpr};
use crate::fingerprint::{extended_fingerprint, structural_fingerprint};
use crate::Result;

/// Deterministic payload-to-canonical transformation
pub struct MappingEngine {
    store: Store,
    broker: Arc<LlmBroker>,
    /// Per-fingerprint synthesis locks
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MappingEngine {
    pub fn new(store: Store, broker: Arc<LlmBroker>) -> Self {
        Self {
            store,
            broker,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    /// Turn a raw event into its canonical form
    pub async fn canonicalize(&self, raw: &RawEvent) -> Result<CanonicalEvent> {
        let fields = self.resolve_fields(&raw.source, &raw.payload).await?;

        let publisher = sanitize_token(&fields.publisher);
        let resource_type = sanitize_token(&fields.resource_type);
        let action = sanitize_token(&fields.action);

        let event = CanonicalEvent {
            id: raw.id,
            timestamp: raw.received_at,
            publisher,
            resource: Resource {
                resource_type,
                id: fields.resource_id,
            },
            action,
            summary: fields.summary,
            payload: raw.payload.clone(),
        };

        // subject derivation doubles as the token invariant check
        canonical_subject(
            &event.publisher,
            &event.resource.resource_type,
            &event.resource.id,
            &event.action,
        )
        .map_err(|e| MapError::InvalidCanonical(e.to_string()))?;

        Ok(event)
    }

    /// Resolve and evaluate the transform for a payload
    async fn resolve_fields(&self, publisher: &str, payload: &Value) -> Result<CanonicalFields> {
        let fingerprint = structural_fingerprint(payload);

        if let Some(mapping) = self.store.mappings().get(publisher, &fingerprint).await? {
            let mapping = self.refine_by_event_fields(publisher, payload, mapping).await?;

            match evaluate(&mapping.expression, payload) {
                Ok(fields) => return Ok(fields),
                Err(eval_err) => {
                    // the stored transform no longer fits; mutate it only if
                    // resynthesis produces a working replacement
                    tracing::warn!(
                        publisher = %publisher,
                        fingerprint = %mapping.fingerprint,
                        error = %eval_err,
                        "stored mapping failed evaluation, attempting resynthesis"
                    );
                    return self
                        .synthesize(publisher, payload, &mapping.fingerprint)
                        .await;
                }
            }
        }

        self.synthesize_single_flight(publisher, payload, &fingerprint)
            .await
    }

    /// Swap in an extended-fingerprint mapping when one exists
    async fn refine_by_event_fields(
        &self,
        publisher: &str,
        payload: &Value,
        mapping: IngestMapping,
    ) -> Result<IngestMapping> {
        if mapping.event_field_expressions.is_empty() {
            return Ok(mapping);
        }

        let values: Vec<Value> = mapping
            .event_field_expressions
            .iter()
            .map(|pointer| payload.pointer(pointer).cloned().unwrap_or(Value::Null))
            .collect();

        let extended = extended_fingerprint(&mapping.fingerprint, &values);
        match self.store.mappings().get(publisher, &extended).await? {
            Some(refined) => Ok(refined),
            None => Ok(mapping),
        }
    }

    /// Coalesce concurrent synthesis requests for one fingerprint
    async fn synthesize_single_flight(
        &self,
        publisher: &str,
        payload: &Value,
        fingerprint: &str,
    ) -> Result<CanonicalFields> {
        let gate = {
            let mut inflight = self.inflight.lock().await;
            Arc::clone(
                inflight
                    .entry(fingerprint.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };

        let _guard = gate.lock().await;

        // a coalesced waiter finds the winner's persisted mapping here
        let result = match self.store.mappings().get(publisher, fingerprint).await? {
            Some(mapping) => evaluate(&mapping.expression, payload)
                .map_err(|e| MapError::InvalidCanonical(e.to_string())),
            None => self.synthesize(publisher, payload, fingerprint).await,
        };

        let mut inflight = self.inflight.lock().await;
        inflight.remove(fingerprint);

        result
    }

    /// Ask the broker for a transform, round-trip it, persist it
    async fn synthesize(
        &self,
        publisher: &str,
        payload: &Value,
        fingerprint: &str,
    ) -> Result<CanonicalFields> {
        let expression = self.broker.synthesize_mapping(publisher, payload).await?;

        let parsed = TransformExpr::parse(&expression)
            .map_err(|e| MapError::Synthesis(format!("unparseable transform: {}", e)))?;
        let fields = parsed
            .evaluate(payload)
            .map_err(|e| MapError::Synthesis(format!("transform fails on its own sample: {}", e)))?;

        let mapping = IngestMapping::new(
            fingerprint,
            publisher,
            expression,
            MappingSource::Synthesized,
        );
        self.store.mappings().upsert(&mapping).await?;

        tracing::info!(
            publisher = %publisher,
            fingerprint = %fingerprint,
            "synthesized and persisted a new mapping"
        );

        Ok(fields)
    }
}

fn evaluate(expression: &str, payload: &Value) -> std::result::Result<CanonicalFields, crate::expr::ExprError> {
    TransformExpr::parse(expression)?.evaluate(payload)
}

#[cfg(test)]
#[path = "engine_test.rs"]
mod engine_test;
