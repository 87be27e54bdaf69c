//! Prompt templates
//!
//! One bounded template per prompt kind. Templates are code, not
//! configuration: changing them changes pipeline behavior and belongs in
//! review.

use langhook_protocol::SchemaSummary;
use serde_json::Value;

/// System prompt for mapping synthesis
///
/// Teaches the model the transform template language the mapping engine
/// evaluates: JSON-pointer leaves and `$case` value maps.
pub const MAPPING_SYNTHESIS_SYSTEM: &str = r#"You are an API analyst specializing in webhook payload transformation.

Analyze the given webhook JSON payload and produce a transform template that converts payloads of this shape into a canonical event.

The transform template is a JSON object with these fields:
- "publisher": the source name (string literal, lowercase snake_case)
- "resource": object with "type" (singular noun, string literal) and "id" (where to find the atomic identifier)
- "action": a CRUD verb: one of "create", "read", "update", "delete"
- "summary": optional, a short human-readable field from the payload

Template value rules:
1. A string starting with "/" is a JSON Pointer into the payload, e.g. "/pull_request/number".
2. Any other string (or number) is a literal.
3. To choose the action from a payload field, use a case object:
   {"$case": "/action", "map": {"opened": "create", "closed": "delete", "edited": "update", "reopened": "update"}, "else": "update"}
   The value at the pointer is looked up in "map"; "else" applies when no entry matches.
4. Map webhook action words to CRUD verbs: opened/created -> create, closed/deleted -> delete, edited/updated -> update, viewed -> read.
5. The resource id must point at an atomic identifier (a number or short string), never a composite.

Return ONLY the JSON template, no explanations or code blocks.

Example output for a GitHub pull request webhook:
{"publisher": "github", "resource": {"type": "pull_request", "id": "/pull_request/number"}, "action": {"$case": "/action", "map": {"opened": "create", "closed": "delete", "edited": "update"}, "else": "update"}, "summary": "/pull_request/title"}"#;

/// User prompt for mapping synthesis
pub fn mapping_user(publisher: &str, sample: &Value) -> String {
    format!(
        "Publisher: {}\n\nSample payload:\n{}",
        publisher,
        serde_json::to_string_pretty(sample).unwrap_or_else(|_| sample.to_string())
    )
}

/// System prompt for subject-filter synthesis
pub const PATTERN_SYNTHESIS_SYSTEM: &str = r#"You are a subject filter generator for LangHook event subscriptions.

Convert natural language descriptions into broker subject filter patterns.

Pattern format: langhook.events.<publisher>.<resource_type>.<resource_id>.<action>

Examples:
- "langhook.events.github.pull_request.1374.update" - GitHub PR 1374 updates
- "langhook.events.stripe.payment_intent.*.create" - any Stripe payment intent creation
- "langhook.events.*.user.123.delete" - user 123 deletion from any system
- "langhook.events.github.*.*.update" - any GitHub resource update

Wildcards:
- "*" matches exactly one token
- ">" matches one or more tokens and may only appear at the end

Use only publishers, resource types and actions that appear in the discovered schema below; use wildcards for anything the description leaves open. Actions are CRUD verbs (approvals and merges are updates).

Respond with just the pattern, nothing else."#;

/// User prompt for subject-filter synthesis
pub fn pattern_user(description: &str, schema: &SchemaSummary) -> String {
    format!(
        "Discovered schema:\n{}\n\nConvert this description to a subject filter pattern:\n\"{}\"\n\nPattern:",
        render_schema(schema),
        description
    )
}

/// System prompt for gate evaluation
pub const GATE_SYSTEM: &str =
    "You are an intelligent event filter for a subscription monitoring system. \
     Respond only with the requested JSON object.";

/// Default gate evaluation template, formatted with the subscription
/// description and the canonical event JSON
pub fn gate_user(prompt: Option<&str>, description: &str, event: &Value) -> String {
    let event_json =
        serde_json::to_string_pretty(event).unwrap_or_else(|_| event.to_string());

    match prompt {
        Some(custom) if !custom.trim().is_empty() => {
            // custom prompts may carry {description} and {event_data} holes
            custom
                .replace("{description}", description)
                .replace("{event_data}", &event_json)
        }
        _ => format!(
            r#"The user has subscribed to: "{description}"

Your task is to evaluate whether the following event genuinely matches the user's intent.

Return ONLY a JSON object with this exact format:
{{
    "decision": true or false,
    "confidence": 0.0 to 1.0,
    "reasoning": "brief explanation"
}}

Event to evaluate:
{event_json}

Consider:
- Does this event truly match what the user wants to be notified about?
- Would a reasonable person consider this relevant to their subscription?

Be selective - only pass events that clearly match the user's intent."#
        ),
    }
}

fn render_schema(schema: &SchemaSummary) -> String {
    if schema.is_empty() {
        return "(no schemas discovered yet)".to_string();
    }

    let mut lines = Vec::new();
    lines.push(format!("publishers: {}", schema.publishers.join(", ")));
    for (publisher, types) in &schema.resource_types {
        lines.push(format!("{} resource types: {}", publisher, types.join(", ")));
    }
    lines.push(format!("actions: {}", schema.actions.join(", ")));
    lines.join("\n")
}
