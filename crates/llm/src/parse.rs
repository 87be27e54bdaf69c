//! Model response parsing
//!
//! Models wrap answers in code fences and prose despite instructions; these
//! helpers dig the useful part out.

use serde_json::Value;

use crate::broker::GateDecision;
use crate::error::LlmError;
use crate::Result;

/// Strip markdown code fences and slice to the outermost JSON object
fn extract_json_object(response: &str) -> Option<&str> {
    let mut text = response.trim();

    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        text = rest.split("```").next().unwrap_or(rest).trim();
    } else if let Some(start) = text.find("```") {
        let rest = &text[start + 3..];
        text = rest.split("```").next().unwrap_or(rest).trim();
    }

    let open = text.find('{')?;
    let close = text.rfind('}')?;
    if close < open {
        return None;
    }
    Some(&text[open..=close])
}

/// Extract a transform expression from a synthesis response
///
/// The expression must parse as a JSON object; it is re-serialized so the
/// stored form is canonical regardless of model formatting.
pub fn extract_expression(response: &str) -> Result<String> {
    let sliced = extract_json_object(response)
        .ok_or_else(|| LlmError::BadResponse("no JSON object in synthesis response".into()))?;

    let value: Value = serde_json::from_str(sliced)
        .map_err(|e| LlmError::BadResponse(format!("synthesis response is not JSON: {}", e)))?;

    if !value.is_object() {
        return Err(LlmError::BadResponse(
            "synthesis response is not a JSON object".into(),
        ));
    }

    Ok(value.to_string())
}

/// Extract a subject filter pattern from a synthesis response
pub fn extract_pattern(response: &str) -> Result<String> {
    let candidate = response
        .split(|c: char| c.is_whitespace() || c == '"' || c == '`' || c == '\'')
        .find(|token| token.to_lowercase().starts_with("langhook.events."))
        .ok_or_else(|| LlmError::BadResponse("no subject pattern in response".into()))?;

    // a trailing sentence period would create an empty token
    let pattern = candidate.trim_end_matches(|c| c == '.' || c == ',').to_lowercase();

    let valid_chars = pattern
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '*' | '>'));
    if !valid_chars {
        return Err(LlmError::BadResponse(format!(
            "pattern contains invalid characters: {}",
            pattern
        )));
    }

    Ok(pattern)
}

/// Parse a gate evaluation response
///
/// Never fails: an unparseable answer becomes a block with zero confidence,
/// matching the conservative behavior expected of the gate.
pub fn parse_gate_response(response: &str) -> GateDecision {
    let Some(sliced) = extract_json_object(response) else {
        return GateDecision {
            decision: false,
            confidence: 0.0,
            reasoning: "failed to parse gate response".to_string(),
        };
    };

    match serde_json::from_str::<Value>(sliced) {
        Ok(value) => GateDecision {
            decision: value
                .get("decision")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            confidence: value
                .get("confidence")
                .and_then(Value::as_f64)
                .unwrap_or(0.0),
            reasoning: value
                .get("reasoning")
                .and_then(Value::as_str)
                .unwrap_or("no reasoning provided")
                .to_string(),
        },
        Err(e) => GateDecision {
            decision: false,
            confidence: 0.0,
            reasoning: format!("failed to parse gate response: {}", e),
        },
    }
}
