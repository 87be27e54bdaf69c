//! Transform expressions
//!
//! A transform expression is a JSON template evaluated against a webhook
//! payload:
//!
//! ```json
//! {
//!   "publisher": "github",
//!   "resource": {"type": "pull_request", "id": "/pull_request/number"},
//!   "action": {"$case": "/action",
//!              "map": {"opened": "create", "closed": "delete"},
//!              "else": "update"},
//!   "summary": "/pull_request/title"
//! }
//! ```
//!
//! Leaf rules:
//!
//! - A string starting with `/` is an RFC 6901 JSON Pointer into the payload.
//! - A string starting with `\` is a literal with the backslash stripped
//!   (escape hatch for literals that begin with `/`).
//! - `{"$case": <pointer>, "map": {...}, "else": <node>}` looks the pointed
//!   value up in a finite map; `else` applies when no entry matches.
//! - Anything else is a literal.
//!
//! Evaluation is purely functional: same expression, same payload, same
//! result.

use std::collections::BTreeMap;

use langhook_protocol::ResourceId;
use serde_json::Value;
use thiserror::Error;

/// Errors from expression parsing or evaluation
#[derive(Debug, Error)]
pub enum ExprError {
    #[error("invalid expression: {0}")]
    Parse(String),

    #[error("pointer {0} has no value in the payload")]
    PointerMissing(String),

    #[error("{field} must be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("no case entry for value '{value}' at {pointer} and no else branch")]
    NoCaseMatch { pointer: String, value: String },
}

/// The record a transform evaluates to
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalFields {
    pub publisher: String,
    pub resource_type: String,
    pub resource_id: ResourceId,
    pub action: String,
    pub summary: Option<String>,
}

#[derive(Debug, Clone)]
enum Node {
    Literal(Value),
    Pointer(String),
    Case {
        pointer: String,
        map: BTreeMap<String, Node>,
        default: Option<Box<Node>>,
    },
}

/// A parsed transform expression
#[derive(Debug, Clone)]
pub struct TransformExpr {
    publisher: Node,
    resource_type: Node,
    resource_id: Node,
    action: Node,
    summary: Option<Node>,
}

impl TransformExpr {
    /// Parse an expression from its stored string form
    pub fn parse(expression: &str) -> Result<Self, ExprError> {
        let value: Value = serde_json::from_str(expression)
            .map_err(|e| ExprError::Parse(format!("not JSON: {}", e)))?;

        let object = value
            .as_object()
            .ok_or_else(|| ExprError::Parse("expression must be a JSON object".into()))?;

        let publisher = parse_node(
            object
                .get("publisher")
                .ok_or_else(|| ExprError::Parse("missing 'publisher'".into()))?,
        )?;

        let resource = object
            .get("resource")
            .and_then(Value::as_object)
            .ok_or_else(|| ExprError::Parse("missing 'resource' object".into()))?;
        let resource_type = parse_node(
            resource
                .get("type")
                .ok_or_else(|| ExprError::Parse("missing 'resource.type'".into()))?,
        )?;
        let resource_id = parse_node(
            resource
                .get("id")
                .ok_or_else(|| ExprError::Parse("missing 'resource.id'".into()))?,
        )?;

        let action = parse_node(
            object
                .get("action")
                .ok_or_else(|| ExprError::Parse("missing 'action'".into()))?,
        )?;

        let summary = object.get("summary").map(parse_node).transpose()?;

        Ok(Self {
            publisher,
            resource_type,
            resource_id,
            action,
            summary,
        })
    }

    /// Evaluate against a payload
    pub fn evaluate(&self, payload: &Value) -> Result<CanonicalFields, ExprError> {
        let publisher = required_string(eval(&self.publisher, payload)?, "publisher")?;
        let resource_type = required_string(eval(&self.resource_type, payload)?, "resource.type")?;
        let action = required_string(eval(&self.action, payload)?, "action")?;

        let resource_id = match eval(&self.resource_id, payload)? {
            Value::Number(n) => match n.as_i64() {
                Some(i) => ResourceId::Number(i),
                // non-integral ids keep their textual form
                None => ResourceId::String(n.to_string()),
            },
            Value::String(s) if !s.trim().is_empty() => ResourceId::String(s),
            _ => {
                return Err(ExprError::WrongType {
                    field: "resource.id",
                    expected: "a non-empty string or number",
                })
            }
        };

        let summary = match &self.summary {
            None => None,
            Some(node) => match eval(node, payload) {
                Ok(Value::String(s)) if !s.is_empty() => Some(s),
                Ok(Value::Null) | Err(ExprError::PointerMissing(_)) => None,
                Ok(other) if !other.is_object() && !other.is_array() => Some(other.to_string()),
                Ok(_) => None,
                Err(e) => return Err(e),
            },
        };

        Ok(CanonicalFields {
            publisher,
            resource_type,
            resource_id,
            action,
            summary,
        })
    }
}

fn parse_node(value: &Value) -> Result<Node, ExprError> {
    match value {
        Value::String(s) => {
            if let Some(rest) = s.strip_prefix('\\') {
                Ok(Node::Literal(Value::String(rest.to_string())))
            } else if s.starts_with('/') {
                Ok(Node::Pointer(s.clone()))
            } else {
                Ok(Node::Literal(value.clone()))
            }
        }
        Value::Object(map) if map.contains_key("$case") => {
            let pointer = map
                .get("$case")
                .and_then(Value::as_str)
                .filter(|s| s.starts_with('/'))
                .ok_or_else(|| ExprError::Parse("'$case' must be a JSON pointer".into()))?
                .to_string();

            let entries = map
                .get("map")
                .and_then(Value::as_object)
                .ok_or_else(|| ExprError::Parse("'$case' requires a 'map' object".into()))?;

            let mut parsed = BTreeMap::new();
            for (key, entry) in entries {
                parsed.insert(key.clone(), parse_node(entry)?);
            }

            let default = map
                .get("else")
                .map(|node| parse_node(node).map(Box::new))
                .transpose()?;

            Ok(Node::Case {
                pointer,
                map: parsed,
                default,
            })
        }
        Value::Number(_) | Value::Bool(_) => Ok(Node::Literal(value.clone())),
        other => Err(ExprError::Parse(format!(
            "unsupported template node: {}",
            other
        ))),
    }
}

fn eval(node: &Node, payload: &Value) -> Result<Value, ExprError> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Pointer(pointer) => payload
            .pointer(pointer)
            .cloned()
            .ok_or_else(|| ExprError::PointerMissing(pointer.clone())),
        Node::Case {
            pointer,
            map,
            default,
        } => {
            let value = payload
                .pointer(pointer)
                .ok_or_else(|| ExprError::PointerMissing(pointer.clone()))?;
            let key = scalar_key(value);

            if let Some(entry) = map.get(&key) {
                return eval(entry, payload);
            }
            match default {
                Some(node) => eval(node, payload),
                None => Err(ExprError::NoCaseMatch {
                    pointer: pointer.clone(),
                    value: key,
                }),
            }
        }
    }
}

fn scalar_key(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn required_string(value: Value, field: &'static str) -> Result<String, ExprError> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(ExprError::WrongType {
            field,
            expected: "a non-empty string",
        }),
    }
}
