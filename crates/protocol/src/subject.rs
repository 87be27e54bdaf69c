//! Broker subject derivation and filter matching
//!
//! Canonical events are addressed as
//! `langhook.events.{publisher}.{resource_type}.{resource_id}.{action}`.
//! Raw events use `raw.{source}`, dead letters `dlq.ingest.{source}` and
//! `dlq.map.{source}`.
//!
//! Subject derivation is a pure function of its inputs: tokens are
//! lowercased and characters that would corrupt the subject grammar (the
//! separator, wildcards, whitespace) are replaced with `_`.

use crate::error::ProtocolError;
use crate::events::ResourceId;

/// Prefix for canonical event subjects
pub const CANONICAL_PREFIX: &str = "langhook.events";

/// Stream holding raw ingested events (`raw.{source}`)
pub const RAW_STREAM: &str = "raw";

/// Stream holding canonical events (`langhook.events.>`)
pub const EVENTS_STREAM: &str = "events";

/// Stream holding dead letters (`dlq.ingest.*`, `dlq.map.*`)
pub const DLQ_STREAM: &str = "dlq";

/// Sanitize a value into a single subject token
///
/// Lowercases and replaces `.`, `*`, `>`, and whitespace with `_` so the
/// result can never introduce extra separators or wildcard semantics.
pub fn sanitize_token(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Derive the canonical publish subject for an event five-tuple
///
/// Fails when any mandatory token sanitizes to the empty string, which would
/// otherwise produce consecutive separators.
pub fn canonical_subject(
    publisher: &str,
    resource_type: &str,
    resource_id: &ResourceId,
    action: &str,
) -> Result<String, ProtocolError> {
    let publisher = non_empty(sanitize_token(publisher), "publisher")?;
    let resource_type = non_empty(sanitize_token(resource_type), "resource.type")?;
    let resource_id = non_empty(sanitize_token(&resource_id.as_token()), "resource.id")?;
    let action = non_empty(sanitize_token(action), "action")?;

    Ok(format!(
        "{}.{}.{}.{}.{}",
        CANONICAL_PREFIX, publisher, resource_type, resource_id, action
    ))
}

/// Subject carrying a raw event for a source
pub fn raw_subject(source: &str) -> String {
    format!("raw.{}", sanitize_token(source))
}

/// Dead-letter subject for ingest failures (invalid JSON)
pub fn dlq_ingest_subject(source: &str) -> String {
    format!("dlq.ingest.{}", sanitize_token(source))
}

/// Dead-letter subject for mapping failures
pub fn dlq_map_subject(source: &str) -> String {
    format!("dlq.map.{}", sanitize_token(source))
}

fn non_empty(token: String, field: &'static str) -> Result<String, ProtocolError> {
    if token.is_empty() {
        Err(ProtocolError::EmptyToken { field })
    } else {
        Ok(token)
    }
}

/// Check a subject against a filter
///
/// `*` matches exactly one token; `>` matches one or more remaining tokens
/// and must be the final token of the filter.
pub fn subject_matches(filter: &str, subject: &str) -> bool {
    let filter_tokens: Vec<&str> = filter.split('.').collect();
    let subject_tokens: Vec<&str> = subject.split('.').collect();

    for (i, ft) in filter_tokens.iter().enumerate() {
        match *ft {
            ">" => {
                // matches one or more remaining tokens
                return i == filter_tokens.len() - 1 && subject_tokens.len() > i;
            }
            "*" => {
                if i >= subject_tokens.len() {
                    return false;
                }
            }
            token => {
                if subject_tokens.get(i) != Some(&token) {
                    return false;
                }
            }
        }
    }

    filter_tokens.len() == subject_tokens.len()
}

/// Validate the shape of a subject filter
///
/// Rejects empty tokens, `>` anywhere but the final position, and wildcard
/// characters embedded inside a token.
pub fn validate_filter(filter: &str) -> Result<(), ProtocolError> {
    if filter.is_empty() {
        return Err(ProtocolError::invalid_filter(filter, "empty filter"));
    }

    let tokens: Vec<&str> = filter.split('.').collect();
    for (i, token) in tokens.iter().enumerate() {
        if token.is_empty() {
            return Err(ProtocolError::invalid_filter(filter, "empty token"));
        }
        if *token == ">" {
            if i != tokens.len() - 1 {
                return Err(ProtocolError::invalid_filter(
                    filter,
                    "'>' must be the last token",
                ));
            }
            continue;
        }
        if *token == "*" {
            continue;
        }
        if token.contains('*') || token.contains('>') {
            return Err(ProtocolError::invalid_filter(
                filter,
                format!("wildcard inside token '{}'", token),
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_subject_happy_path() {
        let subject = canonical_subject(
            "github",
            "pull_request",
            &ResourceId::Number(1374),
            "create",
        )
        .unwrap();
        assert_eq!(subject, "langhook.events.github.pull_request.1374.create");
    }

    #[test]
    fn test_tokens_are_lowercased_and_dots_replaced() {
        let subject = canonical_subject(
            "GitHub",
            "pull.request",
            &ResourceId::String("PR.12".into()),
            "Create",
        )
        .unwrap();
        assert_eq!(subject, "langhook.events.github.pull_request.pr_12.create");
    }

    #[test]
    fn test_no_consecutive_or_trailing_separators() {
        // tokens made entirely of separators sanitize to underscores
        let subject =
            canonical_subject("a.b", "..", &ResourceId::String("..".into()), "x.").unwrap();
        assert!(!subject.contains(".."));
        assert!(!subject.starts_with('.'));
        assert!(!subject.ends_with('.'));
    }

    #[test]
    fn test_empty_token_rejected() {
        let err = canonical_subject("", "t", &ResourceId::Number(1), "a").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::EmptyToken { field: "publisher" }
        ));

        let err =
            canonical_subject("p", "t", &ResourceId::String("   ".into()), "a").unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::EmptyToken {
                field: "resource.id"
            }
        ));
    }

    #[test]
    fn test_whitespace_and_wildcards_sanitized() {
        assert_eq!(sanitize_token("pull request"), "pull_request");
        assert_eq!(sanitize_token("a*b>c"), "a_b_c");
    }

    #[test]
    fn test_helper_subjects() {
        assert_eq!(raw_subject("github"), "raw.github");
        assert_eq!(dlq_ingest_subject("Stripe"), "dlq.ingest.stripe");
        assert_eq!(dlq_map_subject("github"), "dlq.map.github");
    }

    #[test]
    fn test_exact_match() {
        assert!(subject_matches(
            "langhook.events.github.pull_request.1374.update",
            "langhook.events.github.pull_request.1374.update"
        ));
        assert!(!subject_matches(
            "langhook.events.github.pull_request.1374.update",
            "langhook.events.github.pull_request.1374.create"
        ));
    }

    #[test]
    fn test_star_matches_exactly_one_token() {
        assert!(subject_matches(
            "langhook.events.stripe.payment_intent.*.create",
            "langhook.events.stripe.payment_intent.pi_123.create"
        ));
        assert!(!subject_matches(
            "langhook.events.stripe.*.create",
            "langhook.events.stripe.payment_intent.pi_123.create"
        ));
        assert!(!subject_matches("a.*", "a"));
    }

    #[test]
    fn test_gt_matches_one_or_more_remaining() {
        assert!(subject_matches("raw.>", "raw.github"));
        assert!(subject_matches("langhook.events.>", "langhook.events.github.issue.1.create"));
        assert!(!subject_matches("raw.>", "raw"));
        // '>' not at the end never matches
        assert!(!subject_matches("raw.>.github", "raw.x.github"));
    }

    #[test]
    fn test_filter_validation() {
        assert!(validate_filter("langhook.events.github.*.*.update").is_ok());
        assert!(validate_filter("langhook.events.>").is_ok());
        assert!(validate_filter("").is_err());
        assert!(validate_filter("a..b").is_err());
        assert!(validate_filter("a.>.b").is_err());
        assert!(validate_filter("a.b*c").is_err());
    }
}
