//! Per-publisher HMAC signature verification
//!
//! Three schemes, selected by publisher name:
//!
//! - **github**: `x-hub-signature-256: sha256=<hex>` over the raw body
//! - **stripe**: `stripe-signature: t=<unix>,v1=<hex>` over `"{t}.{body}"`
//! - anything else: `x-webhook-signature: <hex>` over the raw body
//!
//! All comparisons are constant-time. When no secret is configured for the
//! publisher, verification is skipped and the event is marked valid.
//! Verification never fails with an error; a mismatch is a result.

use std::collections::BTreeMap;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

const GITHUB_HEADER: &str = "x-hub-signature-256";
const STRIPE_HEADER: &str = "stripe-signature";
const GENERIC_HEADER: &str = "x-webhook-signature";

/// Outcome of a verification attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verification {
    pub valid: bool,
    pub reason: &'static str,
}

impl Verification {
    fn ok(reason: &'static str) -> Self {
        Self {
            valid: true,
            reason,
        }
    }

    fn invalid(reason: &'static str) -> Self {
        Self {
            valid: false,
            reason,
        }
    }
}

/// Publisher-keyed signature verifier
#[derive(Clone)]
pub struct SignatureVerifier {
    /// Secrets keyed by lowercase publisher name
    secrets: BTreeMap<String, String>,
}

impl SignatureVerifier {
    pub fn new(secrets: BTreeMap<String, String>) -> Self {
        Self { secrets }
    }

    /// Whether a secret is configured for this publisher
    pub fn has_secret(&self, source: &str) -> bool {
        self.secrets.contains_key(&source.to_lowercase())
    }

    /// Verify a request body against the publisher's scheme
    pub fn verify(
        &self,
        source: &str,
        body: &[u8],
        headers: &BTreeMap<String, String>,
    ) -> Verification {
        let source = source.to_lowercase();
        let Some(secret) = self.secrets.get(&source) else {
            return Verification::ok("no secret configured");
        };

        match source.as_str() {
            "github" => verify_github(secret, body, headers),
            "stripe" => verify_stripe(secret, body, headers),
            _ => verify_generic(secret, body, headers),
        }
    }
}

fn verify_github(
    secret: &str,
    body: &[u8],
    headers: &BTreeMap<String, String>,
) -> Verification {
    let Some(header) = headers.get(GITHUB_HEADER) else {
        return Verification::invalid("missing x-hub-signature-256 header");
    };
    let Some(provided) = header.strip_prefix("sha256=") else {
        return Verification::invalid("signature header missing sha256= prefix");
    };

    if hex_matches(secret, body, provided) {
        Verification::ok("github hmac verified")
    } else {
        Verification::invalid("signature mismatch")
    }
}

fn verify_stripe(
    secret: &str,
    body: &[u8],
    headers: &BTreeMap<String, String>,
) -> Verification {
    let Some(header) = headers.get(STRIPE_HEADER) else {
        return Verification::invalid("missing stripe-signature header");
    };

    let mut timestamp: Option<&str> = None;
    let mut candidates: Vec<&str> = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = Some(value),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let Some(timestamp) = timestamp else {
        return Verification::invalid("stripe-signature header missing t=");
    };
    if candidates.is_empty() {
        return Verification::invalid("stripe-signature header missing v1=");
    }

    let mut signed = Vec::with_capacity(timestamp.len() + 1 + body.len());
    signed.extend_from_slice(timestamp.as_bytes());
    signed.push(b'.');
    signed.extend_from_slice(body);

    for candidate in candidates {
        if hex_matches(secret, &signed, candidate) {
            return Verification::ok("stripe hmac verified");
        }
    }
    Verification::invalid("signature mismatch")
}

fn verify_generic(
    secret: &str,
    body: &[u8],
    headers: &BTreeMap<String, String>,
) -> Verification {
    let Some(provided) = headers.get(GENERIC_HEADER) else {
        return Verification::invalid("missing x-webhook-signature header");
    };

    if hex_matches(secret, body, provided) {
        Verification::ok("hmac verified")
    } else {
        Verification::invalid("signature mismatch")
    }
}

/// Compute HMAC-SHA256 and compare against a hex digest in constant time
fn hex_matches(secret: &str, message: &[u8], provided_hex: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    let expected = hex::encode(mac.finalize().into_bytes());

    let provided = provided_hex.trim().to_lowercase();
    expected.as_bytes().ct_eq(provided.as_bytes()).into()
}
