// SPDX-License-Identifier: MIT
//! GitHub webhook intake: signature verification and event gating.
//!
//! GitHub signs every delivery with HMAC-SHA256 over the raw request body and
//! sends the hex digest in `X-Hub-Signature-256` as `sha256=<hex>`. The
//! comparison runs in constant time via `Mac::verify_slice`; a missing or
//! mismatched signature is an authentication failure and the body is never
//! parsed.

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::ReviewError;
use crate::github::types::{PullRequest, Repository};

type HmacSha256 = Hmac<Sha256>;

/// Actions on `pull_request` events that trigger a review.
const REVIEWED_ACTIONS: &[&str] = &["opened", "synchronize", "ready_for_review"];

/// Verify an `X-Hub-Signature-256` header against the raw request body.
///
/// `signature_header` is the full header value including the `sha256=` prefix.
pub fn verify_signature(
    secret: &str,
    body: &[u8],
    signature_header: Option<&str>,
) -> Result<(), ReviewError> {
    let header = signature_header
        .ok_or_else(|| ReviewError::Authentication("missing X-Hub-Signature-256".into()))?;
    let hex_digest = header
        .strip_prefix("sha256=")
        .ok_or_else(|| ReviewError::Authentication("malformed signature header".into()))?;
    let expected = hex::decode(hex_digest)
        .map_err(|_| ReviewError::Authentication("signature is not valid hex".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ReviewError::Authentication(format!("bad webhook secret: {e}")))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| ReviewError::Authentication("webhook signature mismatch".into()))
}

/// Whether this pull_request action warrants a review.
pub fn should_review(action: &str) -> bool {
    REVIEWED_ACTIONS.contains(&action)
}

// ─── Payload types ────────────────────────────────────────────────────────────

/// The subset of the `pull_request` event payload the pipeline consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequestEvent {
    pub action: String,
    pub number: u64,
    pub pull_request: PullRequest,
    pub repository: Repository,
    pub installation: Option<Installation>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Installation {
    pub id: i64,
}

impl PullRequestEvent {
    pub fn owner(&self) -> &str {
        &self.repository.owner.login
    }

    pub fn repo(&self) -> &str {
        &self.repository.name
    }
}

/// Parse a verified delivery body.
pub fn parse_event(body: &[u8]) -> Result<PullRequestEvent, ReviewError> {
    serde_json::from_slice(body)
        .map_err(|e| ReviewError::Validation(format!("malformed pull_request payload: {e}")))
}
