//! Integration tests for webhook intake: signature verification and event
//! gating against realistically shaped GitHub payloads.

use hmac::{Hmac, Mac};
use revd::error::ReviewError;
use revd::webhook::{parse_event, should_review, verify_signature};
use sha2::Sha256;

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn pull_request_payload(action: &str, draft: bool) -> Vec<u8> {
    format!(
        r#"{{
            "action": "{action}",
            "number": 17,
            "pull_request": {{
                "number": 17,
                "title": "Refactor session storage",
                "body": "Moves session rows to WAL mode.",
                "state": "open",
                "draft": {draft},
                "additions": 120,
                "deletions": 40,
                "changed_files": 3,
                "head": {{"sha": "1f2e3d4c5b6a", "ref": "refactor/storage"}},
                "base": {{"sha": "a6b5c4d3e2f1", "ref": "main"}}
            }},
            "repository": {{
                "name": "widget",
                "full_name": "acme/widget",
                "owner": {{"login": "acme"}}
            }},
            "installation": {{"id": 7001}}
        }}"#
    )
    .into_bytes()
}

// ── Signature verification ───────────────────────────────────────────────────

#[test]
fn test_signed_delivery_verifies_end_to_end() {
    let body = pull_request_payload("opened", false);
    let header = sign("webhook-secret", &body);
    assert!(verify_signature("webhook-secret", &body, Some(&header)).is_ok());

    let event = parse_event(&body).unwrap();
    assert_eq!(event.owner(), "acme");
    assert_eq!(event.repo(), "widget");
    assert_eq!(event.number, 17);
    assert_eq!(event.installation.unwrap().id, 7001);
}

#[test]
fn test_tampered_body_fails_verification() {
    let body = pull_request_payload("opened", false);
    let header = sign("webhook-secret", &body);

    let mut tampered = body.clone();
    let pos = tampered.len() / 2;
    tampered[pos] ^= 0x20;
    let err = verify_signature("webhook-secret", &tampered, Some(&header)).unwrap_err();
    assert!(matches!(err, ReviewError::Authentication(_)));
}

#[test]
fn test_signature_from_wrong_secret_is_rejected() {
    let body = pull_request_payload("synchronize", false);
    let header = sign("attacker-guess", &body);
    assert!(verify_signature("webhook-secret", &body, Some(&header)).is_err());
}

#[test]
fn test_missing_signature_header_is_rejected() {
    let body = pull_request_payload("opened", false);
    let err = verify_signature("webhook-secret", &body, None).unwrap_err();
    assert!(matches!(err, ReviewError::Authentication(_)));
}

// ── Event gating ─────────────────────────────────────────────────────────────

#[test]
fn test_only_review_worthy_actions_pass() {
    for action in ["opened", "synchronize", "ready_for_review"] {
        assert!(should_review(action), "{action} should trigger a review");
    }
    for action in ["closed", "reopened", "labeled", "assigned", "edited"] {
        assert!(!should_review(action), "{action} should be ignored");
    }
}

#[test]
fn test_draft_flag_is_parsed() {
    let body = pull_request_payload("opened", true);
    let event = parse_event(&body).unwrap();
    assert!(event.pull_request.draft);

    let body = pull_request_payload("ready_for_review", false);
    let event = parse_event(&body).unwrap();
    assert!(!event.pull_request.draft);
}

#[test]
fn test_payload_without_installation_parses() {
    let body = String::from_utf8(pull_request_payload("opened", false))
        .unwrap()
        .replace(r#""installation": {"id": 7001}"#, r#""installation": null"#);
    let event = parse_event(body.as_bytes()).unwrap();
    assert!(event.installation.is_none());
}
