//! Cross-module edge case tests for the pipeline crate.

use crate::alerts::alertable_issues;
use crate::ingest::fingerprint;
use crate::intake::{is_message_event, parse_command, Command};
use crate::models::{IssueSeverity, RiskLevel};
use crate::provider::parse_analysis;
use crate::signature::{sign, verify_signature};

#[test]
fn analysis_scenario_high_risk_critical_issue() {
    // Happy path: provider flags one critical issue.
    let content = r#"{
        "compliance_score": 40,
        "risk_level": "high",
        "issues": [
            {"code": "IVA_RATE_INVALID", "severity": "critical", "message": "Taxa invalida"}
        ]
    }"#;
    let result = parse_analysis(content);

    assert_eq!(result.compliance_score, 40);
    assert_eq!(result.risk_level, RiskLevel::High);

    let alertable = alertable_issues(&result.issues);
    assert_eq!(alertable.len(), 1);
    assert_eq!(alertable[0].code, "IVA_RATE_INVALID");
    assert_eq!(alertable[0].severity, IssueSeverity::Critical);
}

#[test]
fn malformed_provider_reply_never_escapes_as_error() {
    // Every non-JSON body degrades to the same safe default.
    for garbage in ["", "not json", "{truncated", "<html>502</html>"] {
        let result = parse_analysis(garbage);
        assert_eq!(result.confidence_score, 0.0, "input: {garbage:?}");
        assert_eq!(result.compliance_score, 50);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].code, "PARSE_ERROR");
    }
}

#[test]
fn json_null_reply_is_treated_as_empty_schema() {
    // "null" parses as JSON, so field defaults apply instead of PARSE_ERROR.
    let result = parse_analysis("null");
    assert_eq!(result.risk_level, RiskLevel::Medium);
    assert!(result.issues.is_empty());
    assert_eq!(result.confidence_score, 0.5);
}

#[test]
fn signature_verification_with_empty_inputs() {
    assert!(!verify_signature(b"", "", "secret"));
    assert!(!verify_signature(b"body", "", "secret"));

    // An empty body still signs and verifies deterministically.
    let sig = sign(b"", "secret");
    assert!(verify_signature(b"", &sig, "secret"));
}

#[test]
fn signature_is_over_exact_raw_bytes() {
    // Re-serialized JSON (key order, whitespace) must not verify: the
    // contract is over the body exactly as received.
    let body = br#"{"event":"messages.upsert","data":{"from":"351912345678"}}"#;
    let reordered = br#"{"data":{"from":"351912345678"},"event":"messages.upsert"}"#;
    let sig = sign(body, "secret");
    assert!(verify_signature(body, &sig, "secret"));
    assert!(!verify_signature(reordered, &sig, "secret"));
}

#[test]
fn identical_bytes_share_a_fingerprint_across_names() {
    // Dedup keys on content, not filename or mimetype.
    let bytes = b"%PDF-1.4 fake invoice";
    assert_eq!(fingerprint(bytes), fingerprint(bytes));
}

#[test]
fn non_message_events_are_ignored() {
    for event in ["connection.update", "qrcode.updated", "presence.update"] {
        assert!(!is_message_event(event));
    }
    for event in ["messages.upsert", "messages.update", "send.message"] {
        assert!(is_message_event(event));
    }
}

#[test]
fn command_parsing_tolerates_surrounding_noise() {
    assert_eq!(parse_command("\n/status\n"), Command::Status);
    assert_eq!(parse_command("/STATUS"), Command::Status);
    assert_eq!(parse_command("/statuses"), Command::Other);
    assert_eq!(parse_command(""), Command::Other);
}
