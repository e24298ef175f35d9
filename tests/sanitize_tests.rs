//! End-to-end tests for the sanitizer: endpoint matching, query allow-lists and transforms.

use std::sync::Arc;

use serde_json::{json, Value};

use privacy_gateway::pseudonyms::{
    PseudonymEncoding, PseudonymImplementation, Pseudonymizer, PseudonymizerOptions,
};
use privacy_gateway::rules::{Endpoint, RuleSet, Transform};
use privacy_gateway::sanitize::{ApiRequest, BlockReason, SanitizeOutcome, Sanitizer};
use privacy_gateway::tokens::{CipherSuite, SecretKey};
use privacy_gateway::GatewayError;

fn pseudonymizer() -> Pseudonymizer {
    Pseudonymizer::new(
        "salt",
        Some(SecretKey::from_bytes(&[9u8; 32]).unwrap()),
        CipherSuite::Gcm,
        PseudonymizerOptions::default(),
    )
}

fn sanitizer(rules: RuleSet) -> Sanitizer {
    Sanitizer::new(rules, pseudonymizer())
}

fn sanitized(sanitizer: &Sanitizer, url: &str, body: &Value) -> Value {
    match sanitizer.sanitize_url("GET", url, &body.to_string()).unwrap() {
        SanitizeOutcome::Sanitized(out) => serde_json::from_str(&out).unwrap(),
        SanitizeOutcome::Blocked(reason) => panic!("unexpectedly blocked: {reason}"),
    }
}

fn pseudonym_of(sanitizer: &Sanitizer, value: &str) -> Value {
    let p = sanitizer.pseudonymizer();
    p.encode(&p.pseudonymize(value, false).unwrap(), PseudonymEncoding::Json)
        .unwrap()
}

fn users_rules() -> RuleSet {
    RuleSet::default().with_endpoint(
        Endpoint::template("/users")
            .with_query_params(["limit", "offset"])
            .with_transform(Transform::redact(["$..phone"]))
            .with_transform(Transform::pseudonymize(["$..email"])),
    )
}

// ---------------------------------------------------------------------------
// Request allow-listing
// ---------------------------------------------------------------------------

#[test]
fn allowed_query_params_pass() {
    let s = sanitizer(users_rules());
    assert!(s.is_allowed("GET", "/users", &["limit"]).unwrap());
    assert!(s.is_allowed("GET", "/users", &["limit", "offset"]).unwrap());
    assert!(s.is_allowed("GET", "/users", &[]).unwrap());
}

#[test]
fn unknown_query_param_blocks() {
    let s = sanitizer(users_rules());
    assert!(!s.is_allowed("GET", "/users", &["foo"]).unwrap());

    let outcome = s.sanitize_url("GET", "/users?foo=bar", "{}").unwrap();
    match outcome {
        SanitizeOutcome::Blocked(BlockReason::DisallowedQueryParams { params, .. }) => {
            assert_eq!(params, vec!["foo"]);
        }
        other => panic!("expected block, got {other:?}"),
    }
}

#[test]
fn unmatched_path_blocks_until_declared() {
    let s = sanitizer(users_rules());
    assert!(!s.is_allowed("GET", "/users/123", &[]).unwrap());

    let mut rules = users_rules();
    rules.append(RuleSet::default().with_endpoint(Endpoint::template("/users/{id}")));
    let s = sanitizer(rules);
    assert!(s.is_allowed("GET", "/users/123", &[]).unwrap());
}

#[test]
fn empty_rule_set_blocks_everything() {
    let s = sanitizer(RuleSet::default());
    let outcome = s.sanitize_url("GET", "/anything", "{}").unwrap();
    assert!(matches!(
        outcome,
        SanitizeOutcome::Blocked(BlockReason::NoMatchingEndpoint { .. })
    ));
}

#[test]
fn method_restriction_applies() {
    let rules = RuleSet::default()
        .with_endpoint(Endpoint::template("/events").with_methods(["GET"]));
    let s = sanitizer(rules);
    assert!(s.is_allowed("get", "/events", &[]).unwrap());
    assert!(!s.is_allowed("DELETE", "/events", &[]).unwrap());
}

#[test]
fn first_matching_endpoint_wins() {
    let rules = RuleSet::default()
        .with_endpoint(
            Endpoint::template("/users/me").with_transform(Transform::redact(["$.name"])),
        )
        .with_endpoint(Endpoint::template("/users/{id}"));
    let s = sanitizer(rules);

    let body = json!({"name": "Alice", "id": 1});
    assert_eq!(sanitized(&s, "/users/me", &body), json!({"id": 1}));
    assert_eq!(sanitized(&s, "/users/42", &body), body);
}

#[test]
fn only_allowed_request_headers_forwarded() {
    let rules = RuleSet::default()
        .with_endpoint(Endpoint::template("/users").with_request_headers(["Accept"]));
    let s = sanitizer(rules);
    let request = ApiRequest::new("GET", "/users")
        .with_header("accept", "application/json")
        .with_header("Cookie", "session=1");
    assert_eq!(
        s.allowed_request_headers(&request).unwrap(),
        vec![("accept".to_string(), "application/json".to_string())]
    );

    let blocked = ApiRequest::new("GET", "/elsewhere").with_header("Accept", "*/*");
    assert!(s.allowed_request_headers(&blocked).unwrap().is_empty());
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

#[test]
fn redact_removes_nodes_and_keeps_key_order() {
    let s = sanitizer(users_rules());
    let out = s
        .sanitize_url(
            "GET",
            "/users?limit=5",
            r#"{"zeta":1,"phone":"555-1234","alpha":2}"#,
        )
        .unwrap()
        .into_body()
        .unwrap();
    assert_eq!(out, r#"{"zeta":1,"alpha":2}"#);
}

#[test]
fn redact_of_absent_path_is_no_op() {
    let rules = RuleSet::default()
        .with_endpoint(Endpoint::template("/x").with_transform(Transform::redact(["$.secret"])));
    let s = sanitizer(rules);
    let body = json!({"a": 1, "b": [1, 2]});
    assert_eq!(sanitized(&s, "/x", &body), body);
}

#[test]
fn pseudonyms_are_consistent_and_hide_the_original() {
    let s = sanitizer(users_rules());
    let body = json!({
        "users": [
            {"email": "alice@acme.com", "phone": "555"},
            {"email": "bob@acme.com"},
            {"email": "Alice@acme.com"}
        ]
    });
    let out = sanitized(&s, "/users", &body);
    let text = out.to_string();
    assert!(!text.contains("alice@acme.com"));
    assert!(!text.contains("555"));

    let users = out["users"].as_array().unwrap();
    assert_eq!(users[0]["email"], users[2]["email"]);
    assert_ne!(users[0]["email"], users[1]["email"]);
    assert_eq!(users[0]["email"]["d"], "acme.com");

    let again = sanitized(&s, "/users", &json!({"email": "alice@acme.com"}));
    assert_eq!(again["email"], users[0]["email"]);
}

#[test]
fn reversible_pseudonyms_can_be_reidentified() {
    let rules = RuleSet::default().with_endpoint(
        Endpoint::template("/users")
            .with_transform(Transform::pseudonymize_reversibly(["$.id"])),
    );
    let s = sanitizer(rules).with_default_encoding(PseudonymEncoding::UrlSafeToken);
    let out = sanitized(&s, "/users", &json!({"id": "employee-42"}));
    let token = out["id"].as_str().unwrap();
    assert!(token.starts_with("p~"));
    assert_eq!(s.pseudonymizer().reidentify(token).unwrap(), "employee-42");
}

#[test]
fn redact_except_phrases_keeps_allowed_phrase() {
    let rules = RuleSet::default().with_endpoint(
        Endpoint::template("/events")
            .with_transform(Transform::redact_except_phrases(["$..summary"], &["Focus Time"])),
    );
    let s = sanitizer(rules);
    let out = sanitized(
        &s,
        "/events",
        &json!({"items": [
            {"summary": "Secret Project Focus Time"},
            {"summary": "Lunch with Bob"}
        ]}),
    );
    assert_eq!(out["items"][0]["summary"], "Focus Time");
    assert_eq!(out["items"][1]["summary"], "");
}

#[test]
fn redact_except_phrases_with_punctuated_phrases() {
    let rules = RuleSet::default().with_endpoint(
        Endpoint::template("/events").with_transform(Transform::redact_except_phrases(
            ["$..summary"],
            &["Focus Time (auto)", "#OOO"],
        )),
    );
    let s = sanitizer(rules);
    let out = sanitized(
        &s,
        "/events",
        &json!({"items": [
            {"summary": "Secret Focus Time (auto)"},
            {"summary": "Vacation #OOO"}
        ]}),
    );
    assert_eq!(out["items"][0]["summary"], "Focus Time (auto)");
    assert_eq!(out["items"][1]["summary"], "#OOO");
}

#[test]
fn redact_regex_matches_strips_every_match() {
    let rules = RuleSet::default().with_endpoint(
        Endpoint::template("/messages").with_transform(Transform::redact_regex_matches(
            ["$.subject"],
            &[r"\d{3}-\d{4}", r"(?i)confidential\s*"],
        )),
    );
    let s = sanitizer(rules);
    let out = sanitized(
        &s,
        "/messages",
        &json!({"subject": "CONFIDENTIAL call 555-1234 or 555-9876"}),
    );
    assert_eq!(out["subject"], "call  or ");
}

#[test]
fn non_string_values_become_null_for_string_transforms() {
    let rules = RuleSet::default().with_endpoint(
        Endpoint::template("/x")
            .with_transform(Transform::redact_except_phrases(["$.a", "$.b", "$.c"], &["ok"])),
    );
    let s = sanitizer(rules);
    let out = sanitized(&s, "/x", &json!({"a": 5, "b": null, "c": "  "}));
    assert_eq!(out, json!({"a": null, "b": null, "c": "  "}));
}

const YAML_RULES: &str = r#"
endpoints:
  - pathTemplate: /messages/{id}
    transforms:
      - method: pseudonymizeEmailHeader
        jsonPaths: ["$.headers[?(@.name in ['From','To','Cc'])].value"]
      - method: filterTokenByRegex
        jsonPaths: ["$.location"]
        filters: ["https://zoom\\.us/\\S+"]
      - method: tokenize
        jsonPaths: ["$.threadId"]
"#;

#[test]
fn yaml_rules_apply_header_filter_and_tokenize() {
    let s = sanitizer(RuleSet::from_yaml(YAML_RULES).unwrap());
    s.validate().unwrap();

    let body = json!({
        "headers": [
            {"name": "From", "value": "Alice <alice@acme.com>"},
            {"name": "To", "value": "bob@acme.com, carol@other.org"},
            {"name": "Cc", "value": "not an address"},
            {"name": "Subject", "value": "hello"}
        ],
        "location": "Room 4 https://zoom.us/j/123 dial-in",
        "threadId": "thread-7"
    });
    let out = sanitized(&s, "/messages/abc", &body);

    let headers = out["headers"].as_array().unwrap();
    assert_eq!(headers[0]["value"].as_array().unwrap().len(), 1);
    assert_eq!(headers[0]["value"][0]["d"], "acme.com");
    assert_eq!(headers[1]["value"].as_array().unwrap().len(), 2);
    assert_eq!(headers[1]["value"][1]["d"], "other.org");
    assert_eq!(headers[2]["value"], Value::Null);
    assert_eq!(headers[3]["value"], "hello");

    assert_eq!(out["location"], "https://zoom.us/j/123");

    let token = out["threadId"].as_str().unwrap();
    assert!(token.starts_with("p~"));
    assert_eq!(s.pseudonymizer().reidentify(token).unwrap(), "thread-7");
}

#[test]
fn filter_with_no_surviving_tokens_yields_null() {
    let rules = RuleSet::from_yaml(YAML_RULES).unwrap();
    let s = sanitizer(rules);
    let out = sanitized(&s, "/messages/1", &json!({"location": "Room 4"}));
    assert_eq!(out["location"], Value::Null);
}

#[test]
fn pseudonymize_array_applies_per_element_and_skips_objects() {
    let rules = RuleSet::default()
        .with_endpoint(Endpoint::template("/x").with_transform(Transform::pseudonymize(["$.ids"])));
    let s = sanitizer(rules);
    let out = sanitized(&s, "/x", &json!({"ids": ["a", {"x": 1}, "b", ["c"]]}));
    assert_eq!(
        out["ids"],
        json!([pseudonym_of(&s, "a"), {"x": 1}, pseudonym_of(&s, "b"), ["c"]])
    );
}

#[test]
fn transforms_run_in_declaration_order_on_one_document() {
    let rules = RuleSet::default().with_endpoint(
        Endpoint::template("/x")
            .with_transform(Transform::pseudonymize(["$.ids"]))
            .with_transform(Transform::redact(["$.ids[1]"])),
    );
    let s = sanitizer(rules);
    let out = sanitized(&s, "/x", &json!({"ids": ["a", "b", "c"]}));
    assert_eq!(out["ids"], json!([pseudonym_of(&s, "a"), pseudonym_of(&s, "c")]));
}

#[test]
fn numbers_are_pseudonymized_from_their_decimal_text() {
    let rules = RuleSet::default()
        .with_endpoint(Endpoint::template("/x").with_transform(Transform::pseudonymize(["$.n"])));
    let s = sanitizer(rules);
    let from_number = sanitized(&s, "/x", &json!({"n": 12345}));
    let from_text = sanitized(&s, "/x", &json!({"n": "12345"}));
    assert_eq!(from_number["n"], from_text["n"]);
    assert_eq!(from_number["n"], pseudonym_of(&s, "12345"));
}

// ---------------------------------------------------------------------------
// Conditional transforms
// ---------------------------------------------------------------------------

fn private_event_rules() -> RuleSet {
    RuleSet::default().with_endpoint(
        Endpoint::template("/events").with_transform(
            Transform::redact(["$.description"])
                .with_apply_only_when("$[?(@.visibility == 'private')]"),
        ),
    )
}

#[test]
fn conditional_transform_applies_when_condition_matches() {
    let s = sanitizer(private_event_rules());
    let out = sanitized(
        &s,
        "/events",
        &json!({"visibility": "private", "description": "dentist"}),
    );
    assert_eq!(out, json!({"visibility": "private"}));
}

#[test]
fn conditional_transform_is_skipped_when_condition_matches_nothing() {
    let s = sanitizer(private_event_rules());
    let body = json!({"visibility": "public", "description": "all hands"});
    assert_eq!(sanitized(&s, "/events", &body), body);

    let without_field = json!({"description": "all hands"});
    assert_eq!(sanitized(&s, "/events", &without_field), without_field);
}

#[test]
fn conditional_transform_from_yaml() {
    let rules = RuleSet::from_yaml(
        r#"
endpoints:
  - pathTemplate: /messages
    transforms:
      - method: redact
        jsonPaths: ["$.body"]
        applyOnlyWhen: "$.labels[?(@.id == 'CONFIDENTIAL')]"
"#,
    )
    .unwrap();
    let s = sanitizer(rules);
    s.validate().unwrap();

    let secret = sanitized(
        &s,
        "/messages",
        &json!({"labels": [{"id": "CONFIDENTIAL"}], "body": "x"}),
    );
    assert_eq!(secret, json!({"labels": [{"id": "CONFIDENTIAL"}]}));

    let open = json!({"labels": [{"id": "INBOX"}], "body": "x"});
    assert_eq!(sanitized(&s, "/messages", &open), open);
}

#[test]
fn invalid_condition_selector_fails_validation() {
    let rules = RuleSet::default().with_endpoint(
        Endpoint::template("/x")
            .with_transform(Transform::redact(["$.a"]).with_apply_only_when("$.b[")),
    );
    assert!(matches!(
        rules.validate(),
        Err(GatewayError::InvalidSelector { .. })
    ));
    assert!(matches!(
        sanitizer(rules).validate(),
        Err(GatewayError::InvalidSelector { .. })
    ));
}

// ---------------------------------------------------------------------------
// Bodies and errors
// ---------------------------------------------------------------------------

#[test]
fn empty_body_is_returned_unchanged() {
    let s = sanitizer(users_rules());
    let outcome = s.sanitize_url("GET", "/users", "").unwrap();
    assert_eq!(outcome, SanitizeOutcome::Sanitized(String::new()));
}

#[test]
fn malformed_json_is_an_error() {
    let s = sanitizer(users_rules());
    let result = s.sanitize_url("GET", "/users", "{not json");
    assert!(matches!(result, Err(GatewayError::Json(_))));
}

#[test]
fn invalid_rules_fail_validation_and_sanitize() {
    let rules = RuleSet::default().with_endpoint(
        Endpoint::template("/x")
            .with_transform(Transform::redact_regex_matches(["$.a"], &["(unclosed"])),
    );
    let s = sanitizer(rules);
    assert!(matches!(s.validate(), Err(GatewayError::InvalidPattern { .. })));
    assert!(s.sanitize_url("GET", "/x", "{}").is_err());
}

#[test]
fn reversible_rules_without_key_fail_validation() {
    let keyless = || {
        Pseudonymizer::new("salt", None, CipherSuite::Gcm, PseudonymizerOptions::default())
    };
    let rules = RuleSet::from_yaml(YAML_RULES).unwrap();
    let s = Sanitizer::new(rules, keyless());
    assert!(matches!(s.validate(), Err(GatewayError::MissingKey)));

    let s = Sanitizer::new(users_rules(), keyless());
    s.validate().unwrap();
}

#[test]
fn reversible_rules_fail_validation_under_legacy_pseudonyms() {
    let legacy = Pseudonymizer::new(
        "salt",
        Some(SecretKey::from_bytes(&[9u8; 32]).unwrap()),
        CipherSuite::Gcm,
        PseudonymizerOptions {
            implementation: PseudonymImplementation::Legacy,
            ..Default::default()
        },
    );
    let rules = RuleSet::default().with_endpoint(
        Endpoint::template("/users")
            .with_transform(Transform::pseudonymize_reversibly(["$.id"])),
    );
    let s = Sanitizer::new(rules, legacy);
    assert!(matches!(
        s.validate(),
        Err(GatewayError::InvalidPseudonym { .. })
    ));
}

#[test]
fn bad_selector_fails_validation() {
    let rules = RuleSet::default()
        .with_endpoint(Endpoint::template("/x").with_transform(Transform::redact(["$.a["])));
    assert!(matches!(
        rules.validate(),
        Err(GatewayError::InvalidSelector { .. })
    ));
}

#[test]
fn concurrent_sanitizing_shares_compiled_rules() {
    let s = Arc::new(sanitizer(users_rules()));
    let body = json!({"email": "alice@acme.com", "phone": "1"}).to_string();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let s = Arc::clone(&s);
            let body = body.clone();
            std::thread::spawn(move || {
                s.sanitize_url("GET", "/users?limit=1", &body)
                    .unwrap()
                    .into_body()
                    .unwrap()
            })
        })
        .collect();

    let outputs: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert!(outputs.windows(2).all(|pair| pair[0] == pair[1]));
    assert!(!outputs[0].contains("alice"));
}
