use super::*;
use serde_json::json;

fn invalid_path(err: FrameError) -> String {
    match err {
        FrameError::InvalidFrame { path, .. } => path,
        FrameError::Json(e) => panic!("expected InvalidFrame, got Json({e})"),
    }
}

// =============================================================================
// REQUEST
// =============================================================================

#[test]
fn parse_request_reads_required_fields() {
    let raw = json!({"type": "req", "id": "r-1", "method": "agent.list", "params": {"limit": 5}});
    let Frame::Request(req) = parse_frame(&raw).expect("request should parse") else {
        panic!("expected request frame");
    };
    assert_eq!(req.id, "r-1");
    assert_eq!(req.method, "agent.list");
    assert_eq!(req.params, json!({"limit": 5}));
    assert!(req.extra.is_empty());
}

#[test]
fn parse_request_defaults_missing_params_to_null() {
    let raw = json!({"type": "req", "id": "r-1", "method": "health"});
    let Frame::Request(req) = parse_frame(&raw).expect("request should parse") else {
        panic!("expected request frame");
    };
    assert_eq!(req.params, Value::Null);
}

#[test]
fn parse_request_requires_id_and_method() {
    let err = parse_frame(&json!({"type": "req", "method": "health"})).expect_err("missing id");
    assert_eq!(invalid_path(err), "id");

    let err = parse_frame(&json!({"type": "req", "id": "r-1"})).expect_err("missing method");
    assert_eq!(invalid_path(err), "method");

    let err = parse_frame(&json!({"type": "req", "id": 7, "method": "health"})).expect_err("numeric id");
    assert_eq!(invalid_path(err), "id");
}

// =============================================================================
// RESPONSE
// =============================================================================

#[test]
fn parse_ok_response_carries_payload() {
    let raw = json!({"type": "res", "id": "r-1", "ok": true, "payload": {"status": "ok"}});
    let Frame::Response(res) = parse_frame(&raw).expect("response should parse") else {
        panic!("expected response frame");
    };
    assert_eq!(res.id, "r-1");
    assert!(res.is_ok());
    assert_eq!(res.outcome, ResponseOutcome::Ok(json!({"status": "ok"})));
}

#[test]
fn parse_ok_response_without_payload_is_null() {
    let raw = json!({"type": "res", "id": "r-1", "ok": true});
    let Frame::Response(res) = parse_frame(&raw).expect("response should parse") else {
        panic!("expected response frame");
    };
    assert_eq!(res.outcome, ResponseOutcome::Ok(Value::Null));
}

#[test]
fn parse_error_response_carries_code_and_message() {
    let raw = json!({
        "type": "res",
        "id": "r-2",
        "ok": false,
        "error": {"code": "NOT_FOUND", "message": "no such agent", "retryable": false}
    });
    let Frame::Response(res) = parse_frame(&raw).expect("response should parse") else {
        panic!("expected response frame");
    };
    let ResponseOutcome::Err(err) = res.outcome else {
        panic!("expected error outcome");
    };
    assert_eq!(err.code, "NOT_FOUND");
    assert_eq!(err.message, "no such agent");
    assert_eq!(err.extra.get("retryable"), Some(&json!(false)));
}

#[test]
fn parse_error_response_renders_numeric_code() {
    let raw = json!({"type": "res", "id": "r-2", "ok": false, "error": {"code": 400, "message": "bad"}});
    let Frame::Response(res) = parse_frame(&raw).expect("response should parse") else {
        panic!("expected response frame");
    };
    let ResponseOutcome::Err(err) = res.outcome else {
        panic!("expected error outcome");
    };
    assert_eq!(err.code, "400");
}

#[test]
fn parse_response_rejects_bad_ok_and_error_fields() {
    let err = parse_frame(&json!({"type": "res", "id": "r-1"})).expect_err("missing ok");
    assert_eq!(invalid_path(err), "ok");

    let err = parse_frame(&json!({"type": "res", "id": "r-1", "ok": "yes"})).expect_err("string ok");
    assert_eq!(invalid_path(err), "ok");

    let err = parse_frame(&json!({"type": "res", "id": "r-1", "ok": false})).expect_err("missing error");
    assert_eq!(invalid_path(err), "error");

    let err = parse_frame(&json!({"type": "res", "id": "r-1", "ok": false, "error": {"code": "X"}}))
        .expect_err("missing error message");
    assert_eq!(invalid_path(err), "error.message");

    let err = parse_frame(&json!({"type": "res", "ok": true})).expect_err("missing id");
    assert_eq!(invalid_path(err), "id");
}

// =============================================================================
// EVENT
// =============================================================================

#[test]
fn parse_event_reads_topic_and_payload() {
    let raw = json!({"type": "event", "event": "agent.status", "payload": {"agentId": "a1", "status": "online"}});
    let Frame::Event(ev) = parse_frame(&raw).expect("event should parse") else {
        panic!("expected event frame");
    };
    assert_eq!(ev.event, "agent.status");
    assert_eq!(ev.payload, json!({"agentId": "a1", "status": "online"}));
}

#[test]
fn parse_event_requires_event_and_payload() {
    let err = parse_frame(&json!({"type": "event", "payload": {}})).expect_err("missing event");
    assert_eq!(invalid_path(err), "event");

    let err = parse_frame(&json!({"type": "event", "event": "tick"})).expect_err("missing payload");
    assert_eq!(invalid_path(err), "payload");
}

// =============================================================================
// FORWARD COMPATIBILITY
// =============================================================================

#[test]
fn unknown_fields_are_preserved_on_every_shape() {
    let cases = [
        json!({"type": "req", "id": "r", "method": "m", "params": {}, "trace": {"span": 1}}),
        json!({"type": "res", "id": "r", "ok": true, "payload": {}, "seq": 9}),
        json!({"type": "event", "event": "tick", "payload": {}, "seq": 10, "stateVersion": {"presence": 2}}),
    ];

    for raw in cases {
        let frame = parse_frame(&raw).expect("frame should parse");
        assert_eq!(frame.to_value(), raw, "extra fields must survive a decode/encode pass");
    }
}

#[test]
fn ok_response_keeps_stray_error_field_in_extra() {
    let raw = json!({"type": "res", "id": "r", "ok": true, "payload": 1, "error": "ignored"});
    let Frame::Response(res) = parse_frame(&raw).expect("response should parse") else {
        panic!("expected response frame");
    };
    assert_eq!(res.extra.get("error"), Some(&json!("ignored")));
}

#[test]
fn known_fields_win_over_extra_on_encode() {
    let mut req = RequestFrame::new("r-1", "health", json!({}));
    req.extra.insert("method".into(), json!("spoofed"));
    let encoded = Frame::from(req).to_value();
    assert_eq!(encoded["method"], "health");
    assert_eq!(encoded["type"], "req");
}

// =============================================================================
// REJECTION
// =============================================================================

#[test]
fn non_objects_are_rejected() {
    for raw in [Value::Null, json!("not an object"), json!(42), json!([1, 2])] {
        let err = parse_frame(&raw).expect_err("non-object should fail");
        assert_eq!(invalid_path(err), "$");
    }
}

#[test]
fn missing_or_unknown_type_is_rejected() {
    let err = parse_frame(&json!({"id": "r-1"})).expect_err("missing type");
    assert_eq!(invalid_path(err), "type");

    let err = parse_frame(&json!({"type": "hello-ok"})).expect_err("unknown type");
    assert_eq!(invalid_path(err), "type");

    let err = parse_frame(&json!({"type": 1})).expect_err("numeric type");
    assert_eq!(invalid_path(err), "type");
}

#[test]
fn error_message_names_the_failing_field() {
    let err = parse_frame(&json!({"type": "res", "id": "r-1", "ok": false, "error": {"message": "x"}}))
        .expect_err("missing code");
    assert!(err.to_string().contains("error.code"), "message was: {err}");
}

#[test]
fn decode_frame_reports_invalid_json() {
    let err = decode_frame("{not json").expect_err("should fail");
    assert!(matches!(err, FrameError::Json(_)));
}

#[test]
fn encode_then_decode_text_matches_frame() {
    let frame = Frame::from(ResponseFrame::error("r-9", "TIMEOUT", "gateway busy"));
    let text = encode_frame(&frame);
    assert_eq!(decode_frame(&text).expect("decode"), frame);
}

#[test]
fn serialize_matches_to_value() {
    let frame = Frame::from(EventFrame::new("chat.stream.start", json!({"runId": "x"})));
    let via_serde = serde_json::to_value(&frame).expect("serialize");
    assert_eq!(via_serde, frame.to_value());
}
