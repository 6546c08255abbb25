//! Unit tests for `AppError` display format and JSON-RPC code mapping.

use acp_bridge::acp::message::RpcError;
use acp_bridge::errors::{INTERNAL_ERROR, INVALID_PARAMS, RESOURCE_NOT_FOUND};
use acp_bridge::AppError;

#[test]
fn acp_error_display_includes_message() {
    let err = AppError::Acp("stream closed".into());
    assert_eq!(err.to_string(), "acp: stream closed");
}

#[test]
fn error_message_no_trailing_period() {
    let err = AppError::Timeout("no response to session/new".into());
    let s = err.to_string();
    assert!(
        !s.ends_with('.'),
        "error message must not end with a period: {s}"
    );
}

#[test]
fn each_variant_has_a_distinct_prefix() {
    let rendered = [
        AppError::Config("x".into()).to_string(),
        AppError::Acp("x".into()).to_string(),
        AppError::Io("x".into()).to_string(),
        AppError::NotFound("x".into()).to_string(),
        AppError::Timeout("x".into()).to_string(),
        AppError::ConnectionClosed("x".into()).to_string(),
    ];
    for (i, a) in rendered.iter().enumerate() {
        for b in rendered.iter().skip(i + 1) {
            assert_ne!(a, b);
        }
    }
}

#[test]
fn rpc_error_display_carries_code_and_message() {
    let err = AppError::Rpc {
        code: -32000,
        message: "auth required".into(),
    };
    assert_eq!(err.to_string(), "rpc error -32000: auth required");
}

// ── Code mapping ────────────────────────────────────────────────────────────

/// Unknown terminals answer with the resource-not-found code.
#[test]
fn not_found_maps_to_resource_not_found() {
    let err = AppError::NotFound("terminal not found: term_9".into());
    assert_eq!(err.rpc_code(), RESOURCE_NOT_FOUND);
    assert_eq!(RESOURCE_NOT_FOUND, -32002);
}

#[test]
fn protocol_errors_map_to_invalid_params() {
    assert_eq!(AppError::Acp("bad".into()).rpc_code(), INVALID_PARAMS);
}

#[test]
fn local_failures_map_to_internal_error() {
    assert_eq!(AppError::Io("spawn".into()).rpc_code(), INTERNAL_ERROR);
    assert_eq!(AppError::Timeout("t".into()).rpc_code(), INTERNAL_ERROR);
}

/// An agent error keeps its own code when converted back to an error object.
#[test]
fn rpc_error_round_trips_its_code() {
    let err = AppError::Rpc {
        code: -32000,
        message: "auth required".into(),
    };
    let obj = RpcError::from(&err);
    assert_eq!(obj.code, -32000);
    assert_eq!(obj.message, "auth required");
    assert_eq!(AppError::from(obj), err);
}

#[test]
fn only_connection_closed_is_transport() {
    assert!(AppError::ConnectionClosed("eof".into()).is_transport());
    assert!(!AppError::Timeout("t".into()).is_transport());
    assert!(!AppError::Rpc {
        code: -1,
        message: String::new()
    }
    .is_transport());
}

#[test]
fn json_errors_convert_to_acp() {
    let parse: Result<serde_json::Value, _> = serde_json::from_str("{");
    let err: AppError = parse.expect_err("invalid json").into();
    assert!(matches!(err, AppError::Acp(ref msg) if msg.starts_with("json:")));
}

#[test]
fn app_error_implements_std_error_trait() {
    fn assert_error<E: std::error::Error>(_: &E) {}
    assert_error(&AppError::Io("test".into()));
}
