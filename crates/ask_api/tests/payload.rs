use ask_api::{AskApiError, AskRequest};
use serde_json::json;

#[test]
fn payload_uses_camel_case_session_id() {
    let body = serde_json::to_value(AskRequest::new("why?", "s-1")).expect("serialize payload");
    assert_eq!(body, json!({"question": "why?", "sessionId": "s-1"}));
}

#[test]
fn payload_validation_rejects_blank_fields() {
    assert!(AskRequest::new("why?", "s-1").validate().is_ok());
    assert!(matches!(
        AskRequest::new("  \n", "s-1").validate(),
        Err(AskApiError::InvalidRequest(_))
    ));
    assert!(matches!(
        AskRequest::new("why?", "").validate(),
        Err(AskApiError::InvalidRequest(_))
    ));
}
