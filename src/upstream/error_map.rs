//! Provider error envelope → `(status, message)`
//!
//! Strapi has shipped more than one error shape over the years, and a proxy
//! in front of it may return HTML or nothing at all. [`map_provider_error`]
//! is total: whatever arrives, the caller gets a status and a message that
//! is safe to show.

use axum::http::StatusCode;
use serde_json::Value;

/// Message used when the provider's error shape is not recognized
pub const DEFAULT_MESSAGE: &str = "Upstream request failed";

/// Message used for provider-side failures, whose text is not forwarded
pub const SERVER_ERROR_MESSAGE: &str = "Upstream service error";

/// Normalize a provider error response.
///
/// `http_status` is the status line the provider answered with and `body`
/// its parsed JSON (`Value::Null` when the body was not JSON).
#[must_use]
pub fn map_provider_error(http_status: StatusCode, body: &Value) -> (StatusCode, String) {
    let envelope_status = envelope_status(body);
    let status = envelope_status
        .or_else(|| error_status(http_status))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_server_error() {
        return (status, SERVER_ERROR_MESSAGE.to_string());
    }

    let message = envelope_message(body).unwrap_or_else(|| DEFAULT_MESSAGE.to_string());
    (status, message)
}

fn error_status(status: StatusCode) -> Option<StatusCode> {
    (status.is_client_error() || status.is_server_error()).then_some(status)
}

fn as_error_status(value: &Value) -> Option<StatusCode> {
    let code = u16::try_from(value.as_u64()?).ok()?;
    StatusCode::from_u16(code).ok().and_then(error_status)
}

/// `error.status` (v4/v5) or top-level `statusCode` (v3)
fn envelope_status(body: &Value) -> Option<StatusCode> {
    body.get("error")
        .and_then(|e| e.get("status"))
        .and_then(as_error_status)
        .or_else(|| body.get("statusCode").and_then(as_error_status))
}

fn envelope_message(body: &Value) -> Option<String> {
    // v4/v5: { "error": { "message": "..." } }
    if let Some(msg) = body
        .get("error")
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
    {
        return non_empty(msg);
    }

    match body.get("message") {
        // v3: { "message": [ { "messages": [ { "message": "..." } ] } ] }
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.get("messages").and_then(Value::as_array))
            .flatten()
            .find_map(|m| m.get("message").and_then(Value::as_str).and_then(non_empty)),
        Some(Value::String(msg)) => non_empty(msg),
        _ => body.get("error").and_then(Value::as_str).and_then(non_empty),
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_v4_invalid_credentials() {
        let body = json!({
            "data": null,
            "error": {
                "status": 400,
                "name": "ValidationError",
                "message": "Invalid identifier or password",
                "details": {}
            }
        });
        assert_eq!(
            map_provider_error(StatusCode::BAD_REQUEST, &body),
            (StatusCode::BAD_REQUEST, "Invalid identifier or password".to_string())
        );
    }

    #[test]
    fn test_v4_unauthorized_me() {
        let body = json!({
            "data": null,
            "error": {
                "status": 401,
                "name": "UnauthorizedError",
                "message": "Missing or invalid credentials",
                "details": {}
            }
        });
        assert_eq!(
            map_provider_error(StatusCode::UNAUTHORIZED, &body),
            (StatusCode::UNAUTHORIZED, "Missing or invalid credentials".to_string())
        );
    }

    #[test]
    fn test_v3_nested_messages() {
        let body = json!({
            "statusCode": 400,
            "error": "Bad Request",
            "message": [{
                "messages": [{ "id": "Auth.form.error.invalid", "message": "Identifier or password invalid." }]
            }],
            "data": [{
                "messages": [{ "id": "Auth.form.error.invalid", "message": "Identifier or password invalid." }]
            }]
        });
        assert_eq!(
            map_provider_error(StatusCode::BAD_REQUEST, &body),
            (StatusCode::BAD_REQUEST, "Identifier or password invalid.".to_string())
        );
    }

    #[test]
    fn test_plain_message() {
        let body = json!({ "message": "Too many requests" });
        assert_eq!(
            map_provider_error(StatusCode::TOO_MANY_REQUESTS, &body),
            (StatusCode::TOO_MANY_REQUESTS, "Too many requests".to_string())
        );
    }

    #[test]
    fn test_envelope_status_wins_over_http_status() {
        let body = json!({ "error": { "status": 403, "message": "Forbidden" } });
        assert_eq!(
            map_provider_error(StatusCode::BAD_REQUEST, &body).0,
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn test_non_json_body_uses_defaults() {
        assert_eq!(
            map_provider_error(StatusCode::NOT_FOUND, &Value::Null),
            (StatusCode::NOT_FOUND, DEFAULT_MESSAGE.to_string())
        );
    }

    #[test]
    fn test_server_errors_are_not_forwarded() {
        let body = json!({ "error": { "status": 500, "message": "relation \"users\" does not exist" } });
        assert_eq!(
            map_provider_error(StatusCode::INTERNAL_SERVER_ERROR, &body),
            (StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_MESSAGE.to_string())
        );
    }

    #[test]
    fn test_nonsense_status_falls_back() {
        let body = json!({ "error": { "status": "teapot", "message": 12 } });
        assert_eq!(
            map_provider_error(StatusCode::OK, &body),
            (StatusCode::INTERNAL_SERVER_ERROR, SERVER_ERROR_MESSAGE.to_string())
        );

        let body = json!({ "error": { "status": 200, "message": "ok?" } });
        assert_eq!(
            map_provider_error(StatusCode::BAD_REQUEST, &body),
            (StatusCode::BAD_REQUEST, "ok?".to_string())
        );
    }

    #[test]
    fn test_empty_message_defaults() {
        let body = json!({ "error": { "status": 400, "message": "   " } });
        assert_eq!(
            map_provider_error(StatusCode::BAD_REQUEST, &body),
            (StatusCode::BAD_REQUEST, DEFAULT_MESSAGE.to_string())
        );
    }
}
