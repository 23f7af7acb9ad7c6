//! Status-driven classification of transport results.
//!
//! # Design
//! The classifier is uniform across routes: it looks only at the status
//! code (or the absence of a response). Whether a 404 is a normal "absent"
//! answer or a hard failure is decided by the calling operation.
//!
//! For failure statuses a bounded prefix of the body is read to produce a
//! diagnostic message. ATC answers errors with `{"errors": [...]}`; anything
//! else is kept as trimmed text.

use serde::Deserialize;

use crate::http::HttpResponse;
use crate::transport::TransportError;

/// Upper bound on how much of an error body is read for diagnostics.
pub const MAX_MESSAGE_BYTES: usize = 4096;

/// Result of classifying one round trip.
#[derive(Debug)]
pub enum Outcome {
    Success(HttpResponse),
    NotFound,
    Forbidden { message: Option<String> },
    UnexpectedStatus { status: u16, message: Option<String> },
    Transport(TransportError),
}

/// Status class, before any body is looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    NotFound,
    Forbidden,
    Unexpected,
}

pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        404 => StatusClass::NotFound,
        403 => StatusClass::Forbidden,
        _ => StatusClass::Unexpected,
    }
}

pub async fn classify(result: Result<HttpResponse, TransportError>) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(err) => return Outcome::Transport(err),
    };

    match classify_status(response.status) {
        StatusClass::Success => Outcome::Success(response),
        StatusClass::NotFound => Outcome::NotFound,
        StatusClass::Forbidden => Outcome::Forbidden {
            message: error_message(response).await,
        },
        StatusClass::Unexpected => {
            let status = response.status;
            Outcome::UnexpectedStatus {
                status,
                message: error_message(response).await,
            }
        }
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    errors: Vec<String>,
}

async fn error_message(response: HttpResponse) -> Option<String> {
    // A body that fails mid-read still leaves the status as the diagnosis.
    let bytes = response.body.read_prefix(MAX_MESSAGE_BYTES).await.ok()?;
    message_from_body(&bytes)
}

/// Extracts a human-readable message from an error body.
pub fn message_from_body(bytes: &[u8]) -> Option<String> {
    if let Ok(envelope) = serde_json::from_slice::<ErrorEnvelope>(bytes) {
        if !envelope.errors.is_empty() {
            return Some(envelope.errors.join("; "));
        }
    }
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{Headers, ResponseBody};

    fn response(status: u16, body: &'static str) -> HttpResponse {
        HttpResponse::new(status, Headers::new(), ResponseBody::from_bytes(body))
    }

    #[test]
    fn every_2xx_is_success() {
        for status in 200..300 {
            assert_eq!(classify_status(status), StatusClass::Success, "{status}");
        }
    }

    #[test]
    fn other_statuses_are_unexpected() {
        for status in [100, 301, 304, 400, 401, 409, 422, 500, 502, 503] {
            assert_eq!(classify_status(status), StatusClass::Unexpected, "{status}");
        }
    }

    #[tokio::test]
    async fn success_keeps_the_response() {
        match classify(Ok(response(201, r#"{"id":1}"#))).await {
            Outcome::Success(resp) => assert_eq!(resp.status, 201),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn not_found_and_forbidden_are_distinct() {
        assert!(matches!(classify(Ok(response(404, ""))).await, Outcome::NotFound));
        assert!(matches!(
            classify(Ok(response(403, "not allowed"))).await,
            Outcome::Forbidden { message: Some(ref m) } if m == "not allowed"
        ));
    }

    #[tokio::test]
    async fn unexpected_status_keeps_code_and_errors() {
        let outcome = classify(Ok(response(500, r#"{"errors":["db down","retry later"]}"#))).await;
        match outcome {
            Outcome::UnexpectedStatus { status, message } => {
                assert_eq!(status, 500);
                assert_eq!(message.as_deref(), Some("db down; retry later"));
            }
            other => panic!("expected unexpected status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn transport_failure_is_never_a_status() {
        let outcome = classify(Err(TransportError::Connect("refused".into()))).await;
        assert!(matches!(outcome, Outcome::Transport(TransportError::Connect(_))));
    }

    #[test]
    fn message_falls_back_to_text() {
        assert_eq!(message_from_body(b"  bad plan\n").as_deref(), Some("bad plan"));
        assert_eq!(message_from_body(br#"{"errors":[]}"#).as_deref(), Some(r#"{"errors":[]}"#));
        assert_eq!(message_from_body(b"   "), None);
    }
}
