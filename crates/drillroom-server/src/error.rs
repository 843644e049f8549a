use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use drillroom_core::SessionError;
use serde::de::DeserializeOwned;
use serde_json::json;

/// Error body shared by every route: `{ok: false, error: <code>}` plus an
/// optional human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str) -> Self {
        Self {
            status,
            code,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn missing_session_id() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "missing_session_id")
    }

    pub fn invalid_json(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_json").with_detail(detail)
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        let status = match &err {
            SessionError::NotFound(_) => StatusCode::NOT_FOUND,
            SessionError::Ended(_) => StatusCode::CONFLICT,
            SessionError::MissingCode | SessionError::Rejected(_) => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.code()).with_detail(err.to_string())
    }
}

impl From<BytesRejection> for ApiError {
    fn from(rejection: BytesRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::new(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large")
        } else {
            Self::invalid_json(rejection.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({ "ok": false, "error": self.code });
        if let Some(detail) = self.detail {
            body["detail"] = detail.into();
        }
        (self.status, Json(body)).into_response()
    }
}

/// Decodes a JSON request body. An empty body reads as `T::default()`.
pub fn parse_body<T>(body: Result<Bytes, BytesRejection>) -> Result<T, ApiError>
where
    T: DeserializeOwned + Default,
{
    let bytes = body?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| ApiError::invalid_json(e.to_string()))
}

/// Trimmed, non-empty session id or `missing_session_id`.
pub fn require_session_id(session_id: Option<&str>) -> Result<&str, ApiError> {
    session_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(ApiError::missing_session_id)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Probe {
        session_id: Option<String>,
    }

    #[test]
    fn session_errors_map_to_status() {
        let err = ApiError::from(SessionError::NotFound("s1".into()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.code, "session_not_found");
        assert_eq!(ApiError::from(SessionError::Ended("s1".into())).status, StatusCode::CONFLICT);
        assert_eq!(ApiError::from(SessionError::MissingCode).code, "missing_code");
        assert_eq!(
            ApiError::from(SessionError::Rejected("unknown event type: x".into())).code,
            "invalid_event"
        );
    }

    #[test]
    fn empty_body_reads_as_default() {
        let probe: Probe = parse_body(Ok(Bytes::from_static(b"  \n"))).unwrap();
        assert_eq!(probe, Probe::default());
        let probe: Probe = parse_body(Ok(Bytes::from_static(br#"{"session_id":"s1"}"#))).unwrap();
        assert_eq!(probe.session_id.as_deref(), Some("s1"));
        let err = parse_body::<Probe>(Ok(Bytes::from_static(b"{nope"))).unwrap_err();
        assert_eq!(err.code, "invalid_json");
    }

    #[test]
    fn session_id_is_required() {
        assert_eq!(require_session_id(Some(" s1 ")).unwrap(), "s1");
        assert_eq!(require_session_id(Some("  ")).unwrap_err().code, "missing_session_id");
        assert_eq!(require_session_id(None).unwrap_err().code, "missing_session_id");
    }
}
