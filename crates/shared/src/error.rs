//! Shared error types including RFC7807 Problem Details.

use serde::{Deserialize, Serialize};

/// Errors raised while decoding or validating protocol values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("unknown namespace '{0}'")]
    UnknownNamespace(String),
    #[error("malformed frame: {0}")]
    Malformed(String),
}

/// RFC7807 Problem Details (application/problem+json)
///
/// Returned by the relay server's HTTP endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProblemDetails {
    /// A URI reference that identifies the problem type.
    #[serde(rename = "type")]
    pub type_url: String,
    /// A short, human-readable summary of the problem type.
    pub title: String,
    /// HTTP status code.
    pub status: u16,
    /// Human-readable explanation specific to this occurrence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ProblemDetails {
    fn new(slug: &str, title: &str, status: u16, detail: impl Into<String>) -> Self {
        Self {
            type_url: format!("https://bms.dev/problems/{}", slug),
            title: title.to_string(),
            status,
            detail: Some(detail.into()),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new("bad-request", "Bad Request", 400, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new("unauthorized", "Unauthorized", 401, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new("not-found", "Not Found", 404, detail)
    }
}

/// Pull a user-facing message out of a problem+json body.
/// Prefers `detail`, falls back to `title`.
pub fn try_problem_detail(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ProblemDetails>(body).ok()?;
    parsed
        .detail
        .filter(|d| !d.trim().is_empty())
        .or_else(|| Some(parsed.title).filter(|t| !t.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_detail_prefers_detail_then_title() {
        let body = serde_json::to_string(&ProblemDetails::not_found("room gone")).unwrap();
        assert_eq!(try_problem_detail(&body).as_deref(), Some("room gone"));

        let blank = r#"{"type":"https://bms.dev/problems/x","title":"Bad Request","status":400,"detail":"  "}"#;
        assert_eq!(try_problem_detail(blank).as_deref(), Some("Bad Request"));

        assert_eq!(try_problem_detail("<html>502</html>"), None);
    }
}
