use serde_json::Value;
use thiserror::Error;

/// Statuses worth retrying on idempotent reads: no response, timeout,
/// rate limiting and the transient 5xx family.
pub const TRANSIENT_STATUSES: [u16; 7] = [0, 408, 429, 500, 502, 503, 504];

/// Maximum length for non-JSON error bodies kept in `details`
const MAX_ERROR_BODY_LENGTH: usize = 500;

const CODE_TIMEOUT: &str = "ECONNABORTED";
const CODE_NETWORK: &str = "ERR_NETWORK";
const CODE_CANCELED: &str = "ERR_CANCELED";
const CODE_BAD_REQUEST: &str = "ERR_BAD_REQUEST";
const CODE_BAD_RESPONSE: &str = "ERR_BAD_RESPONSE";

/// The single failure shape produced by the transport.
///
/// `status` is 0 when no response was received (network failure or
/// cancellation), 408 for a client-side timeout, and the HTTP status
/// otherwise. `details` holds the raw server payload for diagnostics only.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct ApiError {
    status: u16,
    code: Option<String>,
    message: String,
    details: Option<Value>,
}

impl ApiError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            code: None,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// The request was aborted by its caller before a response arrived.
    pub fn cancelled() -> Self {
        Self::new(0, "canceled").with_code(CODE_CANCELED)
    }

    /// The request exceeded the transport's time budget.
    pub fn timeout() -> Self {
        Self::new(408, "Request timeout").with_code(CODE_TIMEOUT)
    }

    /// No response was received (connection refused, DNS failure, reset...).
    pub fn network(cause: impl std::fmt::Display) -> Self {
        Self::new(0, "Network Error")
            .with_code(CODE_NETWORK)
            .with_details(Value::String(cause.to_string()))
    }

    /// A 2xx body that could not be parsed into the expected shape.
    pub fn bad_response(status: u16, cause: impl std::fmt::Display) -> Self {
        Self::new(status, format!("Invalid response body: {}", cause)).with_code(CODE_BAD_RESPONSE)
    }

    /// Build an error from a non-2xx response.
    ///
    /// Structured bodies (`{"code": .., "message": ..}` or FastAPI's
    /// `{"detail": ..}`) supply the code and message; anything else falls back
    /// to a generic message and keeps the text in `details`.
    pub fn from_response(status: u16, body: &str) -> Self {
        let details = if body.trim().is_empty() {
            None
        } else {
            Some(
                serde_json::from_str::<Value>(body)
                    .unwrap_or_else(|_| Value::String(truncate_body(body))),
            )
        };

        let code = details
            .as_ref()
            .and_then(|d| d.get("code"))
            .and_then(code_string)
            .unwrap_or_else(|| default_code(status).to_string());

        let message = details
            .as_ref()
            .and_then(server_message)
            .unwrap_or_else(|| format!("Request failed with status code {}", status));

        Self {
            status,
            code: Some(code),
            message,
            details,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn details(&self) -> Option<&Value> {
        self.details.as_ref()
    }

    /// Failure expected to resolve on retry.
    pub fn is_transient(&self) -> bool {
        TRANSIENT_STATUSES.contains(&self.status)
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == 0 && self.code() == Some(CODE_CANCELED)
    }

    /// 4xx other than timeout and rate limiting: never retried.
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status) && !self.is_transient()
    }
}

/// Truncate a response body to avoid keeping excessive data
fn truncate_body(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        None => body.to_string(),
        Some((cut, _)) => format!("{}... (truncated, {} total bytes)", &body[..cut], body.len()),
    }
}

fn default_code(status: u16) -> &'static str {
    if status >= 500 {
        CODE_BAD_RESPONSE
    } else {
        CODE_BAD_REQUEST
    }
}

fn code_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn server_message(body: &Value) -> Option<String> {
    if let Some(message) = body.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    match body.get("detail")? {
        Value::String(detail) => Some(detail.clone()),
        // FastAPI validation errors: [{"loc": [..], "msg": "..", "type": ".."}]
        Value::Array(items) => items
            .iter()
            .find_map(|item| item.get("msg").and_then(Value::as_str))
            .map(str::to_string),
        _ => None,
    }
}
