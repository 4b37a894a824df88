use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::ApiError;

const BODY_MAX_LENGTH: usize = 1024;

/// Fields holding a human readable error in API and token endpoint error bodies.
const MESSAGE_FIELDS: [&str; 4] = ["message", "error_description", "errorCode", "error"];

/// Successful response of an [`ApiCall`](super::ApiCall).
///
/// The body is fully read before the call completes, so a `CallResult` can be
/// consumed several times.
#[derive(Debug, Clone)]
pub struct CallResult {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
}

impl CallResult {
    pub(super) async fn from_response(response: reqwest::Response) -> Result<Self, ApiError> {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;
        Ok(Self {
            status,
            headers,
            body,
        })
    }

    /// Returns the HTTP status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the `Content-Type` header value, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }

    /// Deserializes the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::JsonError`] naming the path of the field that
    /// could not be deserialized.
    pub fn as_json<T>(&self) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let deserializer = &mut serde_json::Deserializer::from_str(&self.body);
        serde_path_to_error::deserialize(deserializer).map_err(|err| ApiError::JsonError {
            path: err.path().to_string(),
            error: err.into_inner(),
            body: truncate(&self.body),
        })
    }

    /// Returns the raw body.
    pub fn as_text(&self) -> &str {
        &self.body
    }

    /// Discards the body.
    pub fn as_empty(&self) {}

    /// Consumes the result and returns the raw body.
    pub fn into_text(self) -> String {
        self.body
    }
}

/// Extracts the error message of a failed response body.
///
/// JSON bodies are searched for a known message field; other bodies are
/// returned as is, truncated.
pub(crate) fn error_message(body: &str) -> String {
    if let Ok(Value::Object(fields)) = serde_json::from_str::<Value>(body) {
        let message = MESSAGE_FIELDS
            .iter()
            .find_map(|name| fields.get(*name).and_then(Value::as_str));
        if let Some(message) = message {
            return message.to_string();
        }
    }
    truncate(body)
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(BODY_MAX_LENGTH) {
        Some((index, _)) => {
            let head = body.get(..index).unwrap_or_default();
            format!("{head}... (truncated)")
        }
        None => body.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    fn result(body: &str) -> CallResult {
        CallResult {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: body.to_string(),
        }
    }

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Extension {
        id: u64,
        extension_number: String,
    }

    #[test]
    fn should_deserialize_json() {
        let extension: Extension = result(r#"{"id": 42, "extensionNumber": "101"}"#)
            .as_json()
            .expect("valid json");

        assert_eq!(
            extension,
            Extension {
                id: 42,
                extension_number: "101".to_string()
            }
        );
    }

    #[test]
    fn should_report_failing_json_path() {
        let error = result(r#"{"id": 42, "extensionNumber": 101}"#)
            .as_json::<Extension>()
            .expect_err("type mismatch");

        let ApiError::JsonError { path, .. } = error else {
            panic!("expected JsonError, got {error:?}");
        };
        assert_eq!(path, "extensionNumber");
    }

    #[test]
    fn should_keep_raw_text() {
        let result = result("<html>ok</html>");
        assert_eq!(result.as_text(), "<html>ok</html>");
        result.as_empty();
        assert_eq!(result.into_text(), "<html>ok</html>");
    }

    #[test]
    fn should_extract_error_message() {
        assert_eq!(
            error_message(r#"{"errorCode": "CMN-102", "message": "Resource not found"}"#),
            "Resource not found"
        );
        assert_eq!(
            error_message(r#"{"error": "invalid_grant", "error_description": "Token is revoked"}"#),
            "Token is revoked"
        );
        assert_eq!(error_message(r#"{"errorCode": "CMN-102"}"#), "CMN-102");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
    }

    #[test]
    fn should_truncate_long_bodies_on_char_boundary() {
        let body = "é".repeat(BODY_MAX_LENGTH + 10);
        let message = error_message(&body);

        assert!(message.ends_with("... (truncated)"));
        assert_eq!(message.chars().filter(|c| *c == 'é').count(), BODY_MAX_LENGTH);
    }
}
