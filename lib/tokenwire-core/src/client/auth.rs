use std::fmt;

use base64::Engine;
use http::HeaderValue;
use reqwest::header::{AUTHORIZATION, HeaderName};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::oauth2::AuthError;

/// Secure wrapper for sensitive string data that automatically zeroes memory on drop.
///
/// Used for client secrets, passwords, and push channel credentials.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecureString(String);

impl SecureString {
    /// Creates a new secure string from the provided value.
    pub fn new(value: String) -> Self {
        Self(value)
    }

    /// Returns a reference to the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the wrapped value is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Masks sensitive data for display/logging purposes.
    fn mask_sensitive(value: &str) -> String {
        let chars: Vec<char> = value.chars().collect();
        if chars.len() <= 8 {
            return "***".to_string();
        }
        let head: String = chars.iter().take(4).collect();
        let tail: String = chars.iter().skip(chars.len() - 4).collect();
        format!("{head}...{tail}")
    }
}

impl fmt::Debug for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureString")
            .field("value", &"[REDACTED]")
            .finish()
    }
}

impl fmt::Display for SecureString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::mask_sensitive(&self.0))
    }
}

impl From<String> for SecureString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SecureString {
    fn from(value: &str) -> Self {
        Self::new(value.to_string())
    }
}

impl Serialize for SecureString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SecureString {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Self::new)
    }
}

/// Application credentials sent to the token endpoint as HTTP Basic authentication.
#[derive(Clone)]
pub struct ClientCredentials {
    client_id: String,
    client_secret: SecureString,
}

impl ClientCredentials {
    /// Creates client credentials.
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<SecureString>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// Returns the client identifier.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Builds the `Authorization: Basic <base64(client_id:client_secret)>` header.
    ///
    /// # Errors
    ///
    /// Fails when the client id contains a colon or the encoded value is not a valid header.
    pub fn to_basic_header(&self) -> Result<(HeaderName, HeaderValue), AuthError> {
        if self.client_id.contains(':') {
            return Err(AuthError::ConfigurationError {
                reason: "client id cannot contain colon (:) character".to_string(),
            });
        }

        let credentials = format!("{}:{}", self.client_id, self.client_secret.as_str());
        let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
        let value = HeaderValue::from_str(&format!("Basic {encoded}")).map_err(|err| {
            AuthError::ConfigurationError {
                reason: format!("invalid client credentials: {err}"),
            }
        })?;
        Ok((AUTHORIZATION, value))
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Builds the `Authorization: Bearer <token>` header for an API call.
pub(crate) fn bearer_header(access_token: &str) -> Result<(HeaderName, HeaderValue), AuthError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {access_token}")).map_err(|err| {
        AuthError::InvalidTokenResponse {
            reason: format!("access token is not a valid header value: {err}"),
        }
    })?;
    value.set_sensitive(true);
    Ok((AUTHORIZATION, value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_build_basic_header() {
        let credentials = ClientCredentials::new("user", "pass");
        let (name, value) = credentials
            .to_basic_header()
            .expect("valid credentials");

        assert_eq!(name, AUTHORIZATION);
        // "user:pass" base64 encoded is "dXNlcjpwYXNz"
        assert_eq!(value, "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn should_reject_client_id_with_colon() {
        let credentials = ClientCredentials::new("user:invalid", "pass");
        let result = credentials.to_basic_header();

        assert!(matches!(
            result,
            Err(AuthError::ConfigurationError { .. })
        ));
    }

    #[test]
    fn should_build_sensitive_bearer_header() {
        let (name, value) = bearer_header("my-token").expect("valid token");

        assert_eq!(name, AUTHORIZATION);
        assert_eq!(value, "Bearer my-token");
        assert!(value.is_sensitive());
    }

    #[test]
    fn should_reject_bearer_with_invalid_characters() {
        let result = bearer_header("\0invalid");
        assert!(result.is_err());
    }

    #[test]
    fn should_mask_secure_string() {
        assert_eq!(SecureString::from("short").to_string(), "***");
        assert_eq!(SecureString::from("12345678").to_string(), "***");
        assert_eq!(SecureString::from("123456789").to_string(), "1234...6789");
    }

    #[test]
    fn should_redact_debug_output() {
        let credentials = ClientCredentials::new("client-id", "super-secret");
        let debug_str = format!("{credentials:?}");

        assert!(debug_str.contains("client-id"));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("super-secret"));
    }
}
