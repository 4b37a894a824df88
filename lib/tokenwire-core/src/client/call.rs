use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use http::header::{ACCEPT, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use reqwest::{Body, Request};
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use super::auth::bearer_header;
use super::oauth2::Token;
use super::{ApiError, CallQuery, CallResult, RestClient, error_message};

const X_USER_AGENT: HeaderName = HeaderName::from_static("x-user-agent");
const JSON: &str = "application/json";
const FORM: &str = "application/x-www-form-urlencoded";
const TEXT: &str = "text/plain; charset=utf-8";

#[derive(Debug, Clone)]
struct CallBody {
    content_type: HeaderValue,
    data: Vec<u8>,
}

/// Where a call stands with respect to the single token refresh it may perform.
///
/// There is no transition out of `Refreshed`: a call refreshes at most once and
/// is sent at most twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    /// Sent with the token found in the store.
    Initial,
    /// Sent with a token refreshed on behalf of this call.
    Refreshed,
}

/// A request under construction, sent when awaited.
///
/// ```rust,no_run
/// # use tokenwire_core::RestClient;
/// # use serde::Deserialize;
/// # #[derive(Deserialize)]
/// # struct CallLog { records: Vec<serde_json::Value> }
/// # async fn example(client: RestClient) -> Result<(), tokenwire_core::ApiError> {
/// let log: CallLog = client
///     .get("/restapi/v1.0/account/~/call-log")
///     .with_query(&[("perPage", 100)])?
///     .await?
///     .as_json()?;
/// # Ok(())
/// # }
/// ```
///
/// A `401` answer triggers exactly one coalesced token refresh followed by
/// exactly one retry; a second `401` yields [`ApiError::Unauthorized`].
#[derive(derive_more::Debug)]
pub struct ApiCall {
    #[debug(skip)]
    client: RestClient,
    method: Method,
    path: String,
    query: CallQuery,
    headers: HeaderMap,
    #[debug(ignore)]
    body: Option<CallBody>,
    timeout: Option<Duration>,
}

impl ApiCall {
    pub(super) fn build(client: RestClient, method: Method, path: impl Into<String>) -> Self {
        let timeout = client.timeout;
        Self {
            client,
            method,
            path: path.into(),
            query: CallQuery::default(),
            headers: HeaderMap::new(),
            body: None,
            timeout,
        }
    }

    /// Appends query parameters from a value serializing to an object or a list of pairs.
    ///
    /// # Errors
    ///
    /// Fails when the value cannot be encoded as query parameters.
    pub fn with_query<T>(mut self, query: &T) -> Result<Self, ApiError>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(query)?;
        let query = match value {
            serde_json::Value::Array(pairs) => pairs_to_query(pairs)?,
            value => CallQuery::from_serialize(&value)?,
        };
        self.query.extend(query);
        Ok(self)
    }

    /// Appends prepared query parameters.
    #[must_use]
    pub fn with_call_query(mut self, query: CallQuery) -> Self {
        self.query.extend(query);
        self
    }

    /// Adds a request header.
    ///
    /// # Errors
    ///
    /// Fails when the name or the value is not a valid header.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, ApiError> {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.headers.insert(name, value);
        Ok(self)
    }

    /// Overrides the client timeout for this call.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets a JSON body.
    ///
    /// # Errors
    ///
    /// Fails when the value cannot be serialized.
    pub fn json<T>(mut self, body: &T) -> Result<Self, ApiError>
    where
        T: Serialize + ?Sized,
    {
        self.body = Some(CallBody {
            content_type: HeaderValue::from_static(JSON),
            data: serde_json::to_vec(body)?,
        });
        Ok(self)
    }

    /// Sets a form-encoded body.
    ///
    /// # Errors
    ///
    /// Fails when the value cannot be form-encoded.
    pub fn form<T>(mut self, body: &T) -> Result<Self, ApiError>
    where
        T: Serialize + ?Sized,
    {
        self.body = Some(CallBody {
            content_type: HeaderValue::from_static(FORM),
            data: serde_urlencoded::to_string(body)?.into_bytes(),
        });
        Ok(self)
    }

    /// Sets a plain text body.
    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.body = Some(CallBody {
            content_type: HeaderValue::from_static(TEXT),
            data: text.into().into_bytes(),
        });
        self
    }

    async fn exchange(self) -> Result<CallResult, ApiError> {
        let url = self.client.build_url(&self.path, &self.query)?;
        let auth = self.client.auth();

        let Some(mut token) = auth.current_token() else {
            return Err(ApiError::NotAuthorized);
        };

        let mut attempt = Attempt::Initial;
        let mut early_failure = None;
        if token.can_refresh() && token.is_expired() {
            debug!("access token expired, refreshing before sending");
            token = auth.refresh_stale(&token).await?;
            attempt = Attempt::Refreshed;
        } else if token.can_refresh() && token.expires_within(auth.config().refresh_threshold) {
            // still valid, so a failed early refresh does not fail the call
            match auth.refresh_stale(&token).await {
                Ok(fresh) => {
                    debug!("access token about to expire, refreshed before sending");
                    token = fresh;
                    attempt = Attempt::Refreshed;
                }
                Err(error) => {
                    warn!(%error, "early token refresh failed, sending current token");
                    early_failure = Some(error);
                }
            }
        }

        let response = self.send(&url, &token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return finish(response).await;
        }

        match attempt {
            Attempt::Refreshed => {
                debug!("access token rejected after refresh");
                Err(ApiError::Unauthorized)
            }
            Attempt::Initial if !token.can_refresh() => {
                debug!("access token rejected and cannot be refreshed");
                Err(ApiError::Unauthorized)
            }
            Attempt::Initial if early_failure.is_some() => {
                debug!("access token rejected after a failed refresh");
                Err(early_failure.map_or(ApiError::Unauthorized, ApiError::from))
            }
            Attempt::Initial => {
                debug!("access token rejected, refreshing and retrying once");
                let token = auth.refresh_stale(&token).await?;
                let response = self.send(&url, &token).await?;
                if response.status() == StatusCode::UNAUTHORIZED {
                    return Err(ApiError::Unauthorized);
                }
                finish(response).await
            }
        }
    }

    async fn send(&self, url: &Url, token: &Arc<Token>) -> Result<reqwest::Response, ApiError> {
        let request = self.build_request(url, token)?;

        debug!(method = %request.method(), url = %request.url(), "sending...");
        let response = self.client.http.execute(request).await?;
        debug!(status = %response.status(), "...receiving");
        Ok(response)
    }

    fn build_request(&self, url: &Url, token: &Token) -> Result<Request, ApiError> {
        let mut request = Request::new(self.method.clone(), url.clone());
        let headers = request.headers_mut();

        headers.insert(ACCEPT, HeaderValue::from_static(JSON));
        headers.insert(X_USER_AGENT, self.client.user_agent.clone());
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        let (name, value) = bearer_header(token.access_token())?;
        headers.insert(name, value);

        if let Some(body) = &self.body {
            headers.insert(CONTENT_TYPE, body.content_type.clone());
            *request.body_mut() = Some(Body::from(body.data.clone()));
        }
        if let Some(timeout) = self.timeout {
            *request.timeout_mut() = Some(timeout);
        }

        Ok(request)
    }
}

async fn finish(response: reqwest::Response) -> Result<CallResult, ApiError> {
    let status = response.status();
    if status.is_success() {
        return CallResult::from_response(response).await;
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|err| format!("<unable to read response body: {err}>"));
    Err(ApiError::ServerError {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

fn pairs_to_query(pairs: Vec<serde_json::Value>) -> Result<CallQuery, ApiError> {
    let mut query = CallQuery::new();
    for pair in pairs {
        let serde_json::Value::Array(items) = &pair else {
            return Err(ApiError::UnsupportedQueryParameterValue { value: pair });
        };
        let [serde_json::Value::String(name), value] = items.as_slice() else {
            return Err(ApiError::UnsupportedQueryParameterValue { value: pair });
        };
        query = query.add_param(name.as_str(), value)?;
    }
    Ok(query)
}

/// Implement `IntoFuture` for `ApiCall` to enable direct `.await` syntax.
impl IntoFuture for ApiCall {
    type Output = Result<CallResult, ApiError>;
    type IntoFuture = Pin<Box<dyn Future<Output = Self::Output> + Send>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.exchange())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> RestClient {
        RestClient::builder()
            .with_server_url("https://platform.example.com")
            .expect("valid url")
            .with_client_credentials("id", "secret")
            .with_app("tokenwire-test", "1.0.0")
            .build()
            .expect("valid client")
    }

    #[test]
    fn should_build_request_with_headers_and_body() {
        let call = client()
            .post("/restapi/v1.0/account/~/extension/~/sms")
            .with_header("X-Request-Id", "abc")
            .expect("valid header")
            .json(&serde_json::json!({ "text": "hello" }))
            .expect("valid body")
            .with_timeout(Duration::from_secs(3));
        let url = call
            .client
            .build_url(&call.path, &call.query)
            .expect("valid url");

        let request = call
            .build_request(&url, &Token::new("access"))
            .expect("valid request");

        let headers = request.headers();
        assert_eq!(headers["authorization"], "Bearer access");
        assert_eq!(headers["x-user-agent"], "tokenwire-test/1.0.0");
        assert_eq!(headers["x-request-id"], "abc");
        assert_eq!(headers["content-type"], JSON);
        assert_eq!(request.timeout(), Some(&Duration::from_secs(3)));
        assert_eq!(
            request.url().as_str(),
            "https://platform.example.com/restapi/v1.0/account/~/extension/~/sms"
        );
    }

    #[test]
    fn should_accept_query_pairs() {
        let call = client()
            .get("/restapi/v1.0/account/~/call-log")
            .with_query(&[("view", "Simple"), ("type", "Voice")])
            .expect("valid query")
            .with_query(&serde_json::json!({ "perPage": 10 }))
            .expect("valid query");

        let url = call
            .client
            .build_url(&call.path, &call.query)
            .expect("valid url");
        insta::assert_snapshot!(url, @"https://platform.example.com/restapi/v1.0/account/~/call-log?view=Simple&type=Voice&perPage=10");
    }

    #[test]
    fn should_reject_invalid_header() {
        let result = client().get("/").with_header("bad header", "value");
        assert!(matches!(result, Err(ApiError::InvalidHeaderName(_))));
    }

    #[tokio::test]
    async fn should_not_send_without_token() {
        let result = client().get("/restapi/v1.0/account/~").await;
        assert!(matches!(result, Err(ApiError::NotAuthorized)));
    }
}
