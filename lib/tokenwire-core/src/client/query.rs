//! Query parameter encoding.
//!
//! Parameters come from any `Serialize` value that maps to a JSON object:
//! arrays are repeated as separate parameters, `null` values are skipped and
//! nested objects are rejected.
//!
//! ```rust
//! # use tokenwire_core::CallQuery;
//! # use serde::Serialize;
//! #[derive(Serialize)]
//! #[serde(rename_all = "camelCase")]
//! struct ListQuery {
//!     message_type: Vec<&'static str>,
//!     per_page: u32,
//!     date_from: Option<String>,
//! }
//!
//! let query = CallQuery::from_serialize(&ListQuery {
//!     message_type: vec!["SMS", "Fax"],
//!     per_page: 100,
//!     date_from: None,
//! })?;
//! // messageType=SMS&messageType=Fax&perPage=100
//! # Ok::<(), tokenwire_core::ApiError>(())
//! ```

use serde::Serialize;
use serde_json::Value;

use super::ApiError;

/// Ordered query parameters of a call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallQuery {
    pairs: Vec<(String, String)>,
}

impl CallQuery {
    /// Creates an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a query from a value serializing to a JSON object.
    ///
    /// # Errors
    ///
    /// Fails when the value is not an object or contains nested objects.
    pub fn from_serialize<T>(query: &T) -> Result<Self, ApiError>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(query)?;
        let Value::Object(params) = value else {
            return Err(ApiError::UnsupportedQueryParameterValue { value });
        };

        let mut result = Self::new();
        for (name, value) in &params {
            result.push(name, value)?;
        }
        Ok(result)
    }

    /// Adds a single parameter.
    ///
    /// # Errors
    ///
    /// Fails when the value serializes to an object.
    pub fn add_param<T>(mut self, name: impl Into<String>, value: &T) -> Result<Self, ApiError>
    where
        T: Serialize + ?Sized,
    {
        let value = serde_json::to_value(value)?;
        self.push(&name.into(), &value)?;
        Ok(self)
    }

    /// Appends all parameters of `other`.
    pub fn extend(&mut self, other: Self) {
        self.pairs.extend(other.pairs);
    }

    /// Returns `true` if there are no parameters.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn push(&mut self, name: &str, value: &Value) -> Result<(), ApiError> {
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(item) = scalar_to_string(item)? {
                        self.pairs.push((name.to_string(), item));
                    }
                }
            }
            _ => {
                if let Some(value) = scalar_to_string(value)? {
                    self.pairs.push((name.to_string(), value));
                }
            }
        }
        Ok(())
    }

    pub(super) fn to_query_string(&self) -> Result<String, ApiError> {
        serde_urlencoded::to_string(&self.pairs).map_err(ApiError::from)
    }
}

fn scalar_to_string(value: &Value) -> Result<Option<String>, ApiError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text.clone())),
        Value::Number(number) => Ok(Some(number.to_string())),
        Value::Bool(flag) => Ok(Some(flag.to_string())),
        Value::Array(_) | Value::Object(_) => Err(ApiError::UnsupportedQueryParameterValue {
            value: value.clone(),
        }),
    }
}
