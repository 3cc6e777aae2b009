//! Abstract endpoint descriptors
//!
//! An [`Endpoint`] describes one API call: where it goes, how it is sent and
//! which connection details it needs. The response payload type is carried
//! as a phantom parameter so the controller can decode without the caller
//! repeating it.

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{ClientError, ClientResult};
use crate::impl_wire_name_conversions;

/// HTTP methods used by the chat API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl_wire_name_conversions!(HttpMethod {
    Get => "GET",
    Post => "POST",
    Patch => "PATCH",
    Delete => "DELETE",
});

impl HttpMethod {
    /// Whether the endpoint body travels as an HTTP body.
    ///
    /// GET and DELETE fold their body into query items instead.
    pub fn carries_body(self) -> bool {
        matches!(self, Self::Post | Self::Patch)
    }
}

/// Immutable description of one API call
///
/// `R` is the payload type the response body decodes into.
pub struct Endpoint<R> {
    pub path: String,
    pub method: HttpMethod,
    pub query_items: Option<Value>,
    pub body: Option<Value>,
    pub requires_token: bool,
    pub requires_connection_id: bool,
    _response: PhantomData<fn() -> R>,
}

impl<R> Endpoint<R> {
    /// Create an endpoint that requires a token but no connection id.
    pub fn new(path: impl Into<String>, method: HttpMethod) -> Self {
        Self {
            path: path.into(),
            method,
            query_items: None,
            body: None,
            requires_token: true,
            requires_connection_id: false,
            _response: PhantomData,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(path, HttpMethod::Get)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(path, HttpMethod::Post)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(path, HttpMethod::Patch)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(path, HttpMethod::Delete)
    }

    /// Attach query items serialized from `query`.
    ///
    /// # Errors
    /// Returns `ClientError::Encoding` if `query` cannot be serialized.
    pub fn with_query<Q: Serialize + ?Sized>(mut self, query: &Q) -> ClientResult<Self> {
        self.query_items = Some(to_json(query)?);
        Ok(self)
    }

    /// Attach a body serialized from `body`.
    ///
    /// # Errors
    /// Returns `ClientError::Encoding` if `body` cannot be serialized.
    pub fn with_body<B: Serialize + ?Sized>(mut self, body: &B) -> ClientResult<Self> {
        self.body = Some(to_json(body)?);
        Ok(self)
    }

    pub fn requiring_token(mut self, requires_token: bool) -> Self {
        self.requires_token = requires_token;
        self
    }

    pub fn requiring_connection_id(mut self, requires_connection_id: bool) -> Self {
        self.requires_connection_id = requires_connection_id;
        self
    }

    /// Type tag of the expected response, handed to the offline queue.
    pub fn response_type(&self) -> &'static str {
        std::any::type_name::<R>()
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> ClientResult<Value> {
    serde_json::to_value(value).map_err(|e| ClientError::Encoding(e.to_string()))
}

impl<R> Clone for Endpoint<R> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            method: self.method,
            query_items: self.query_items.clone(),
            body: self.body.clone(),
            requires_token: self.requires_token,
            requires_connection_id: self.requires_connection_id,
            _response: PhantomData,
        }
    }
}

impl<R> fmt::Debug for Endpoint<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("path", &self.path)
            .field("method", &self.method)
            .field("query_items", &self.query_items)
            .field("body", &self.body)
            .field("requires_token", &self.requires_token)
            .field("requires_connection_id", &self.requires_connection_id)
            .field("response_type", &self.response_type())
            .finish()
    }
}

impl<R> PartialEq for Endpoint<R> {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
            && self.method == other.method
            && self.query_items == other.query_items
            && self.body == other.body
            && self.requires_token == other.requires_token
            && self.requires_connection_id == other.requires_connection_id
    }
}
