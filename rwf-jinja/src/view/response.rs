//! The boundary with the HTTP layer.
//!
//! Rendering only needs two things from a request: its method and its
//! URL path. What comes back is a [`Response`] value the HTTP server
//! can write out.
use bytes::Bytes;
use serde::Serialize;

use super::template::{Error, Value};

use std::collections::HashMap;

/// Something that looks like an HTTP request.
pub trait RequestLike: Send + Sync {
    fn method(&self) -> &str {
        "GET"
    }

    /// URL path, e.g. `/users/1`.
    fn path(&self) -> Option<&str>;

    /// Identifies requests without a path.
    fn describe(&self) -> String {
        "unknown".to_string()
    }

    /// The request as seen by templates: `request.method`, `request.url.path`.
    fn to_value(&self) -> Value {
        let mut url = HashMap::new();
        if let Some(path) = self.path() {
            url.insert("path".to_string(), Value::String(path.to_string()));
        }

        Value::Hash(HashMap::from([
            ("method".to_string(), Value::String(self.method().to_string())),
            ("url".to_string(), Value::Hash(url)),
        ]))
    }
}

/// Minimal request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: String,
    path: String,
}

impl Request {
    pub fn new(method: impl ToString, path: impl ToString) -> Self {
        Self {
            method: method.to_string().to_uppercase(),
            path: path.to_string(),
        }
    }

    /// `GET` request for `path`.
    pub fn get(path: impl ToString) -> Self {
        Self::new("GET", path)
    }
}

impl RequestLike for Request {
    fn method(&self) -> &str {
        &self.method
    }

    fn path(&self) -> Option<&str> {
        Some(&self.path)
    }
}

/// HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    code: u16,
    headers: HashMap<String, String>,
    media_type: String,
    body: Bytes,
    template: Option<String>,
    context: HashMap<String, Value>,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    /// Create empty response.
    pub fn new() -> Self {
        Self {
            code: 200,
            headers: HashMap::new(),
            media_type: "text/plain".to_string(),
            body: Bytes::new(),
            template: None,
            context: HashMap::new(),
        }
    }

    /// Create a response with an HTML body.
    ///
    /// # Example
    ///
    /// ```
    /// use rwf_jinja::view::Response;
    ///
    /// let response = Response::new().html("<h1>Hello world</h1>");
    /// assert_eq!(response.media_type(), "text/html");
    /// ```
    pub fn html(mut self, body: impl ToString) -> Self {
        self.body = Bytes::from(body.to_string());
        self.media_type = "text/html".to_string();
        self
    }

    /// Create a response with a JSON body serialized from a Rust type.
    pub fn json(mut self, body: impl Serialize) -> Result<Self, Error> {
        self.body = Bytes::from(serde_json::to_vec(&body)?);
        self.media_type = "application/json".to_string();
        Ok(self)
    }

    /// Set response code.
    pub fn code(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    /// Add a header to the response.
    ///
    /// Header name is lowercased automatically. The value is set as-is.
    pub fn header(mut self, name: impl ToString, value: impl ToString) -> Self {
        self.headers
            .insert(name.to_string().to_lowercase(), value.to_string());
        self
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn with_media_type(mut self, media_type: impl ToString) -> Self {
        self.media_type = media_type.to_string();
        self
    }

    /// Remember which template produced the body, for debugging.
    pub fn with_template(mut self, name: &str, context: HashMap<String, Value>) -> Self {
        self.template = Some(name.to_string());
        self.context = context;
        self
    }

    pub fn status(&self) -> u16 {
        self.code
    }

    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn template(&self) -> Option<&str> {
        self.template.as_deref()
    }

    pub fn context(&self) -> &HashMap<String, Value> {
        &self.context
    }
}
