//! Framework-neutral view of an inbound request
//!
//! The security stages never touch axum types directly. The HTTP adapter in
//! [`crate::pipeline`] converts an incoming request into a [`SecurityRequest`],
//! and the stages read and rewrite it in place.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::net::IpAddr;

use crate::audit::ActorKind;

/// Authenticated caller, produced by an external authentication layer and
/// inserted into request extensions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: String,
    pub kind: ActorKind,
    /// Human-facing identifier (username, service name)
    pub identifier: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Principal {
    pub fn user(id: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ActorKind::User,
            identifier: identifier.into(),
            roles: Vec::new(),
        }
    }

    pub fn service(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            identifier: id.clone(),
            id,
            kind: ActorKind::Service,
            roles: Vec::new(),
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }
}

/// Request state flowing through the security stages
#[derive(Debug, Clone)]
pub struct SecurityRequest {
    pub method: Method,
    pub path: String,
    /// Value of the `Origin` header, if any
    pub origin: Option<String>,
    pub headers: HeaderMap,
    /// Query parameters; repeated names are collected into arrays
    pub query: Value,
    pub path_params: Value,
    /// Decoded request body (`Null` when there is none)
    pub body: Value,
    pub client_ip: Option<IpAddr>,
    pub principal: Option<Principal>,
}

impl SecurityRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            origin: None,
            headers: HeaderMap::new(),
            query: Value::Object(Map::new()),
            path_params: Value::Object(Map::new()),
            body: Value::Null,
            client_ip: None,
            principal: None,
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        let origin = origin.into();
        if let Ok(value) = HeaderValue::from_str(&origin) {
            self.headers.insert(header::ORIGIN, value);
        }
        self.origin = Some(origin);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        if name == header::ORIGIN {
            self.origin = value.to_str().ok().map(str::to_string);
        }
        self.headers.append(name, value);
        self
    }

    /// Parse a raw (still percent-encoded) query string
    pub fn with_query_string(mut self, raw: &str) -> Self {
        self.query = query_to_value(raw);
        self
    }

    pub fn with_path_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        if let Value::Object(map) = &mut self.path_params {
            map.insert(name.into(), Value::String(value.into()));
        }
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_principal(mut self, principal: Principal) -> Self {
        self.principal = Some(principal);
        self
    }

    /// Preflight marker: `OPTIONS` carrying `Access-Control-Request-Method`
    pub fn is_preflight(&self) -> bool {
        self.method == Method::OPTIONS
            && self
                .headers
                .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
    }
}

/// Decode `a=1&b=2&a=3` into `{"a": ["1", "3"], "b": "2"}`
pub fn query_to_value(raw: &str) -> Value {
    let mut map = Map::new();
    for (key, value) in url::form_urlencoded::parse(raw.as_bytes()) {
        let value = Value::String(value.into_owned());
        match map.get_mut(key.as_ref()) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                map.insert(key.into_owned(), value);
            }
        }
    }
    Value::Object(map)
}

/// Re-encode a query object; arrays become repeated parameters
pub fn value_to_query(query: &Value) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    if let Value::Object(map) = query {
        for (key, value) in map {
            match value {
                Value::Array(items) => {
                    for item in items {
                        serializer.append_pair(key, &scalar_to_string(item));
                    }
                }
                other => {
                    serializer.append_pair(key, &scalar_to_string(other));
                }
            }
        }
    }
    serializer.finish()
}

fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Sanitized copies of every input channel, inserted into request
/// extensions for handlers that want them directly
///
/// The body and query string are rewritten in place before the handler
/// runs, so `Json`, `Form` and `Query` extractors already see cleaned
/// values. The path is not rewritten: axum's `Path` extractor still
/// yields the raw, percent-decoded segments. Read `path_params` from this
/// extension to get the sanitized ones.
#[derive(Debug, Clone, Default)]
pub struct SanitizedInput {
    pub body: Value,
    pub query: Value,
    pub path_params: Value,
}
