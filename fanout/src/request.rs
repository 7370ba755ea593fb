// Copyright 2026 Fanout contributors

//! Request payloads and decoded responses.
//!
//! A request body is chosen explicitly at the call site with [`Body`]: no
//! body, a form-encoded map, or a JSON value. A [`Response`] holds the status
//! and the already decompressed body; [`Response::content`] evaluates it into
//! [`Content`], raising the appropriate [`Error`] for non-2xx statuses.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use serde_json::Value;

use crate::error::Error;
use crate::host::Host;

/// The status a server uses to signal that it timed out the request.
pub const REQUEST_TIMEOUT: u16 = 408;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_CONTENT_TYPE: &str = "application/json";

/// HTTP request methods understood by the query nodes.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        self.as_str().fmt(fmt)
    }
}

impl std::str::FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "HEAD" => Ok(Method::Head),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            other => Err(Error::Configuration(format!(
                "unsupported method {}",
                other
            ))),
        }
    }
}

/// A request payload.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    /// No body; the request is sent with a zero content length.
    Empty,
    /// A form-encoded map. String values are sent as is, every other value
    /// is sent as its JSON text.
    Form(BTreeMap<String, Value>),
    /// A JSON document.
    Json(Value),
}

impl Body {
    /// Build a form body from name/value pairs.
    pub fn form<I, K, V>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Body::Form(
            fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// The content type header value and the encoded bytes, or `None` for
    /// an empty body.
    pub fn encode(&self) -> Option<(&'static str, Vec<u8>)> {
        match self {
            Body::Empty => None,
            Body::Form(fields) => {
                let mut serializer = url::form_urlencoded::Serializer::new(String::new());
                for (name, value) in fields {
                    match value {
                        Value::String(s) => serializer.append_pair(name, s),
                        other => serializer.append_pair(name, &other.to_string()),
                    };
                }
                Some((FORM_CONTENT_TYPE, serializer.finish().into_bytes()))
            }
            Body::Json(value) => Some((JSON_CONTENT_TYPE, value.to_string().into_bytes())),
        }
    }
}

impl Default for Body {
    fn default() -> Self {
        Body::Empty
    }
}

impl From<Value> for Body {
    fn from(value: Value) -> Self {
        Body::Json(value)
    }
}

/// A decoded response body.
#[derive(Clone, Debug, PartialEq)]
pub enum Content {
    /// The body of a response whose content type is JSON.
    Json(Value),
    /// Any other body, as text.
    Text(String),
}

impl Content {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Content::Json(value) => Some(value),
            Content::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Json(_) => None,
            Content::Text(text) => Some(text),
        }
    }

    pub fn into_json(self) -> Option<Value> {
        match self {
            Content::Json(value) => Some(value),
            Content::Text(_) => None,
        }
    }

    /// An empty text body, or a JSON `null`.
    pub fn is_empty(&self) -> bool {
        match self {
            Content::Json(value) => value.is_null(),
            Content::Text(text) => text.is_empty(),
        }
    }
}

/// A complete response from one host.
#[derive(Clone, Debug)]
pub struct Response {
    pub host: Host,
    pub status: u16,
    pub reason: String,
    pub headers: Vec<(String, String)>,
    /// The body after any gzip content-encoding has been removed.
    pub body: Vec<u8>,
}

impl Response {
    /// The first header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_timeout(&self) -> bool {
        self.status == REQUEST_TIMEOUT
    }

    /// Whether the media type of the body is JSON (`application/json`,
    /// `text/x-json`, `application/problem+json` and so on).
    pub fn is_json(&self) -> bool {
        self.header("content-type")
            .and_then(|ct| ct.split(';').next())
            .map(|media| media.trim().to_ascii_lowercase().ends_with("json"))
            .unwrap_or(false)
    }

    /// Evaluate the response: decode a 2xx body, or return the error the
    /// status stands for.
    pub fn content(&self) -> Result<Content, Error> {
        if self.is_timeout() {
            return Err(Error::Timeout {
                host: self.host.clone(),
            });
        }
        if !self.is_success() {
            return Err(Error::Protocol {
                status: self.status,
                reason: self.reason.clone(),
                body: String::from_utf8_lossy(&self.body).into_owned(),
            });
        }
        if self.is_json() && !self.body.is_empty() {
            serde_json::from_slice(&self.body)
                .map(Content::Json)
                .map_err(|e| Error::connectivity(&self.host, io::ErrorKind::InvalidData, e))
        } else {
            Ok(Content::Text(String::from_utf8_lossy(&self.body).into_owned()))
        }
    }
}

/// Append `params` to `path` as a url-encoded query string, extending any
/// query already present.
pub fn with_query<I, K, V>(path: &str, params: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    let query = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    if query.is_empty() {
        path.to_string()
    } else if path.contains('?') {
        format!("{}&{}", path, query)
    } else {
        format!("{}?{}", path, query)
    }
}
