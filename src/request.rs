use std::time::SystemTime;

use http::Method;
use url::Url;

use crate::response::{HttpHeaders, HttpVersion};

/// A basic generic type that represents an HTTP request
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP request method
    pub method: Method,
    /// Effective request URI. `Url` parsing performs the normalization the
    /// cache keys rely on: lowercased scheme and host, default port elided,
    /// path and query preserved as received.
    pub url: Url,
    /// HTTP request headers
    pub headers: HttpHeaders,
    /// HTTP request body
    pub body: Vec<u8>,
    /// HTTP request version
    pub version: HttpVersion,
}

impl HttpRequest {
    /// Creates a request with no headers and an empty body
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HttpHeaders::new(),
            body: Vec::new(),
            version: HttpVersion::Http11,
        }
    }

    /// Determines if the request method is either GET or HEAD
    #[must_use]
    pub fn is_method_get_head(&self) -> bool {
        self.method == Method::GET || self.method == Method::HEAD
    }

    /// The cache key for this request, in `METHOD:uri` form.
    ///
    /// `HEAD` shares the key space with `GET`, so a stored `GET` response can
    /// satisfy a later `HEAD`.
    #[must_use]
    pub fn cache_key(&self) -> String {
        if self.is_method_get_head() {
            cache_key_for(&self.url)
        } else {
            format!("{}:{}", self.method, self.url)
        }
    }

    /// Whether the request carries credentials in an `Authorization` header
    #[must_use]
    pub fn has_authorization(&self) -> bool {
        self.headers.contains_key("authorization")
    }

    /// The entity tags of an `If-None-Match` precondition, in order
    #[must_use]
    pub fn if_none_match(&self) -> Vec<String> {
        self.headers
            .comma_values("if-none-match")
            .map(str::to_string)
            .collect()
    }

    /// The parsed `If-Modified-Since` precondition, if well-formed
    #[must_use]
    pub fn if_modified_since(&self) -> Option<SystemTime> {
        self.headers
            .get("if-modified-since")
            .and_then(|d| httpdate::parse_http_date(d).ok())
    }
}

/// The cache key a `GET` for this URI is stored under
#[must_use]
pub fn cache_key_for(url: &Url) -> String {
    format!("GET:{url}")
}
