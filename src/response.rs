use std::{
    collections::HashMap, fmt, str::FromStr, time::SystemTime,
};

use http::{response, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{error::Result, HitOrMiss, XCACHE};

/// Headers that only describe the connection to the next hop and must never
/// travel end to end (RFC 7230 §6.1).
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

const WARNING: &str = "warning";

/// HTTP headers as a lowercased multi-value map.
///
/// Header names are normalized to lowercase per RFC 7230 and each name may
/// carry several values, preserving insertion order per name.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(transparent)]
pub struct HttpHeaders(HashMap<String, Vec<String>>);

impl HttpHeaders {
    /// Creates an empty header map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header, replacing any existing values for that name
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), vec![value.into()]);
    }

    /// Appends a header value, preserving existing values for the same name
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.0
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Retrieves the first value for a given header name
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .get(&name.to_ascii_lowercase())
            .and_then(|vals| vals.first())
            .map(String::as_str)
    }

    /// Iterates over every value stored under a given header name
    pub fn values<'a>(
        &'a self,
        name: &str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.0
            .get(&name.to_ascii_lowercase())
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// All values for a name joined with `", "`, the form a single field line
    /// would carry
    #[must_use]
    pub fn get_joined(&self, name: &str) -> Option<String> {
        let values = self.0.get(&name.to_ascii_lowercase())?;
        if values.is_empty() {
            return None;
        }
        Some(values.join(", "))
    }

    /// Splits every value for a name on commas, the treatment RFC 7230 gives
    /// repeated field lines
    pub fn comma_values<'a>(
        &'a self,
        name: &str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.values(name)
            .flat_map(|v| v.split(','))
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// Removes a header name and all of its values
    pub fn remove(&mut self, name: &str) {
        self.0.remove(&name.to_ascii_lowercase());
    }

    /// Checks if a header name is present
    #[must_use]
    pub fn contains_key(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    /// Iterates over the header map as flattened name/value pairs
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().flat_map(|(name, values)| {
            values.iter().map(move |v| (name.as_str(), v.as_str()))
        })
    }

    /// Iterates over the header map grouped by name
    pub fn entries(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }

    /// Removes hop-by-hop headers, including any field nominated by a
    /// `Connection` header at this hop
    pub fn strip_hop_by_hop(&mut self) {
        let nominated: Vec<String> = self
            .comma_values("connection")
            .map(str::to_ascii_lowercase)
            .collect();
        for name in HOP_BY_HOP_HEADERS {
            self.remove(name);
        }
        for name in nominated {
            self.remove(&name);
        }
    }

    /// Drops 1xx warning values, which must not survive a refresh of the
    /// stored response (RFC 7234 §4.3.4)
    pub fn drop_1xx_warnings(&mut self) {
        if let Some(values) = self.0.get_mut(WARNING) {
            values.retain(|v| {
                v.chars()
                    .take(3)
                    .collect::<String>()
                    .parse::<u16>()
                    .is_ok_and(|code| !(100..200).contains(&code))
            });
            if values.is_empty() {
                self.0.remove(WARNING);
            }
        }
    }

    /// Converts to an `http::HeaderMap`, skipping values that are not valid
    /// header text
    #[must_use]
    pub fn to_header_map(&self) -> http::HeaderMap {
        let mut map = http::HeaderMap::new();
        for (name, value) in self.iter() {
            if let (Ok(name), Ok(value)) = (
                http::header::HeaderName::from_str(name),
                HeaderValue::from_str(value),
            ) {
                map.append(name, value);
            }
        }
        map
    }
}

impl From<&http::HeaderMap> for HttpHeaders {
    fn from(headers: &http::HeaderMap) -> Self {
        let mut converted = Self::new();
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                converted.append(name.as_str(), value);
            }
        }
        converted
    }
}

/// Represents an HTTP version
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[non_exhaustive]
pub enum HttpVersion {
    /// HTTP Version 0.9
    #[serde(rename = "HTTP/0.9")]
    Http09,
    /// HTTP Version 1.0
    #[serde(rename = "HTTP/1.0")]
    Http10,
    /// HTTP Version 1.1
    #[serde(rename = "HTTP/1.1")]
    Http11,
    /// HTTP Version 2.0
    #[serde(rename = "HTTP/2.0")]
    H2,
    /// HTTP Version 3.0
    #[serde(rename = "HTTP/3.0")]
    H3,
}

impl fmt::Display for HttpVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            HttpVersion::Http09 => write!(f, "HTTP/0.9"),
            HttpVersion::Http10 => write!(f, "HTTP/1.0"),
            HttpVersion::Http11 => write!(f, "HTTP/1.1"),
            HttpVersion::H2 => write!(f, "HTTP/2.0"),
            HttpVersion::H3 => write!(f, "HTTP/3.0"),
        }
    }
}

impl TryFrom<http::Version> for HttpVersion {
    type Error = crate::CacheError;

    fn try_from(value: http::Version) -> Result<Self> {
        Ok(match value {
            http::Version::HTTP_09 => Self::Http09,
            http::Version::HTTP_10 => Self::Http10,
            http::Version::HTTP_11 => Self::Http11,
            http::Version::HTTP_2 => Self::H2,
            http::Version::HTTP_3 => Self::H3,
            _ => return Err(crate::CacheError::BadVersion),
        })
    }
}

impl From<HttpVersion> for http::Version {
    fn from(value: HttpVersion) -> Self {
        match value {
            HttpVersion::Http09 => Self::HTTP_09,
            HttpVersion::Http10 => Self::HTTP_10,
            HttpVersion::Http11 => Self::HTTP_11,
            HttpVersion::H2 => Self::HTTP_2,
            HttpVersion::H3 => Self::HTTP_3,
        }
    }
}

/// A basic generic type that represents an HTTP response
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpResponse {
    /// HTTP response body
    pub body: Vec<u8>,
    /// HTTP response headers
    pub headers: HttpHeaders,
    /// HTTP response status code
    pub status: u16,
    /// HTTP response url
    pub url: Url,
    /// HTTP response version
    pub version: HttpVersion,
}

impl HttpResponse {
    /// Returns `http::response::Parts`
    pub fn parts(&self) -> Result<response::Parts> {
        let mut converted =
            response::Builder::new().status(self.status).body(())?;
        *converted.headers_mut() = self.headers.to_header_map();
        Ok(converted.into_parts().0)
    }

    /// Returns the code of the first warning header value if present
    #[must_use]
    pub fn warning_code(&self) -> Option<u16> {
        self.headers.get("warning").and_then(|hdr| {
            hdr.chars().take(3).collect::<String>().parse().ok()
        })
    }

    /// Appends a warning header value in the `warn-code SP warn-agent SP
    /// warn-text` form
    pub fn add_warning(&mut self, code: u16, message: &str) {
        self.headers.append(WARNING, format!("{code} - \"{message}\""));
    }

    /// Replaces the `Age` header with the current age in whole seconds
    pub fn set_age(&mut self, seconds: u64) {
        self.headers.insert("age", seconds.to_string());
    }

    /// Adds the custom `x-cache` header to the response
    pub fn cache_status(&mut self, hit_or_miss: HitOrMiss) {
        self.headers.insert(XCACHE, hit_or_miss.to_string());
    }

    /// The parsed `Date` header, if present and well-formed
    #[must_use]
    pub fn date(&self) -> Option<SystemTime> {
        self.headers.get("date").and_then(|d| httpdate::parse_http_date(d).ok())
    }

    /// The parsed `Last-Modified` header, if present and well-formed
    #[must_use]
    pub fn last_modified(&self) -> Option<SystemTime> {
        self.headers
            .get("last-modified")
            .and_then(|d| httpdate::parse_http_date(d).ok())
    }

    /// The entity tag for this representation, if any
    #[must_use]
    pub fn etag(&self) -> Option<&str> {
        self.headers.get("etag")
    }

    /// The declared `Content-Length`, if present and numeric
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.headers.get("content-length").and_then(|v| v.trim().parse().ok())
    }
}
