use miette::Diagnostic;
use thiserror::Error;

/// A `Result` typedef to use with the [`CacheError`] type
pub type Result<T> = std::result::Result<T, CacheError>;

/// A generic “error” for HTTP caches
#[derive(Error, Diagnostic, Debug)]
pub enum CacheError {
    /// A general error used as a catch all for other errors via anyhow
    #[error(transparent)]
    #[diagnostic(code(http_cache_proxy::general))]
    General(#[from] anyhow::Error),
    /// A `Cache-Control` or `Vary` value was syntactically irrecoverable
    #[error("Unparseable cache directive: {0}")]
    #[diagnostic(code(http_cache_proxy::malformed_directive))]
    MalformedDirective(String),
    /// The origin could not be reached due to a transport failure
    #[error("Upstream unreachable: {0}")]
    #[diagnostic(code(http_cache_proxy::upstream_unreachable))]
    UpstreamUnreachable(String),
    /// The caller-supplied deadline elapsed before the origin answered
    #[error("Upstream deadline elapsed")]
    #[diagnostic(code(http_cache_proxy::upstream_timeout))]
    UpstreamTimeout,
    /// The client demanded `only-if-cached` and no usable entry existed
    #[error("No cached entry to satisfy only-if-cached")]
    #[diagnostic(code(http_cache_proxy::only_if_cached_miss))]
    OnlyIfCachedMiss,
    /// Two stored variants ended up sharing a request signature
    #[error("Conflicting variants stored under one resource")]
    #[diagnostic(code(http_cache_proxy::store_conflict))]
    StoreConflict,
    /// The origin closed the connection before the declared body length
    #[error("Upstream body ended before the declared length")]
    #[diagnostic(code(http_cache_proxy::body_truncated))]
    BodyTruncated,
    /// Error from http
    #[error(transparent)]
    #[diagnostic(code(http_cache_proxy::http))]
    Http(#[from] http::Error),
    /// There was an error parsing the HTTP status code
    #[error(transparent)]
    #[diagnostic(code(http_cache_proxy::invalid_status_code))]
    InvalidStatusCode(#[from] http::status::InvalidStatusCode),
    /// There was an error parsing an HTTP header value
    #[error(transparent)]
    #[diagnostic(code(http_cache_proxy::invalid_header_value))]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    /// There was an error parsing an HTTP header name
    #[error(transparent)]
    #[diagnostic(code(http_cache_proxy::invalid_header_name))]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),
    /// There was an error parsing the URL
    #[error(transparent)]
    #[diagnostic(code(http_cache_proxy::invalid_url))]
    InvalidUrl(#[from] url::ParseError),
    /// There was an error parsing the HTTP request version
    #[error("Unknown HTTP version")]
    #[diagnostic(code(http_cache_proxy::bad_version))]
    BadVersion,
}
