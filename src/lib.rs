#![forbid(unsafe_code, future_incompatible)]
#![deny(
    missing_docs,
    missing_debug_implementations,
    missing_copy_implementations,
    nonstandard_style,
    unused_qualifications,
    unused_import_braces,
    unused_extern_crates,
    trivial_casts,
    trivial_numeric_casts
)]
//! A caching intermediary core that follows the HTTP caching rules of
//! RFC 7234. It sits between a client and an origin, stores responses keyed
//! by request, and serves later requests from storage when the rules permit.
//!
//! The crate implements:
//!
//! - the request/response decision flow: lookup, variant selection,
//!   freshness, revalidation, storability, invalidation on unsafe methods
//! - age and freshness-lifetime arithmetic, including heuristic freshness
//! - conditional requests (`If-None-Match`, `If-Modified-Since`,
//!   `304 Not Modified`) in both directions
//! - `Cache-Control` / `Pragma` / `Vary` parsing and enforcement
//! - an in-memory resource store with per-key single-writer/multi-reader
//!   locking, so concurrent misses collapse onto one upstream fetch
//!
//! The transport, the store, and the clock are capability traits injected at
//! construction, which keeps the core deterministic under test.
//!
//! ## Basic usage
//!
//! ```ignore
//! use http_cache_proxy::{
//!     CacheOptions, MemoryManager, ProxyCache, ReqwestUpstream, SystemClock,
//! };
//!
//! let proxy = ProxyCache {
//!     store: MemoryManager::new(),
//!     upstream: ReqwestUpstream::new(reqwest::Client::new()),
//!     clock: SystemClock,
//!     options: CacheOptions::default(),
//! };
//! // for each inbound request:
//! // let response = proxy.handle(request).await?;
//! ```
//!
//! Served responses carry an `x-cache` header (`HIT`, `MISS`, or `SKIP`),
//! an `Age` on every hit, and `Warning` values when a stale or heuristic
//! response is being reused. Setting the `DUMP_REQUESTS` environment
//! variable logs each exchange verbatim through [`log`].
mod clock;
mod directives;
mod error;
mod freshness;
mod request;
mod response;
mod store;
mod upstream;

use std::{fmt, sync::OnceLock};

use http::Method;

pub use clock::{Clock, ManualClock, SystemClock};
pub use directives::CacheControl;
pub use error::{CacheError, Result};
pub use freshness::{evaluate, CacheOptions, Evaluation, Freshness};
pub use request::HttpRequest;
pub use url::Url;
pub use response::{HttpHeaders, HttpResponse, HttpVersion};
pub use store::{
    MemoryManager, Resource, ResourceGuard, ResourceManager, Variant,
};
#[cfg(feature = "client-reqwest")]
pub use upstream::ReqwestUpstream;
pub use upstream::{RoundTrip, Upstream};

use request::cache_key_for;

/// `x-cache` header: HIT if the response was served from cache, MISS if it
/// came from the origin, SKIP if a directive bypassed caching
pub const XCACHE: &str = "x-cache";

const WARN_RESPONSE_IS_STALE: (u16, &str) = (110, "Response is Stale");
const WARN_REVALIDATION_FAILED: (u16, &str) = (111, "Revalidation Failed");
const WARN_HEURISTIC_EXPIRATION: (u16, &str) = (113, "Heuristic Expiration");

/// Represents a basic cache status, used in the custom `x-cache` header
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HitOrMiss {
    /// Served from the store
    HIT,
    /// Fetched from the origin
    MISS,
    /// A directive bypassed caching for this exchange
    SKIP,
}

impl fmt::Display for HitOrMiss {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::HIT => write!(f, "HIT"),
            Self::MISS => write!(f, "MISS"),
            Self::SKIP => write!(f, "SKIP"),
        }
    }
}

/// Caches requests according to http spec.
///
/// One instance serves many concurrent requests; the store and the clock are
/// the only shared state.
#[derive(Debug, Clone)]
pub struct ProxyCache<S, U, C = SystemClock>
where
    S: ResourceManager,
    U: Upstream,
    C: Clock,
{
    /// Store instance that implements the [`ResourceManager`] trait. An
    /// in-memory implementation is provided, see [`MemoryManager`].
    pub store: S,
    /// The transport requests are forwarded through on a miss
    pub upstream: U,
    /// Wall-clock source for age and freshness arithmetic
    pub clock: C,
    /// Tunable cache behavior, see [`CacheOptions`]
    pub options: CacheOptions,
}

impl<S, U, C> ProxyCache<S, U, C>
where
    S: ResourceManager,
    U: Upstream,
    C: Clock,
{
    /// Runs one inbound request through the cache decision flow and returns
    /// the response to emit.
    pub async fn handle(
        &self,
        mut request: HttpRequest,
    ) -> Result<HttpResponse> {
        request.headers.strip_hop_by_hop();
        dump_request(&request);

        if !request.is_method_get_head() {
            return self.pass_through(&request).await;
        }

        let request_cc = CacheControl::parse_request_lossy(&request.headers);

        if request_cc.no_store() {
            // Forwarded but never stored; an existing entry is left alone
            return match self
                .upstream
                .round_trip(&request)
                .await
                .and_then(|rt| verify_length(&request.method, rt))
            {
                Ok(mut round_trip) => {
                    round_trip.response.headers.strip_hop_by_hop();
                    let mut response = round_trip.response;
                    response.cache_status(HitOrMiss::SKIP);
                    Ok(self.finish(&request, response))
                }
                Err(err) => Ok(self.bad_gateway(&request, &err)),
            };
        }

        let key = request.cache_key();

        if !request_cc.no_cache() {
            if let Some(resource) = self.store.get(&key).await? {
                if let Some(variant) = resource.select(&request) {
                    let evaluation = evaluate(
                        variant,
                        &request_cc,
                        self.clock.now(),
                        &self.options,
                    );
                    if let Some(response) =
                        self.serve_if_usable(&request, variant, &evaluation)
                    {
                        return Ok(response);
                    }
                }
            }
        }

        if request_cc.only_if_cached() {
            log::debug!("{}: {}", CacheError::OnlyIfCachedMiss, request.url);
            return Ok(self.gateway_timeout(&request));
        }

        let writer = self.store.write(&key).await?;
        self.conditional_fetch(&request, &request_cc, writer).await
    }

    /// Serves a fresh or stale-but-usable variant, or reports that the entry
    /// needs revalidation.
    fn serve_if_usable(
        &self,
        request: &HttpRequest,
        variant: &Variant,
        evaluation: &Evaluation,
    ) -> Option<HttpResponse> {
        match evaluation.freshness {
            Freshness::Fresh => {
                if self.client_not_modified(request, variant) {
                    return Some(self.not_modified(variant, evaluation));
                }
                Some(self.serve_stored(
                    request,
                    variant,
                    HitOrMiss::HIT,
                    evaluation,
                    &[],
                ))
            }
            Freshness::StaleUsable => Some(self.serve_stored(
                request,
                variant,
                HitOrMiss::HIT,
                evaluation,
                &[WARN_RESPONSE_IS_STALE],
            )),
            Freshness::StaleRevalidate | Freshness::MustRevalidate => None,
        }
    }

    /// Revalidates or fetches under the per-key write lease. Holding the
    /// lease across the round trip is what coalesces concurrent misses.
    async fn conditional_fetch(
        &self,
        request: &HttpRequest,
        request_cc: &CacheControl,
        mut writer: ResourceGuard,
    ) -> Result<HttpResponse> {
        // A coalesced writer may have filled the slot while we waited
        let cached =
            writer.resource().and_then(|r| r.select(request)).cloned();
        if let Some(variant) = &cached {
            if !request_cc.no_cache() {
                let evaluation = evaluate(
                    variant,
                    request_cc,
                    self.clock.now(),
                    &self.options,
                );
                if let Some(response) =
                    self.serve_if_usable(request, variant, &evaluation)
                {
                    drop(writer);
                    return Ok(response);
                }
            }
        }

        let bypass = request_cc.no_cache();
        let hit_status = if bypass { HitOrMiss::SKIP } else { HitOrMiss::HIT };
        let miss_status =
            if bypass { HitOrMiss::SKIP } else { HitOrMiss::MISS };

        let mut upstream_request = request.clone();
        if let Some(variant) = &cached {
            if let Some(etag) = variant.response.etag() {
                upstream_request.headers.insert("if-none-match", etag);
            } else if let Some(last_modified) =
                variant.response.headers.get("last-modified")
            {
                upstream_request
                    .headers
                    .insert("if-modified-since", last_modified);
            }
        }

        let mut round_trip = match self
            .upstream
            .round_trip(&upstream_request)
            .await
            .and_then(|rt| verify_length(&request.method, rt))
        {
            Ok(round_trip) => round_trip,
            Err(err) => {
                return self.after_failed_revalidation(
                    request, cached, writer, hit_status, &err,
                );
            }
        };
        round_trip.response.headers.strip_hop_by_hop();

        if round_trip.response.status == 304 {
            if cached.is_some() {
                let refreshed = writer.freshen(
                    request,
                    &round_trip.response,
                    round_trip.request_time,
                    round_trip.response_time,
                )?;
                drop(writer);
                if let Some(variant) = refreshed {
                    let evaluation = evaluate(
                        &variant,
                        &CacheControl::default(),
                        self.clock.now(),
                        &self.options,
                    );
                    return Ok(self.serve_stored(
                        request,
                        &variant,
                        hit_status,
                        &evaluation,
                        &[],
                    ));
                }
            } else {
                drop(writer);
            }
            // The client's own validators produced this 304; pass it along
            let mut response = round_trip.response;
            response.cache_status(miss_status);
            return Ok(self.finish(request, response));
        }

        if (500..600).contains(&round_trip.response.status) {
            if let Some(variant) = &cached {
                let stored_cc =
                    CacheControl::parse_lossy(&variant.response.headers);
                drop(writer);
                if stored_cc.must_revalidate() || stored_cc.no_cache() {
                    // Never serve stale for these entries
                    let mut response = round_trip.response;
                    response.cache_status(miss_status);
                    return Ok(self.finish(request, response));
                }
                let evaluation = evaluate(
                    variant,
                    &CacheControl::default(),
                    self.clock.now(),
                    &self.options,
                );
                return Ok(self.serve_stored(
                    request,
                    variant,
                    hit_status,
                    &evaluation,
                    &[WARN_REVALIDATION_FAILED],
                ));
            }
        }

        self.store_and_serve(request, request_cc, writer, round_trip, bypass)
    }

    /// Storability test and upsert for a response fetched from the origin.
    fn store_and_serve(
        &self,
        request: &HttpRequest,
        request_cc: &CacheControl,
        mut writer: ResourceGuard,
        round_trip: RoundTrip,
        bypass: bool,
    ) -> Result<HttpResponse> {
        let response_cc =
            CacheControl::parse_lossy(&round_trip.response.headers);
        let storable = request.method == Method::GET
            && (freshness::is_cacheable_by_default(round_trip.response.status)
                || has_explicit_freshness(
                    &round_trip.response,
                    &response_cc,
                    &self.options,
                ))
            && !request_cc.no_store()
            && !response_cc.no_store()
            && !(self.options.shared && response_cc.private())
            && (!request.has_authorization()
                || response_cc.public()
                || response_cc.must_revalidate()
                || response_cc.s_maxage().is_some());

        if storable {
            let stored = writer.store(
                request,
                round_trip.response,
                round_trip.request_time,
                round_trip.response_time,
                self.clock.now(),
            )?;
            drop(writer);
            let mut response = stored.response.clone();
            response.cache_status(if bypass {
                HitOrMiss::SKIP
            } else {
                HitOrMiss::MISS
            });
            return Ok(self.finish(request, response));
        }

        drop(writer);
        let mut response = round_trip.response;
        // A no-store response was bypassed, not missed; the next fetch of
        // this key may store normally
        let status = if bypass || response_cc.no_store() {
            HitOrMiss::SKIP
        } else {
            HitOrMiss::MISS
        };
        response.cache_status(status);
        Ok(self.finish(request, response))
    }

    /// Stale fallback after a transport failure: serve with `Warning: 111`
    /// unless the entry forbids it, else surface `502 Bad Gateway`.
    fn after_failed_revalidation(
        &self,
        request: &HttpRequest,
        cached: Option<Variant>,
        writer: ResourceGuard,
        hit_status: HitOrMiss,
        err: &CacheError,
    ) -> Result<HttpResponse> {
        drop(writer);
        if let Some(variant) = cached {
            let stored_cc =
                CacheControl::parse_lossy(&variant.response.headers);
            if !stored_cc.must_revalidate() && !stored_cc.no_cache() {
                let evaluation = evaluate(
                    &variant,
                    &CacheControl::default(),
                    self.clock.now(),
                    &self.options,
                );
                return Ok(self.serve_stored(
                    request,
                    &variant,
                    hit_status,
                    &evaluation,
                    &[WARN_REVALIDATION_FAILED],
                ));
            }
        }
        Ok(self.bad_gateway(request, err))
    }

    /// Non-GET/HEAD requests skip the cache entirely; a successful unsafe
    /// method invalidates what it may have changed.
    async fn pass_through(
        &self,
        request: &HttpRequest,
    ) -> Result<HttpResponse> {
        let round_trip = match self
            .upstream
            .round_trip(request)
            .await
            .and_then(|rt| verify_length(&request.method, rt))
        {
            Ok(round_trip) => round_trip,
            Err(err) => return Ok(self.bad_gateway(request, &err)),
        };
        let mut response = round_trip.response;
        response.headers.strip_hop_by_hop();
        if is_unsafe(&request.method) && response.status < 400 {
            self.invalidate_related(request, &response).await?;
        }
        response.cache_status(HitOrMiss::MISS);
        Ok(self.finish(request, response))
    }

    /// Invalidates the primary key and any same-origin `Location` /
    /// `Content-Location` target of an unsafe method (RFC 7234 §4.4).
    async fn invalidate_related(
        &self,
        request: &HttpRequest,
        response: &HttpResponse,
    ) -> Result<()> {
        self.store.delete(&cache_key_for(&request.url)).await?;
        for name in ["location", "content-location"] {
            let Some(value) = response.headers.get(name) else { continue };
            let Ok(target) = request.url.join(value) else { continue };
            let same_origin = target.scheme() == request.url.scheme()
                && target.host_str() == request.url.host_str()
                && target.port_or_known_default()
                    == request.url.port_or_known_default();
            if same_origin {
                self.store.delete(&cache_key_for(&target)).await?;
            }
        }
        Ok(())
    }

    fn client_not_modified(
        &self,
        request: &HttpRequest,
        variant: &Variant,
    ) -> bool {
        let candidates = request.if_none_match();
        if !candidates.is_empty() {
            let Some(etag) = variant.response.etag() else {
                return false;
            };
            fn strong(tag: &str) -> &str {
                tag.trim().trim_start_matches("W/")
            }
            return candidates
                .iter()
                .any(|tag| tag == "*" || strong(tag) == strong(etag));
        }
        match (request.if_modified_since(), variant.response.last_modified())
        {
            (Some(since), Some(last_modified)) => last_modified <= since,
            _ => false,
        }
    }

    /// Answers a client conditional from the store without contacting the
    /// origin.
    fn not_modified(
        &self,
        variant: &Variant,
        evaluation: &Evaluation,
    ) -> HttpResponse {
        let stored = &variant.response;
        let mut response = HttpResponse {
            body: Vec::new(),
            headers: HttpHeaders::new(),
            status: 304,
            url: stored.url.clone(),
            version: stored.version,
        };
        for name in ["etag", "date", "cache-control", "expires"] {
            for value in stored.headers.values(name) {
                response.headers.append(name, value);
            }
        }
        response.set_age(evaluation.current_age.as_secs());
        response.cache_status(HitOrMiss::HIT);
        dump_response(&response);
        response
    }

    fn serve_stored(
        &self,
        request: &HttpRequest,
        variant: &Variant,
        status: HitOrMiss,
        evaluation: &Evaluation,
        warnings: &[(u16, &str)],
    ) -> HttpResponse {
        let mut response = variant.response.clone();
        response.set_age(evaluation.current_age.as_secs());
        for (code, text) in warnings {
            response.add_warning(*code, text);
        }
        if evaluation.heuristic && evaluation.current_age > freshness::ONE_DAY
        {
            let (code, text) = WARN_HEURISTIC_EXPIRATION;
            response.add_warning(code, text);
        }
        response.cache_status(status);
        self.finish(request, response)
    }

    /// Final serve-time bookkeeping: the body length becomes the
    /// `Content-Length`, and `HEAD` suppresses the body itself.
    fn finish(
        &self,
        request: &HttpRequest,
        mut response: HttpResponse,
    ) -> HttpResponse {
        let bodyless = response.status == 204
            || response.status == 304
            || (100..200).contains(&response.status);
        let head_passthrough =
            request.method == Method::HEAD && response.body.is_empty();
        if !bodyless && !head_passthrough {
            response
                .headers
                .insert("content-length", response.body.len().to_string());
        }
        if request.method == Method::HEAD {
            response.body.clear();
        }
        dump_response(&response);
        response
    }

    fn bad_gateway(
        &self,
        request: &HttpRequest,
        err: &CacheError,
    ) -> HttpResponse {
        log::warn!("upstream fetch for {} failed: {err}", request.url);
        let mut response = HttpResponse {
            body: b"BadGateway".to_vec(),
            headers: HttpHeaders::new(),
            status: 502,
            url: request.url.clone(),
            version: HttpVersion::Http11,
        };
        response.cache_status(HitOrMiss::MISS);
        self.finish(request, response)
    }

    fn gateway_timeout(&self, request: &HttpRequest) -> HttpResponse {
        // ENOTCACHED
        let mut response = HttpResponse {
            body: b"GatewayTimeout".to_vec(),
            headers: HttpHeaders::new(),
            status: 504,
            url: request.url.clone(),
            version: HttpVersion::Http11,
        };
        response.cache_status(HitOrMiss::MISS);
        self.finish(request, response)
    }
}

fn is_unsafe(method: &Method) -> bool {
    *method == Method::POST
        || *method == Method::PUT
        || *method == Method::DELETE
        || *method == Method::PATCH
}

/// The response carries its own expiry information.
fn has_explicit_freshness(
    response: &HttpResponse,
    response_cc: &CacheControl,
    options: &CacheOptions,
) -> bool {
    response_cc.max_age().is_some()
        || (options.shared && response_cc.s_maxage().is_some())
        || response.headers.contains_key("expires")
        || response_cc.public()
}

/// Rejects bodies the origin cut short. `HEAD` answers and bodyless
/// statuses legitimately declare more than they carry.
fn verify_length(
    method: &Method,
    round_trip: RoundTrip,
) -> Result<RoundTrip> {
    let response = &round_trip.response;
    let bodyless = *method == Method::HEAD
        || response.status == 204
        || response.status == 304
        || (100..200).contains(&response.status);
    if bodyless {
        return Ok(round_trip);
    }
    match response.content_length() {
        Some(declared) if (response.body.len() as u64) < declared => {
            Err(CacheError::BodyTruncated)
        }
        _ => Ok(round_trip),
    }
}

/// Read once at init; when set and non-empty, every request and response is
/// logged verbatim.
fn dump_enabled() -> bool {
    static DUMP: OnceLock<bool> = OnceLock::new();
    *DUMP.get_or_init(|| {
        std::env::var("DUMP_REQUESTS").is_ok_and(|v| !v.is_empty())
    })
}

fn dump_request(request: &HttpRequest) {
    if !dump_enabled() {
        return;
    }
    let mut dump =
        format!("> {} {} {}\n", request.method, request.url, request.version);
    for (name, value) in request.headers.iter() {
        dump.push_str(&format!("> {name}: {value}\n"));
    }
    dump.push_str(&String::from_utf8_lossy(&request.body));
    log::debug!("{dump}");
}

fn dump_response(response: &HttpResponse) {
    if !dump_enabled() {
        return;
    }
    let mut dump =
        format!("< {} {}\n", response.version, response.status);
    for (name, value) in response.headers.iter() {
        dump.push_str(&format!("< {name}: {value}\n"));
    }
    dump.push_str(&String::from_utf8_lossy(&response.body));
    log::debug!("{dump}");
}

#[allow(dead_code)]
#[cfg(test)]
mod test;
