use std::time::{Duration, SystemTime};

use crate::{directives::CacheControl, store::Variant};

/// rfc7231 6.1
const STATUS_CODE_CACHEABLE_BY_DEFAULT: &[u16] =
    &[200, 203, 204, 206, 300, 301, 404, 405, 410, 414, 501];

pub(crate) const ONE_DAY: Duration = Duration::from_secs(24 * 3600);

/// Configuration options which control behavior of the cache.
#[derive(Debug, Copy, Clone)]
pub struct CacheOptions {
    /// If `true`, the response is evaluated from the perspective of a shared
    /// cache: `private` is not storable and `s-maxage` is respected. The
    /// default is `false`, a single-user cache.
    pub shared: bool,
    /// Fraction of the response's `Date − Last-Modified` interval used as a
    /// fallback freshness lifetime. The default is 0.1 (10%).
    pub cache_heuristic: f32,
    /// Upper bound on the heuristic freshness lifetime. The default is 24
    /// hours.
    pub heuristic_cap: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            shared: false,
            cache_heuristic: 0.1,
            heuristic_cap: ONE_DAY,
        }
    }
}

/// What the cache may do with a stored variant right now
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Freshness {
    /// Within its freshness lifetime; serve from the store
    Fresh,
    /// Past its lifetime, but nothing forbids serving it stale
    StaleUsable,
    /// Past the bounds the client set; revalidate before serving
    StaleRevalidate,
    /// The response forbids reuse without successful revalidation
    MustRevalidate,
}

/// The outcome of a freshness calculation at one instant
#[derive(Debug, Copy, Clone)]
pub struct Evaluation {
    /// What to do with the variant
    pub freshness: Freshness,
    /// Corrected initial age plus resident time, in effect at `now`
    pub current_age: Duration,
    /// The freshness lifetime after request-side tightening
    pub lifetime: Duration,
    /// Whether the lifetime came from the heuristic rather than explicit
    /// expiry information
    pub heuristic: bool,
}

/// Whether a status code may be cached without explicit freshness
/// information.
#[must_use]
pub(crate) fn is_cacheable_by_default(status: u16) -> bool {
    STATUS_CODE_CACHEABLE_BY_DEFAULT.contains(&status)
}

/// Computes the current age and freshness lifetime of a stored variant and
/// decides what the cache may do with it, honoring the request's
/// `max-age`/`min-fresh`/`max-stale` bounds.
#[must_use]
pub fn evaluate(
    variant: &Variant,
    request: &CacheControl,
    now: SystemTime,
    options: &CacheOptions,
) -> Evaluation {
    let resident = now
        .duration_since(variant.response_time)
        .unwrap_or_default();
    let current_age = variant.initial_age + resident;

    let response = CacheControl::parse_lossy(&variant.response.headers);
    let (mut lifetime, heuristic) =
        freshness_lifetime(variant, &response, options);
    if let Some(bound) = request.max_age() {
        lifetime = lifetime.min(bound);
    }

    let mut fresh = current_age < lifetime;
    if let Some(min_fresh) = request.min_fresh() {
        if lifetime.saturating_sub(current_age) < min_fresh {
            fresh = false;
        }
    }

    let freshness = if response.no_cache() {
        Freshness::MustRevalidate
    } else if fresh {
        Freshness::Fresh
    } else if response.must_revalidate() {
        Freshness::MustRevalidate
    } else if exceeds_request_bounds(current_age, lifetime, request) {
        Freshness::StaleRevalidate
    } else {
        Freshness::StaleUsable
    };

    Evaluation { freshness, current_age, lifetime, heuristic }
}

/// Whether the request's directives rule out serving this entry stale.
fn exceeds_request_bounds(
    current_age: Duration,
    lifetime: Duration,
    request: &CacheControl,
) -> bool {
    if request.min_fresh().is_some() {
        return true;
    }
    if let Some(bound) = request.max_age() {
        if current_age > bound {
            return true;
        }
    }
    match request.max_stale() {
        // Unlimited staleness accepted
        Some(None) => false,
        Some(Some(cap)) => current_age.saturating_sub(lifetime) > cap,
        None => false,
    }
}

/// First defined of `s-maxage` (shared mode), `max-age`, `Expires − Date`,
/// and the heuristic lifetime. Returns the lifetime and whether it was
/// heuristic.
fn freshness_lifetime(
    variant: &Variant,
    response: &CacheControl,
    options: &CacheOptions,
) -> (Duration, bool) {
    if options.shared {
        if let Some(lifetime) = response.s_maxage() {
            return (lifetime, false);
        }
    }
    if let Some(lifetime) = response.max_age() {
        return (lifetime, false);
    }

    let server_date =
        variant.response.date().unwrap_or(variant.response_time);

    if let Some(expires) = variant.response.headers.get("expires") {
        // Invalid dates, notably the value "0", mean already expired
        return match httpdate::parse_http_date(expires) {
            Ok(expires) => (
                expires.duration_since(server_date).unwrap_or_default(),
                false,
            ),
            Err(_) => (Duration::ZERO, false),
        };
    }

    if is_cacheable_by_default(variant.response.status) {
        if let Some(last_modified) = variant.response.last_modified() {
            if let Ok(interval) = server_date.duration_since(last_modified) {
                let lifetime = interval
                    .mul_f64(f64::from(options.cache_heuristic))
                    .min(options.heuristic_cap);
                return (Duration::from_secs(lifetime.as_secs()), true);
            }
        }
    }

    (Duration::ZERO, false)
}
