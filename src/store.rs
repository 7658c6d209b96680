use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use crate::{
    directives,
    error::{CacheError, Result},
    request::HttpRequest,
    response::HttpResponse,
};

/// Headers that describe the stored body and therefore must not be replaced
/// by a `304`, which has no body of its own.
const EXCLUDED_FROM_REFRESH: &[&str] = &[
    "content-length",
    "content-encoding",
    "transfer-encoding",
    "content-range",
];

/// One cached response representation, selected by `Vary` signature.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Variant {
    /// The field names of the response's `Vary` header, lowercased, in order
    pub vary: Vec<String>,
    /// The request's values for the `vary` fields at store time. `None`
    /// records that the field was absent, which only matches absence.
    pub signature: Vec<(String, Option<String>)>,
    /// The stored response: status, end-to-end headers, body bytes
    pub response: HttpResponse,
    /// When the originating request was sent
    pub request_time: SystemTime,
    /// When the response headers were received
    pub response_time: SystemTime,
    /// The corrected initial age, frozen at store time. Later age is
    /// derived, never re-stored.
    pub initial_age: Duration,
}

impl Variant {
    fn build(
        request: &HttpRequest,
        mut response: HttpResponse,
        request_time: SystemTime,
        response_time: SystemTime,
    ) -> Self {
        if response.date().is_none() {
            response
                .headers
                .insert("date", httpdate::fmt_http_date(response_time));
        }
        let initial_age =
            corrected_initial_age(&response, request_time, response_time);
        let vary = directives::vary_fields(&response.headers);
        let signature = signature_for(&vary, request);
        Self {
            vary,
            signature,
            response,
            request_time,
            response_time,
            initial_age,
        }
    }

    /// Whether this variant may satisfy the given request.
    ///
    /// A `Vary: *` variant matches no request at all.
    #[must_use]
    pub fn matches(&self, request: &HttpRequest) -> bool {
        if self.vary.iter().any(|field| field == "*") {
            return false;
        }
        self.signature.iter().all(|(field, stored)| {
            request.headers.get_joined(field) == *stored
        })
    }

    /// The variant's age at `now`: corrected initial age plus resident time
    #[must_use]
    pub fn current_age(&self, now: SystemTime) -> Duration {
        self.initial_age
            + now.duration_since(self.response_time).unwrap_or_default()
    }

    fn refresh(
        &mut self,
        not_modified: &HttpResponse,
        request_time: SystemTime,
        response_time: SystemTime,
    ) {
        self.request_time = request_time;
        self.response_time = response_time;
        self.initial_age = corrected_initial_age(
            not_modified,
            request_time,
            response_time,
        );
        // End-to-end headers from the 304 replace their stored counterparts
        for (name, values) in not_modified.headers.entries() {
            if EXCLUDED_FROM_REFRESH.contains(&name.as_str()) {
                continue;
            }
            self.response.headers.remove(name);
            for value in values {
                self.response.headers.append(name, value.clone());
            }
        }
        self.response.headers.drop_1xx_warnings();
    }
}

/// RFC 7234 §4.2.3: `max(apparent age, Age header) + response delay`.
fn corrected_initial_age(
    response: &HttpResponse,
    request_time: SystemTime,
    response_time: SystemTime,
) -> Duration {
    let apparent = response
        .date()
        .and_then(|date| response_time.duration_since(date).ok())
        .unwrap_or_default();
    let age_header = response
        .headers
        .get("age")
        .and_then(|v| v.trim().parse().ok())
        .map(Duration::from_secs)
        .unwrap_or_default();
    let delay =
        response_time.duration_since(request_time).unwrap_or_default();
    apparent.max(age_header) + delay
}

fn signature_for(
    vary: &[String],
    request: &HttpRequest,
) -> Vec<(String, Option<String>)> {
    vary.iter()
        .map(|field| (field.clone(), request.headers.get_joined(field)))
        .collect()
}

/// Everything stored under one primary key
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Resource {
    /// When the first variant was stored
    pub created: SystemTime,
    /// The stored representations, one per `Vary` signature
    pub variants: Vec<Variant>,
}

impl Resource {
    /// Selects the variant whose request signature matches the inbound
    /// request, if any
    #[must_use]
    pub fn select(&self, request: &HttpRequest) -> Option<&Variant> {
        self.variants.iter().find(|v| v.matches(request))
    }
}

type Slot = Arc<RwLock<Option<Resource>>>;

/// An exclusive per-key write lease.
///
/// Holding the lease excludes readers and other writers on the same key;
/// the handler keeps it across the upstream round trip so that concurrent
/// misses collapse onto one fetch.
#[derive(Debug)]
pub struct ResourceGuard {
    guard: OwnedRwLockWriteGuard<Option<Resource>>,
}

impl ResourceGuard {
    /// The resource currently stored under the leased key, if any
    #[must_use]
    pub fn resource(&self) -> Option<&Resource> {
        self.guard.as_ref()
    }

    /// Upserts a variant for this request/response pair.
    ///
    /// Any existing variant the request would select, and any variant with
    /// the same `Vary` set and signature, is replaced.
    pub fn store(
        &mut self,
        request: &HttpRequest,
        response: HttpResponse,
        request_time: SystemTime,
        response_time: SystemTime,
        now: SystemTime,
    ) -> Result<Variant> {
        let variant =
            Variant::build(request, response, request_time, response_time);
        let resource = self.guard.get_or_insert_with(|| Resource {
            created: now,
            variants: Vec::new(),
        });
        resource.variants.retain(|v| {
            !v.matches(request)
                && !(v.vary == variant.vary
                    && v.signature == variant.signature)
        });
        resource.variants.push(variant.clone());
        for (i, a) in resource.variants.iter().enumerate() {
            for b in &resource.variants[i + 1..] {
                if a.vary == b.vary && a.signature == b.signature {
                    return Err(CacheError::StoreConflict);
                }
            }
        }
        Ok(variant)
    }

    /// Freshens the variant this request selects from a `304 Not Modified`:
    /// response times move forward, the corrected initial age is recomputed
    /// from the `304`'s `Date` and `Age`, and its end-to-end headers replace
    /// the stored ones. Returns the refreshed variant, or `None` when no
    /// stored variant matches.
    pub fn freshen(
        &mut self,
        request: &HttpRequest,
        not_modified: &HttpResponse,
        request_time: SystemTime,
        response_time: SystemTime,
    ) -> Result<Option<Variant>> {
        let Some(resource) = self.guard.as_mut() else {
            return Ok(None);
        };
        let Some(variant) =
            resource.variants.iter_mut().find(|v| v.matches(request))
        else {
            return Ok(None);
        };
        variant.refresh(not_modified, request_time, response_time);
        Ok(Some(variant.clone()))
    }
}

/// A trait providing methods for reading, writing, and removing cached
/// resources.
///
/// Writes are serialized per key and a write excludes reads on the same
/// key; reads proceed concurrently with other reads. Backends beyond the
/// in-memory one must uphold the same per-key contract.
#[async_trait::async_trait]
pub trait ResourceManager: Send + Sync + 'static {
    /// Attempts to pull the resource stored under `key`, waiting out any
    /// in-flight writer on the same key.
    async fn get(&self, key: &str) -> Result<Option<Resource>>;
    /// Takes the per-key write lease.
    async fn write(&self, key: &str) -> Result<ResourceGuard>;
    /// Removes the resource stored under `key`.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Implements [`ResourceManager`] with an in-memory map of per-key slots.
#[derive(Debug, Clone, Default)]
pub struct MemoryManager {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
}

impl MemoryManager {
    /// Creates an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears out the entire cache
    pub fn clear(&self) {
        self.slots.lock().unwrap().clear();
    }

    fn slot(&self, key: &str) -> Slot {
        self.slots
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait::async_trait]
impl ResourceManager for MemoryManager {
    async fn get(&self, key: &str) -> Result<Option<Resource>> {
        let slot = self.slot(key);
        let resource = slot.read().await;
        Ok(resource.clone())
    }

    async fn write(&self, key: &str) -> Result<ResourceGuard> {
        let slot = self.slot(key);
        Ok(ResourceGuard { guard: slot.write_owned().await })
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.slots.lock().unwrap().remove(key);
        Ok(())
    }
}
