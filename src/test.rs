use std::time::{Duration, SystemTime};

use http::Method;
use url::Url;

use crate::{
    directives, evaluate, CacheControl, CacheOptions, Freshness, HitOrMiss,
    HttpHeaders, HttpRequest, HttpResponse, HttpVersion, MemoryManager,
    ResourceManager, Result, Variant,
};

const TEST_BODY: &[u8] = b"test";

fn epoch() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

fn request(method: Method, url: &str) -> HttpRequest {
    HttpRequest::new(method, Url::parse(url).unwrap())
}

fn response(status: u16, headers: &[(&str, &str)]) -> HttpResponse {
    let mut converted = HttpHeaders::new();
    for (name, value) in headers {
        converted.append(name, *value);
    }
    HttpResponse {
        body: TEST_BODY.to_vec(),
        headers: converted,
        status,
        url: Url::parse("http://example.org/test").unwrap(),
        version: HttpVersion::Http11,
    }
}

fn variant(response: HttpResponse, response_time: SystemTime) -> Variant {
    Variant {
        vary: Vec::new(),
        signature: Vec::new(),
        response,
        request_time: response_time,
        response_time,
        initial_age: Duration::ZERO,
    }
}

#[test]
fn hit_miss() {
    assert_eq!(HitOrMiss::HIT.to_string(), "HIT");
    assert_eq!(HitOrMiss::MISS.to_string(), "MISS");
    assert_eq!(HitOrMiss::SKIP.to_string(), "SKIP");
}

#[test]
fn parses_directives() -> Result<()> {
    let mut headers = HttpHeaders::new();
    headers.insert("cache-control", "max-age=60, MUST-REVALIDATE, private");
    let cc = CacheControl::parse(&headers)?;
    assert_eq!(cc.max_age(), Some(Duration::from_secs(60)));
    assert!(cc.must_revalidate());
    assert!(cc.private());
    assert!(!cc.no_store());
    Ok(())
}

#[test]
fn repeated_fields_concatenate() -> Result<()> {
    let mut headers = HttpHeaders::new();
    headers.append("cache-control", "max-age=60");
    headers.append("cache-control", "no-store");
    let cc = CacheControl::parse(&headers)?;
    assert_eq!(cc.max_age(), Some(Duration::from_secs(60)));
    assert!(cc.no_store());
    Ok(())
}

#[test]
fn conflicting_repeats_invalidate_freshness() -> Result<()> {
    let mut headers = HttpHeaders::new();
    headers.insert("cache-control", "max-age=60, max-age=120");
    let cc = CacheControl::parse(&headers)?;
    assert!(cc.must_revalidate());
    Ok(())
}

#[test]
fn quoted_arguments_unquote() -> Result<()> {
    let mut headers = HttpHeaders::new();
    headers.insert(
        "cache-control",
        r#"private="set-cookie, x-user", max-age="30""#,
    );
    let cc = CacheControl::parse(&headers)?;
    assert!(cc.private());
    assert_eq!(cc.max_age(), Some(Duration::from_secs(30)));
    Ok(())
}

#[test]
fn unknown_tokens_are_ignored() -> Result<()> {
    let mut headers = HttpHeaders::new();
    headers.insert("cache-control", "llamas, max-age=10");
    let cc = CacheControl::parse(&headers)?;
    assert_eq!(cc.max_age(), Some(Duration::from_secs(10)));
    Ok(())
}

#[test]
fn unterminated_quote_is_malformed() {
    let mut headers = HttpHeaders::new();
    headers.insert("cache-control", r#"private="set-cookie"#);
    assert!(CacheControl::parse(&headers).is_err());
    // the lossy parse drops the header instead of failing the request
    let cc = CacheControl::parse_lossy(&headers);
    assert!(!cc.private());
}

#[test]
fn pragma_applies_without_cache_control() -> Result<()> {
    let mut headers = HttpHeaders::new();
    headers.insert("pragma", "no-cache");
    assert!(CacheControl::parse_request(&headers)?.no_cache());

    // an explicit Cache-Control wins over Pragma
    headers.insert("cache-control", "max-age=5");
    assert!(!CacheControl::parse_request(&headers)?.no_cache());
    Ok(())
}

#[test]
fn max_stale_without_argument_is_unbounded() -> Result<()> {
    let mut headers = HttpHeaders::new();
    headers.insert("cache-control", "max-stale");
    assert_eq!(CacheControl::parse(&headers)?.max_stale(), Some(None));
    headers.insert("cache-control", "max-stale=30");
    assert_eq!(
        CacheControl::parse(&headers)?.max_stale(),
        Some(Some(Duration::from_secs(30)))
    );
    Ok(())
}

#[test]
fn vary_fields_are_ordered_and_lowercased() {
    let mut headers = HttpHeaders::new();
    headers.insert("vary", "Accept-Encoding, User-Agent");
    assert_eq!(
        directives::vary_fields(&headers),
        vec!["accept-encoding".to_string(), "user-agent".to_string()]
    );
}

#[test]
fn hop_by_hop_headers_are_stripped() {
    let mut headers = HttpHeaders::new();
    headers.insert("connection", "close, x-tracking");
    headers.insert("keep-alive", "timeout=5");
    headers.insert("transfer-encoding", "chunked");
    headers.insert("x-tracking", "abc");
    headers.insert("accept", "text/html");
    headers.strip_hop_by_hop();
    assert!(!headers.contains_key("connection"));
    assert!(!headers.contains_key("keep-alive"));
    assert!(!headers.contains_key("transfer-encoding"));
    assert!(!headers.contains_key("x-tracking"));
    assert_eq!(headers.get("accept"), Some("text/html"));
}

#[test]
fn warning_1xx_values_do_not_survive_refresh() {
    let mut headers = HttpHeaders::new();
    headers.append("warning", "110 - \"Response is Stale\"");
    headers.append("warning", "214 - \"Transformation Applied\"");
    headers.drop_1xx_warnings();
    let kept: Vec<&str> = headers.values("warning").collect();
    assert_eq!(kept, vec!["214 - \"Transformation Applied\""]);
}

#[test]
fn head_shares_the_get_key_space() {
    let get = request(Method::GET, "http://example.org/test?q=1");
    let head = request(Method::HEAD, "http://example.org/test?q=1");
    assert_eq!(get.cache_key(), head.cache_key());
    assert!(get.cache_key().starts_with("GET:"));
}

#[test]
fn effective_uris_are_normalized() {
    let explicit = request(Method::GET, "HTTP://EXAMPLE.org:80/test");
    let plain = request(Method::GET, "http://example.org/test");
    assert_eq!(explicit.cache_key(), plain.cache_key());
}

#[test]
fn warnings_render_with_code_and_text() {
    let mut res = response(200, &[]);
    res.add_warning(110, "Response is Stale");
    assert_eq!(
        res.headers.get("warning"),
        Some("110 - \"Response is Stale\"")
    );
    assert_eq!(res.warning_code(), Some(110));
}

#[test]
fn variant_signature_matching() {
    let req = {
        let mut r = request(Method::GET, "http://example.org/test");
        r.headers.insert("accept-encoding", "gzip");
        r
    };
    let stored = Variant {
        vary: vec!["accept-encoding".to_string()],
        signature: vec![(
            "accept-encoding".to_string(),
            Some("gzip".to_string()),
        )],
        response: response(200, &[("vary", "Accept-Encoding")]),
        request_time: epoch(),
        response_time: epoch(),
        initial_age: Duration::ZERO,
    };
    assert!(stored.matches(&req));

    let mut other = req.clone();
    other.headers.insert("accept-encoding", "br");
    assert!(!stored.matches(&other));

    // an absent field only matches absence
    let mut bare = request(Method::GET, "http://example.org/test");
    assert!(!stored.matches(&bare));
    bare.headers.insert("accept-encoding", "gzip");
    assert!(stored.matches(&bare));
}

#[test]
fn vary_star_matches_nothing() {
    let stored = Variant {
        vary: vec!["*".to_string()],
        signature: vec![("*".to_string(), None)],
        response: response(200, &[("vary", "*")]),
        request_time: epoch(),
        response_time: epoch(),
        initial_age: Duration::ZERO,
    };
    assert!(!stored.matches(&request(Method::GET, "http://example.org/test")));
}

#[test]
fn max_age_governs_freshness() {
    let now = epoch();
    let stored = variant(
        response(
            200,
            &[
                ("cache-control", "max-age=100"),
                ("date", &httpdate::fmt_http_date(now)),
            ],
        ),
        now,
    );
    let none = CacheControl::default();
    let options = CacheOptions::default();

    let eval = evaluate(&stored, &none, now + Duration::from_secs(50), &options);
    assert_eq!(eval.freshness, Freshness::Fresh);
    assert_eq!(eval.current_age, Duration::from_secs(50));
    assert_eq!(eval.lifetime, Duration::from_secs(100));

    // past its lifetime nothing forbids reuse, so it is stale-usable
    let eval =
        evaluate(&stored, &none, now + Duration::from_secs(150), &options);
    assert_eq!(eval.freshness, Freshness::StaleUsable);
}

#[test]
fn expires_governs_freshness_when_no_max_age() {
    let now = epoch();
    let stored = variant(
        response(
            200,
            &[
                ("date", &httpdate::fmt_http_date(now)),
                (
                    "expires",
                    &httpdate::fmt_http_date(now + Duration::from_secs(300)),
                ),
            ],
        ),
        now,
    );
    let eval = evaluate(
        &stored,
        &CacheControl::default(),
        now + Duration::from_secs(100),
        &CacheOptions::default(),
    );
    assert_eq!(eval.freshness, Freshness::Fresh);
    assert_eq!(eval.lifetime, Duration::from_secs(300));
}

#[test]
fn invalid_expires_means_already_expired() {
    let now = epoch();
    let stored = variant(
        response(
            200,
            &[("date", &httpdate::fmt_http_date(now)), ("expires", "0")],
        ),
        now,
    );
    let eval = evaluate(
        &stored,
        &CacheControl::default(),
        now + Duration::from_secs(1),
        &CacheOptions::default(),
    );
    assert_eq!(eval.lifetime, Duration::ZERO);
    assert_ne!(eval.freshness, Freshness::Fresh);
}

#[test]
fn heuristic_lifetime_is_a_tenth_of_last_modified_age() {
    let now = epoch();
    let last_modified = now - Duration::from_secs(1000);
    let stored = variant(
        response(
            200,
            &[
                ("date", &httpdate::fmt_http_date(now)),
                ("last-modified", &httpdate::fmt_http_date(last_modified)),
            ],
        ),
        now,
    );
    let eval = evaluate(
        &stored,
        &CacheControl::default(),
        now + Duration::from_secs(50),
        &CacheOptions::default(),
    );
    assert!(eval.heuristic);
    assert_eq!(eval.lifetime, Duration::from_secs(100));
    assert_eq!(eval.freshness, Freshness::Fresh);
}

#[test]
fn heuristic_lifetime_is_capped() {
    let now = epoch();
    let last_modified = now - Duration::from_secs(365 * 24 * 3600);
    let stored = variant(
        response(
            200,
            &[
                ("date", &httpdate::fmt_http_date(now)),
                ("last-modified", &httpdate::fmt_http_date(last_modified)),
            ],
        ),
        now,
    );
    let eval = evaluate(
        &stored,
        &CacheControl::default(),
        now,
        &CacheOptions::default(),
    );
    assert_eq!(eval.lifetime, Duration::from_secs(24 * 3600));
}

#[test]
fn request_max_age_tightens_lifetime() {
    let now = epoch();
    let stored = variant(
        response(
            200,
            &[
                ("cache-control", "max-age=1000"),
                ("date", &httpdate::fmt_http_date(now)),
            ],
        ),
        now,
    );
    let mut headers = HttpHeaders::new();
    headers.insert("cache-control", "max-age=10");
    let req = CacheControl::parse(&headers).unwrap();
    let eval = evaluate(
        &stored,
        &req,
        now + Duration::from_secs(50),
        &CacheOptions::default(),
    );
    // the client refuses anything older than ten seconds
    assert_eq!(eval.lifetime, Duration::from_secs(10));
    assert_eq!(eval.freshness, Freshness::StaleRevalidate);
}

#[test]
fn min_fresh_demands_remaining_lifetime() {
    let now = epoch();
    let stored = variant(
        response(
            200,
            &[
                ("cache-control", "max-age=100"),
                ("date", &httpdate::fmt_http_date(now)),
            ],
        ),
        now,
    );
    let mut headers = HttpHeaders::new();
    headers.insert("cache-control", "min-fresh=60");
    let req = CacheControl::parse(&headers).unwrap();
    let eval = evaluate(
        &stored,
        &req,
        now + Duration::from_secs(50),
        &CacheOptions::default(),
    );
    assert_eq!(eval.freshness, Freshness::StaleRevalidate);
}

#[test]
fn max_stale_bounds_acceptable_staleness() {
    let now = epoch();
    let stored = variant(
        response(
            200,
            &[
                ("cache-control", "max-age=100"),
                ("date", &httpdate::fmt_http_date(now)),
            ],
        ),
        now,
    );
    let mut headers = HttpHeaders::new();
    headers.insert("cache-control", "max-stale=10");
    let req = CacheControl::parse(&headers).unwrap();
    let options = CacheOptions::default();

    let eval =
        evaluate(&stored, &req, now + Duration::from_secs(105), &options);
    assert_eq!(eval.freshness, Freshness::StaleUsable);

    let eval =
        evaluate(&stored, &req, now + Duration::from_secs(150), &options);
    assert_eq!(eval.freshness, Freshness::StaleRevalidate);
}

#[test]
fn must_revalidate_forbids_stale_use() {
    let now = epoch();
    let stored = variant(
        response(
            200,
            &[
                ("cache-control", "max-age=100, must-revalidate"),
                ("date", &httpdate::fmt_http_date(now)),
            ],
        ),
        now,
    );
    let eval = evaluate(
        &stored,
        &CacheControl::default(),
        now + Duration::from_secs(150),
        &CacheOptions::default(),
    );
    assert_eq!(eval.freshness, Freshness::MustRevalidate);
}

#[test]
fn response_no_cache_always_revalidates() {
    let now = epoch();
    let stored = variant(
        response(
            200,
            &[
                ("cache-control", "max-age=100, no-cache"),
                ("date", &httpdate::fmt_http_date(now)),
            ],
        ),
        now,
    );
    let eval = evaluate(
        &stored,
        &CacheControl::default(),
        now + Duration::from_secs(1),
        &CacheOptions::default(),
    );
    assert_eq!(eval.freshness, Freshness::MustRevalidate);
}

#[test]
fn s_maxage_only_applies_to_shared_caches() {
    let now = epoch();
    let stored = variant(
        response(
            200,
            &[
                ("cache-control", "max-age=100, s-maxage=10"),
                ("date", &httpdate::fmt_http_date(now)),
            ],
        ),
        now,
    );
    let none = CacheControl::default();
    let when = now + Duration::from_secs(50);

    let private = CacheOptions::default();
    assert_eq!(
        evaluate(&stored, &none, when, &private).freshness,
        Freshness::Fresh
    );

    let shared = CacheOptions { shared: true, ..CacheOptions::default() };
    assert_eq!(
        evaluate(&stored, &none, when, &shared).freshness,
        Freshness::StaleUsable
    );
}

#[tokio::test]
async fn store_synthesizes_date_and_freezes_initial_age() -> Result<()> {
    let manager = MemoryManager::new();
    let req = request(Method::GET, "http://example.org/test");
    let request_time = epoch();
    let response_time = request_time + Duration::from_secs(2);

    let mut res = response(200, &[]);
    res.headers.insert("age", "10");
    let mut writer = manager.write(&req.cache_key()).await?;
    let stored =
        writer.store(&req, res, request_time, response_time, response_time)?;
    drop(writer);

    assert!(stored.response.date().is_some());
    // max(apparent 0, Age 10) + two seconds of response delay
    assert_eq!(stored.initial_age, Duration::from_secs(12));
    assert_eq!(
        stored.current_age(response_time + Duration::from_secs(3)),
        Duration::from_secs(15)
    );
    Ok(())
}

#[tokio::test]
async fn store_replaces_matching_variants() -> Result<()> {
    let manager = MemoryManager::new();
    let req = request(Method::GET, "http://example.org/test");
    let key = req.cache_key();
    let now = epoch();

    let mut writer = manager.write(&key).await?;
    writer.store(&req, response(200, &[]), now, now, now)?;
    let mut newer = response(200, &[]);
    newer.body = b"newer".to_vec();
    writer.store(&req, newer, now, now, now)?;
    drop(writer);

    let resource = manager.get(&key).await?.unwrap();
    assert_eq!(resource.variants.len(), 1);
    assert_eq!(resource.variants[0].response.body, b"newer");
    Ok(())
}

#[tokio::test]
async fn variants_accumulate_per_signature() -> Result<()> {
    let manager = MemoryManager::new();
    let mut gzip = request(Method::GET, "http://example.org/test");
    gzip.headers.insert("accept-encoding", "gzip");
    let mut brotli = request(Method::GET, "http://example.org/test");
    brotli.headers.insert("accept-encoding", "br");
    let key = gzip.cache_key();
    let now = epoch();

    let mut writer = manager.write(&key).await?;
    writer.store(
        &gzip,
        response(200, &[("vary", "Accept-Encoding")]),
        now,
        now,
        now,
    )?;
    writer.store(
        &brotli,
        response(200, &[("vary", "Accept-Encoding")]),
        now,
        now,
        now,
    )?;
    drop(writer);

    let resource = manager.get(&key).await?.unwrap();
    assert_eq!(resource.variants.len(), 2);
    assert!(resource.select(&gzip).is_some());
    assert!(resource.select(&brotli).is_some());
    Ok(())
}

#[tokio::test]
async fn freshen_merges_headers_but_keeps_the_body() -> Result<()> {
    let manager = MemoryManager::new();
    let req = request(Method::GET, "http://example.org/test");
    let key = req.cache_key();
    let stored_time = epoch();

    let mut writer = manager.write(&key).await?;
    writer.store(
        &req,
        response(
            200,
            &[
                ("cache-control", "max-age=1"),
                ("content-length", "4"),
                ("etag", "\"v1\""),
            ],
        ),
        stored_time,
        stored_time,
        stored_time,
    )?;

    let revalidated = stored_time + Duration::from_secs(5);
    let mut not_modified = response(304, &[]);
    not_modified.body = Vec::new();
    not_modified.headers.insert("cache-control", "max-age=100");
    not_modified
        .headers
        .insert("date", httpdate::fmt_http_date(revalidated));
    // a 304 has no body, so it must not disturb body metadata
    not_modified.headers.insert("content-length", "0");

    let refreshed = writer
        .freshen(&req, &not_modified, revalidated, revalidated)?
        .unwrap();
    drop(writer);

    assert_eq!(refreshed.response.body, TEST_BODY);
    assert_eq!(
        refreshed.response.headers.get("cache-control"),
        Some("max-age=100")
    );
    assert_eq!(refreshed.response.headers.get("content-length"), Some("4"));
    assert_eq!(refreshed.response.headers.get("etag"), Some("\"v1\""));
    assert_eq!(refreshed.initial_age, Duration::ZERO);
    assert_eq!(refreshed.response_time, revalidated);
    Ok(())
}

#[tokio::test]
async fn delete_removes_the_resource() -> Result<()> {
    let manager = MemoryManager::new();
    let req = request(Method::GET, "http://example.org/test");
    let key = req.cache_key();
    let now = epoch();

    let mut writer = manager.write(&key).await?;
    writer.store(&req, response(200, &[]), now, now, now)?;
    drop(writer);
    assert!(manager.get(&key).await?.is_some());

    manager.delete(&key).await?;
    assert!(manager.get(&key).await?.is_none());
    Ok(())
}
