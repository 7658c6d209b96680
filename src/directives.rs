use std::{collections::hash_map::Entry, collections::HashMap, time::Duration};

use crate::{
    error::{CacheError, Result},
    response::HttpHeaders,
};

const CACHE_CONTROL: &str = "cache-control";

/// Parsed `Cache-Control` directives.
///
/// Tokens are case-insensitive, repeated header fields are treated as
/// comma-concatenation, quoted-string arguments are unquoted, and unknown
/// directives are kept but otherwise ignored. A directive repeated with
/// conflicting values makes the freshness information invalid, which is
/// recorded by forcing `must-revalidate`.
#[derive(Debug, Clone, Default)]
pub struct CacheControl {
    directives: HashMap<Box<str>, Option<Box<str>>>,
}

impl CacheControl {
    /// Parses the `Cache-Control` header of a header set.
    ///
    /// Fails with [`CacheError::MalformedDirective`] only for syntactically
    /// irrecoverable input such as an unterminated quoted string.
    pub fn parse(headers: &HttpHeaders) -> Result<Self> {
        let mut directives = HashMap::new();
        let mut is_valid = true;

        for value in headers.values(CACHE_CONTROL) {
            for part in split_outside_quotes(value)? {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let mut kv = part.splitn(2, '=');
                let name = kv.next().unwrap_or_default().trim();
                if name.is_empty() {
                    continue;
                }
                let name = name.to_ascii_lowercase();
                let argument = match kv.next() {
                    Some(raw) => Some(unquote(raw)?),
                    None => None,
                };
                match directives.entry(name.into_boxed_str()) {
                    Entry::Occupied(e) => {
                        // Repeats with diverging values invalidate the
                        // freshness information (RFC 7234 §4.2.1).
                        if e.get() != &argument.map(String::into_boxed_str) {
                            is_valid = false;
                        }
                    }
                    Entry::Vacant(e) => {
                        e.insert(argument.map(String::into_boxed_str));
                    }
                }
            }
        }
        if !is_valid {
            directives.insert("must-revalidate".into(), None);
        }
        Ok(Self { directives })
    }

    /// Parses a request header set, honoring the `Pragma: no-cache`
    /// equivalence when no `Cache-Control` field is present.
    pub fn parse_request(headers: &HttpHeaders) -> Result<Self> {
        let mut parsed = Self::parse(headers)?;
        if !headers.contains_key(CACHE_CONTROL)
            && headers.comma_values("pragma").any(|p| {
                p.eq_ignore_ascii_case("no-cache")
            })
        {
            parsed.directives.insert("no-cache".into(), None);
        }
        Ok(parsed)
    }

    /// Like [`CacheControl::parse`], but a malformed header is logged and
    /// treated as absent instead of failing the request
    #[must_use]
    pub fn parse_lossy(headers: &HttpHeaders) -> Self {
        Self::parse(headers).unwrap_or_else(|err| {
            log::warn!("dropping malformed cache-control header: {err}");
            Self::default()
        })
    }

    /// Lossy variant of [`CacheControl::parse_request`]
    #[must_use]
    pub fn parse_request_lossy(headers: &HttpHeaders) -> Self {
        Self::parse_request(headers).unwrap_or_else(|err| {
            log::warn!("dropping malformed cache-control header: {err}");
            Self::default()
        })
    }

    /// Whether a directive is present, by case-insensitive token
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.directives.contains_key(name)
    }

    fn seconds(&self, name: &str) -> Option<Duration> {
        self.directives
            .get(name)?
            .as_deref()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_secs)
    }

    /// `max-age=Δ`
    #[must_use]
    pub fn max_age(&self) -> Option<Duration> {
        self.seconds("max-age")
    }

    /// `s-maxage=Δ`, meaningful only to shared caches
    #[must_use]
    pub fn s_maxage(&self) -> Option<Duration> {
        self.seconds("s-maxage")
    }

    /// `min-fresh=Δ`, the remaining freshness the client demands
    #[must_use]
    pub fn min_fresh(&self) -> Option<Duration> {
        self.seconds("min-fresh")
    }

    /// `max-stale[=Δ]`. `Some(None)` means the client accepts staleness of
    /// any age.
    #[must_use]
    pub fn max_stale(&self) -> Option<Option<Duration>> {
        let argument = self.directives.get("max-stale")?;
        Some(
            argument
                .as_deref()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
        )
    }

    /// `no-store`
    #[must_use]
    pub fn no_store(&self) -> bool {
        self.contains("no-store")
    }

    /// `no-cache`
    #[must_use]
    pub fn no_cache(&self) -> bool {
        self.contains("no-cache")
    }

    /// `only-if-cached`
    #[must_use]
    pub fn only_if_cached(&self) -> bool {
        self.contains("only-if-cached")
    }

    /// `must-revalidate`
    #[must_use]
    pub fn must_revalidate(&self) -> bool {
        self.contains("must-revalidate")
    }

    /// `public`
    #[must_use]
    pub fn public(&self) -> bool {
        self.contains("public")
    }

    /// `private`
    #[must_use]
    pub fn private(&self) -> bool {
        self.contains("private")
    }
}

/// The header field names a stored response varies on, lowercased, in the
/// order the response listed them. `*` is carried through as-is.
pub(crate) fn vary_fields(headers: &HttpHeaders) -> Vec<String> {
    headers
        .comma_values("vary")
        .map(str::to_ascii_lowercase)
        .collect()
}

/// Splits a header value on commas that sit outside quoted strings.
fn split_outside_quotes(value: &str) -> Result<Vec<&str>> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut in_quotes = false;
    let mut escaped = false;
    for (i, ch) in value.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(&value[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if in_quotes {
        return Err(CacheError::MalformedDirective(value.to_string()));
    }
    parts.push(&value[start..]);
    Ok(parts)
}

/// Unquotes a directive argument, resolving backslash escapes.
fn unquote(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let Some(inner) = raw.strip_prefix('"') else {
        return Ok(raw.to_string());
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    loop {
        match chars.next() {
            Some('\\') => match chars.next() {
                Some(c) => out.push(c),
                None => {
                    return Err(CacheError::MalformedDirective(raw.to_string()))
                }
            },
            Some('"') => return Ok(out),
            Some(c) => out.push(c),
            None => {
                return Err(CacheError::MalformedDirective(raw.to_string()))
            }
        }
    }
}
