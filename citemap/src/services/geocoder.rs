//! Institution geocoding
//!
//! [`GeocodeResolver`] turns an affiliation name into a [`GeoPoint`] by trying
//! an ordered list of query variants (most specific first) against a
//! [`Geocoder`] backend and stopping at the first hit. Every variant outcome,
//! hit or miss, is cached; a cached variant never reaches the network again.
//!
//! Lookups are strictly sequential (`&mut self`), per the provider's usage
//! policy.

use crate::models::GeoPoint;
use crate::services::affiliation_resolver::is_role_phrase;
use crate::utils::countries::{is_country, split_country_aware};
use crate::utils::{execute_with_retry, RetryError, RetryPolicy};
use async_trait::async_trait;
use citemap_common::config::{write_atomic, GeocodeSettings};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU32;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// File name of the persisted per-variant cache
pub const GEOCODE_CACHE_FILE: &str = "geocode_cache.json";

const GEOCODE_CACHE_FORMAT_VERSION: u32 = 1;

/// Geocoding errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeocodeError {
    #[error("Geocoder transport error: {0}")]
    Transport(String),

    #[error("Geocoder returned HTTP {0}")]
    Status(u16),

    #[error("Geocoder rate limit exceeded")]
    RateLimited,

    #[error("Malformed geocoder response: {0}")]
    Parse(String),

    #[error("Geocode cache error: {0}")]
    Cache(String),
}

impl GeocodeError {
    pub fn is_retryable(&self) -> bool {
        match self {
            GeocodeError::Transport(_) | GeocodeError::RateLimited => true,
            GeocodeError::Status(code) => *code >= 500 || *code == 408,
            GeocodeError::Parse(_) | GeocodeError::Cache(_) => false,
        }
    }
}

/// A single geocoder match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoHit {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub country: Option<String>,
}

/// Free-text place lookup backend
#[async_trait]
pub trait Geocoder: Send + Sync {
    /// Best match for `query`, `Ok(None)` when the backend knows no such place
    async fn lookup(&self, query: &str) -> Result<Option<GeoHit>, GeocodeError>;
}

/// Nominatim `/search` backend, rate limited with `governor`
pub struct NominatimGeocoder {
    client: reqwest::Client,
    endpoint: String,
    rate_limiter: governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
}

#[derive(Debug, Deserialize)]
struct NominatimPlace {
    lat: String,
    lon: String,
    #[serde(default)]
    address: Option<NominatimAddress>,
}

#[derive(Debug, Deserialize)]
struct NominatimAddress {
    #[serde(default)]
    country: Option<String>,
}

impl NominatimGeocoder {
    pub fn new(settings: &GeocodeSettings) -> Result<Self, GeocodeError> {
        let per_second = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = governor::RateLimiter::direct(governor::Quota::per_second(per_second));

        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.as_str())
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.trim_end_matches('/').to_string(),
            rate_limiter,
        })
    }
}

#[async_trait]
impl Geocoder for NominatimGeocoder {
    async fn lookup(&self, query: &str) -> Result<Option<GeoHit>, GeocodeError> {
        self.rate_limiter.until_ready().await;

        let url = reqwest::Url::parse_with_params(
            &format!("{}/search", self.endpoint),
            &[
                ("q", query),
                ("format", "jsonv2"),
                ("addressdetails", "1"),
                ("limit", "1"),
                ("accept-language", "en"),
            ],
        )
        .map_err(|e| GeocodeError::Parse(format!("invalid endpoint: {}", e)))?;

        tracing::debug!(query = %query, "Querying geocoder");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(GeocodeError::RateLimited);
        }
        if !status.is_success() {
            return Err(GeocodeError::Status(status.as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| GeocodeError::Transport(e.to_string()))?;
        parse_search_response(&body)
    }
}

/// First place of a Nominatim `jsonv2` search response
pub fn parse_search_response(body: &str) -> Result<Option<GeoHit>, GeocodeError> {
    let places: Vec<NominatimPlace> =
        serde_json::from_str(body).map_err(|e| GeocodeError::Parse(e.to_string()))?;

    let Some(place) = places.into_iter().next() else {
        return Ok(None);
    };

    let latitude = place
        .lat
        .parse::<f64>()
        .map_err(|_| GeocodeError::Parse(format!("latitude '{}'", place.lat)))?;
    let longitude = place
        .lon
        .parse::<f64>()
        .map_err(|_| GeocodeError::Parse(format!("longitude '{}'", place.lon)))?;

    Ok(Some(GeoHit {
        latitude,
        longitude,
        country: place.address.and_then(|a| a.country),
    }))
}

static PARENTHETICAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\([^)]*\)").expect("static regex is valid"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex is valid"));
static AT_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\s+at\s+|\s*@\s*").expect("static regex is valid"));

/// Collapse whitespace and strip residual qualifiers and edge punctuation
pub fn normalize_name(name: &str) -> String {
    let without_qualifiers = PARENTHETICAL.replace_all(name, " ");
    let collapsed = WHITESPACE.replace_all(without_qualifiers.trim(), " ");
    collapsed
        .trim_matches(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | ':' | '-' | '.'))
        .to_string()
}

/// How query variants are derived from one affiliation name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantPolicy {
    /// Try the text after the first "at" / "@"
    pub split_on_at: bool,
    /// Delimiters used for progressive shortening, in order
    pub delimiters: Vec<String>,
    /// Try the suffixes left after dropping leading segments
    pub drop_leading_segments: bool,
    pub max_variants: usize,
}

impl Default for VariantPolicy {
    fn default() -> Self {
        VariantPolicy::from(&GeocodeSettings::default())
    }
}

impl From<&GeocodeSettings> for VariantPolicy {
    fn from(settings: &GeocodeSettings) -> Self {
        Self {
            split_on_at: settings.split_on_at,
            delimiters: settings.delimiters.clone(),
            drop_leading_segments: settings.drop_leading_segments,
            max_variants: settings.max_variants.max(1),
        }
    }
}

impl VariantPolicy {
    /// Ordered query variants for `name`, most specific first
    ///
    /// Full string, then the text after "at"/"@", then (per delimiter) the
    /// suffixes left by dropping leading segments, then each segment alone.
    /// Role phrases and bare country names are never queried.
    pub fn candidate_variants(&self, name: &str) -> Vec<String> {
        let normalized = normalize_name(name);
        let mut variants: Vec<String> = Vec::new();
        if normalized.is_empty() {
            return variants;
        }

        let mut bases = vec![normalized.clone()];
        if self.split_on_at {
            if let Some(after) = AT_SEPARATOR.splitn(&normalized, 2).nth(1) {
                let after = normalize_name(after);
                if !after.is_empty() {
                    bases.push(after);
                }
            }
        }

        let mut ordered: Vec<String> = bases.clone();
        for base in &bases {
            for delimiter in self.delimiters.iter().filter(|d| !d.is_empty()) {
                let segments = split_country_aware(base, delimiter);
                if segments.len() < 2 {
                    continue;
                }
                if self.drop_leading_segments {
                    for start in 1..segments.len() {
                        ordered.push(segments[start..].join(", "));
                    }
                }
                ordered.extend(segments);
            }
        }

        for candidate in ordered {
            let candidate = normalize_name(&candidate);
            if candidate.is_empty()
                || variants.contains(&candidate)
                || is_country(&candidate)
                || is_role_phrase(&candidate)
            {
                continue;
            }
            variants.push(candidate);
            if variants.len() >= self.max_variants {
                break;
            }
        }
        variants
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedGeocodeCache {
    format_version: u32,
    entries: BTreeMap<String, Option<GeoHit>>,
}

/// Sequential, caching resolver from affiliation names to coordinates
pub struct GeocodeResolver<G> {
    geocoder: G,
    variants: VariantPolicy,
    retry: RetryPolicy,
    /// Query variant -> outcome (None = confirmed miss)
    cache: HashMap<String, Option<GeoHit>>,
    dirty: bool,
}

impl<G: Geocoder> GeocodeResolver<G> {
    pub fn new(geocoder: G, variants: VariantPolicy, retry: RetryPolicy) -> Self {
        Self {
            geocoder,
            variants,
            retry,
            cache: HashMap::new(),
            dirty: false,
        }
    }

    /// Seed the variant cache from a previous run; in-memory outcomes win
    pub fn seed_cache(&mut self, entries: HashMap<String, Option<GeoHit>>) {
        for (query, outcome) in entries {
            self.cache.entry(query).or_insert(outcome);
        }
    }

    pub fn geocoder(&self) -> &G {
        &self.geocoder
    }

    pub fn cached_variants(&self) -> usize {
        self.cache.len()
    }

    /// True when new outcomes were cached since construction
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Coordinates for `name`, `None` when no variant can be located
    ///
    /// Stops at the first variant with a hit. A lookup whose retries are
    /// exhausted is not cached and leaves `name` un-locatable for this call.
    pub async fn geocode(&mut self, name: &str) -> Option<GeoPoint> {
        let normalized = normalize_name(name);
        if normalized.is_empty() {
            return None;
        }

        for variant in self.variants.candidate_variants(&normalized) {
            let outcome = match self.cache.get(&variant) {
                Some(cached) => {
                    tracing::trace!(query = %variant, hit = cached.is_some(), "Geocode cache hit");
                    cached.clone()
                }
                None => match self.lookup_with_retry(&variant).await {
                    Ok(outcome) => {
                        self.cache.insert(variant.clone(), outcome.clone());
                        self.dirty = true;
                        outcome
                    }
                    Err(e) => {
                        tracing::warn!(
                            name = %normalized,
                            query = %variant,
                            error = %e,
                            "Geocode lookup failed, institution left un-located"
                        );
                        return None;
                    }
                },
            };

            if let Some(hit) = outcome {
                tracing::debug!(name = %normalized, query = %variant, "Institution located");
                return Some(GeoPoint {
                    affiliation_name: normalized,
                    latitude: hit.latitude,
                    longitude: hit.longitude,
                    country: hit.country,
                });
            }
        }

        tracing::debug!(name = %normalized, "No geocode variant matched");
        None
    }

    async fn lookup_with_retry(
        &self,
        query: &str,
    ) -> Result<Option<GeoHit>, RetryError<GeocodeError>> {
        let geocoder = &self.geocoder;
        execute_with_retry("geocode", &self.retry, GeocodeError::is_retryable, move |_| {
            geocoder.lookup(query)
        })
        .await
    }

    /// Write the variant cache atomically
    pub fn save_cache(&self, path: &Path) -> Result<(), GeocodeError> {
        let persisted = PersistedGeocodeCache {
            format_version: GEOCODE_CACHE_FORMAT_VERSION,
            entries: self
                .cache
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let json = serde_json::to_vec_pretty(&persisted)
            .map_err(|e| GeocodeError::Cache(e.to_string()))?;
        write_atomic(path, &json).map_err(|e| GeocodeError::Cache(e.to_string()))?;
        tracing::debug!(path = %path.display(), entries = persisted.entries.len(), "Geocode cache saved");
        Ok(())
    }
}

/// Read a persisted variant cache; a missing file is an empty cache
pub fn load_geocode_cache(path: &Path) -> Result<HashMap<String, Option<GeoHit>>, GeocodeError> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let bytes = std::fs::read(path).map_err(|e| GeocodeError::Cache(e.to_string()))?;
    let persisted: PersistedGeocodeCache =
        serde_json::from_slice(&bytes).map_err(|e| GeocodeError::Cache(e.to_string()))?;
    if persisted.format_version != GEOCODE_CACHE_FORMAT_VERSION {
        tracing::warn!(
            path = %path.display(),
            version = persisted.format_version,
            "Ignoring geocode cache with unknown format version"
        );
        return Ok(HashMap::new());
    }
    Ok(persisted.entries.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("  Yale   University (New Haven) , "), "Yale University");
        assert_eq!(normalize_name("MIT."), "MIT");
        assert_eq!(normalize_name("   "), "");
    }

    #[test]
    fn test_variants_after_at_come_second() {
        let variants = VariantPolicy::default().candidate_variants("Assistant Professor at Yale University");
        // The full string reads as a role and is never queried
        assert_eq!(variants, vec!["Yale University"]);
    }

    #[test]
    fn test_variants_progressive_shortening() {
        let variants = VariantPolicy::default()
            .candidate_variants("School of Computing, National University of Singapore, Singapore");
        assert_eq!(
            variants,
            vec![
                "School of Computing, National University of Singapore, Singapore",
                "National University of Singapore, Singapore",
                "School of Computing",
            ]
        );
    }

    #[test]
    fn test_variants_respect_max() {
        let policy = VariantPolicy {
            max_variants: 2,
            ..VariantPolicy::default()
        };
        let variants = policy.candidate_variants("A Lab, B Institute, C University, Boston");
        assert_eq!(variants.len(), 2);
        assert_eq!(variants[0], "A Lab, B Institute, C University, Boston");
    }

    #[test]
    fn test_variants_without_splitting() {
        let policy = VariantPolicy {
            split_on_at: false,
            delimiters: vec![],
            drop_leading_segments: false,
            max_variants: 6,
        };
        assert_eq!(
            policy.candidate_variants("Lab at Yale University, New Haven"),
            vec!["Lab at Yale University, New Haven"]
        );
    }

    #[test]
    fn test_field_word_in_institution_name_is_queried() {
        let variants = VariantPolicy::default().candidate_variants("Harbin Engineering University");
        assert_eq!(variants, vec!["Harbin Engineering University"]);
    }

    #[test]
    fn test_bare_country_never_queried() {
        let variants = VariantPolicy::default().candidate_variants("Peking University, China");
        assert_eq!(variants, vec!["Peking University, China"]);
    }

    #[test]
    fn test_parse_search_response() {
        let body = r#"[{"lat":"41.3163","lon":"-72.9223","display_name":"Yale University","address":{"country":"United States"}}]"#;
        let hit = parse_search_response(body).unwrap().unwrap();
        assert!((hit.latitude - 41.3163).abs() < 1e-9);
        assert!((hit.longitude + 72.9223).abs() < 1e-9);
        assert_eq!(hit.country.as_deref(), Some("United States"));

        assert_eq!(parse_search_response("[]").unwrap(), None);
        assert!(matches!(
            parse_search_response(r#"{"error":"x"}"#),
            Err(GeocodeError::Parse(_))
        ));
    }

    #[test]
    fn test_geocode_error_retryable() {
        assert!(GeocodeError::Transport("timeout".into()).is_retryable());
        assert!(GeocodeError::RateLimited.is_retryable());
        assert!(GeocodeError::Status(502).is_retryable());
        assert!(!GeocodeError::Status(400).is_retryable());
        assert!(!GeocodeError::Parse("x".into()).is_retryable());
    }
}
