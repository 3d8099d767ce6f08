//! Service modules for the citation pipeline
//!
//! Leaf to root: source client (+ rate limiter, parser), affiliation
//! resolver, geocoder, cache store, harvester, export, orchestrator.

pub mod affiliation_resolver;
pub mod cache_store;
pub mod export;
pub mod geocoder;
pub mod harvester;
pub mod pipeline_orchestrator;
pub mod rate_limiter;
pub mod scholar_client;
pub mod scholar_parser;
pub mod source_client;

pub use affiliation_resolver::{resolve, resolve_all};
pub use cache_store::{CacheEnvelope, CacheError, CacheStore};
pub use export::write_citation_csv;
pub use geocoder::{
    GeoHit, GeocodeError, GeocodeResolver, Geocoder, NominatimGeocoder, VariantPolicy,
};
pub use harvester::{HarvestOutcome, ParallelHarvester};
pub use pipeline_orchestrator::{PipelineOptions, PipelineOrchestrator};
pub use rate_limiter::{RateLimiterConfig, RateLimiterHandle};
pub use scholar_client::{ProxyMode, ScholarClient};
pub use scholar_parser::ScholarParseError;
pub use source_client::{CitingWorkStream, FetchFailure, SourceClient, SourceError, WorkUnit};
