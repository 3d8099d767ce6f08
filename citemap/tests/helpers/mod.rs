//! Test doubles for the upstream source and the geocoder
//!
//! Both record every call so tests can assert on network traffic without a
//! network.

#![allow(dead_code)]

use async_trait::async_trait;
use citemap::models::{Author, CitingWork, Publication};
use citemap::services::{
    CitingWorkStream, FetchFailure, GeoHit, GeocodeError, Geocoder, SourceClient, SourceError,
    WorkUnit,
};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Scripted [`SourceClient`]
#[derive(Default)]
pub struct FakeSource {
    profile: Vec<Publication>,
    profile_error: Option<SourceError>,
    /// Items yielded per publication title, in order
    works: HashMap<String, Vec<Result<CitingWork, SourceError>>>,
    profile_calls: AtomicUsize,
    citing_calls: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subject publication with the given citing works
    pub fn with_publication(mut self, title: &str, works: Vec<CitingWork>) -> Self {
        self.profile
            .push(Publication::subject(title, works.len() as u32, vec![format!("cites-{}", title)]));
        self.works
            .insert(title.to_string(), works.into_iter().map(Ok).collect());
        self
    }

    /// Add a subject publication whose citing-works walk yields `items` verbatim
    pub fn with_scripted_publication(
        mut self,
        title: &str,
        items: Vec<Result<CitingWork, SourceError>>,
    ) -> Self {
        self.profile
            .push(Publication::subject(title, 0, vec![format!("cites-{}", title)]));
        self.works.insert(title.to_string(), items);
        self
    }

    /// Make `fetch_profile` fail
    pub fn with_profile_error(mut self, error: SourceError) -> Self {
        self.profile_error = Some(error);
        self
    }

    pub fn profile_calls(&self) -> usize {
        self.profile_calls.load(Ordering::SeqCst)
    }

    pub fn citing_calls(&self) -> usize {
        self.citing_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.profile_calls() + self.citing_calls()
    }
}

#[async_trait]
impl SourceClient for FakeSource {
    async fn fetch_profile(&self, _identifier: &str) -> Result<Vec<Publication>, SourceError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        match &self.profile_error {
            Some(error) => Err(error.clone()),
            None => Ok(self.profile.clone()),
        }
    }

    fn fetch_citing_works<'a>(&'a self, publication: &'a Publication) -> CitingWorkStream<'a> {
        self.citing_calls.fetch_add(1, Ordering::SeqCst);
        let items = self
            .works
            .get(&publication.title)
            .cloned()
            .unwrap_or_default();
        stream::iter(items).boxed()
    }
}

/// Citing work by `author` (affiliation line `affiliation`) in `paper`
pub fn work(author: &str, affiliation: Option<&str>, paper: &str) -> CitingWork {
    let mut observed = Author::new(author);
    if let Some(line) = affiliation {
        observed.raw_affiliation_strings.push(line.to_string());
    }
    CitingWork {
        author: observed,
        citing_paper: Publication::citing(paper, 1),
    }
}

/// Citing work by an author with a verified organization and no free text
pub fn verified_work(author: &str, organization: &str, domain: &str, paper: &str) -> CitingWork {
    let mut observed = Author::new(author);
    observed.verified_organization = Some(organization.to_string());
    observed.verified_email_domain = Some(domain.to_string());
    CitingWork {
        author: observed,
        citing_paper: Publication::citing(paper, 1),
    }
}

pub fn blocked(title: &str) -> SourceError {
    SourceError::Blocked {
        unit: WorkUnit::Publication(title.to_string()),
        reason: "captcha".to_string(),
    }
}

pub fn exhausted(title: &str) -> SourceError {
    SourceError::FetchExhausted {
        unit: WorkUnit::Publication(title.to_string()),
        attempts: 3,
        cause: FetchFailure::Status(503),
    }
}

pub fn author_exhausted(author_id: &str) -> SourceError {
    SourceError::FetchExhausted {
        unit: WorkUnit::Author(author_id.to_string()),
        attempts: 3,
        cause: FetchFailure::Transport("connection reset".to_string()),
    }
}

/// Scripted [`Geocoder`]: known queries hit, failing queries error, the rest miss
#[derive(Default)]
pub struct FakeGeocoder {
    hits: HashMap<String, GeoHit>,
    failing: HashMap<String, GeocodeError>,
    queries: Mutex<Vec<String>>,
}

impl FakeGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hit(mut self, query: &str, latitude: f64, longitude: f64, country: &str) -> Self {
        self.hits.insert(
            query.to_string(),
            GeoHit {
                latitude,
                longitude,
                country: Some(country.to_string()),
            },
        );
        self
    }

    pub fn with_failure(mut self, query: &str, error: GeocodeError) -> Self {
        self.failing.insert(query.to_string(), error);
        self
    }

    /// Every query received, in order
    pub fn queries(&self) -> Vec<String> {
        self.queries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn query_count(&self, query: &str) -> usize {
        self.queries().iter().filter(|q| q.as_str() == query).count()
    }
}

#[async_trait]
impl Geocoder for FakeGeocoder {
    async fn lookup(&self, query: &str) -> Result<Option<GeoHit>, GeocodeError> {
        self.queries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(query.to_string());
        if let Some(error) = self.failing.get(query) {
            return Err(error.clone());
        }
        Ok(self.hits.get(query).cloned())
    }
}
