//! Citation data model
//!
//! Entities are keyed by their natural identity: authors by display name
//! (citing authors carry no guaranteed stable upstream id), publications by
//! title. A `CitingRecord` refers to both by key, and `CitationDataset` is
//! the deduplicating set that owns them.

use citemap_common::AffiliationPolicy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A citing author as observed upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    /// Identity key
    pub display_name: String,

    /// Upstream profile id, when the citing paper linked one
    #[serde(default)]
    pub profile_id: Option<String>,

    /// Free-text affiliation lines, in first-seen order
    #[serde(default)]
    pub raw_affiliation_strings: Vec<String>,

    /// Official organization name; only set when the profile links a verified organization
    #[serde(default)]
    pub verified_organization: Option<String>,

    /// Domain of the confirmed email address shown on the profile
    #[serde(default)]
    pub verified_email_domain: Option<String>,
}

impl Author {
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            profile_id: None,
            raw_affiliation_strings: Vec::new(),
            verified_organization: None,
            verified_email_domain: None,
        }
    }

    /// Fold a later observation of the same author into this one
    ///
    /// Raw affiliation strings accumulate (no duplicates); every other field
    /// keeps its first-seen value and is only filled if still empty.
    pub fn merge_observation(&mut self, other: &Author) {
        for raw in &other.raw_affiliation_strings {
            if !self.raw_affiliation_strings.contains(raw) {
                self.raw_affiliation_strings.push(raw.clone());
            }
        }
        if self.profile_id.is_none() {
            self.profile_id = other.profile_id.clone();
        }
        if self.verified_organization.is_none() {
            self.verified_organization = other.verified_organization.clone();
        }
        if self.verified_email_domain.is_none() {
            self.verified_email_domain = other.verified_email_domain.clone();
        }
    }

    /// Organization name backed by a confirmed email domain
    pub fn verified_organization(&self) -> Option<&str> {
        let org = self.verified_organization.as_deref().map(str::trim)?;
        let domain = self.verified_email_domain.as_deref().map(str::trim)?;
        if org.is_empty() || domain.is_empty() {
            return None;
        }
        Some(org)
    }
}

/// A publication, either the subject's own (`subject = true`) or a citing work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    /// Identity key
    pub title: String,
    pub subject: bool,
    pub citation_count: u32,

    /// Upstream ids used to query the works citing this one (subject works only)
    #[serde(default)]
    pub cites_ids: Vec<String>,
}

impl Publication {
    pub fn subject(title: impl Into<String>, citation_count: u32, cites_ids: Vec<String>) -> Self {
        Self {
            title: title.into(),
            subject: true,
            citation_count,
            cites_ids,
        }
    }

    pub fn citing(title: impl Into<String>, citation_count: u32) -> Self {
        Self {
            title: title.into(),
            subject: false,
            citation_count,
            cites_ids: Vec::new(),
        }
    }

    /// Citation counts only ever move forward within a run
    pub fn refresh_citation_count(&mut self, observed: u32) {
        self.citation_count = self.citation_count.max(observed);
    }
}

/// One (author, citing paper, cited paper) citation event
///
/// Ordered and hashed on the full triple, which is its uniqueness key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CitingRecord {
    pub citing_author: String,
    pub citing_paper: String,
    pub cited_paper: String,
}

/// A single observation yielded by a source client while walking the works citing one publication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitingWork {
    pub author: Author,
    pub citing_paper: Publication,
}

/// Deduplicated set of harvested entities and citation records
///
/// This is the snapshot persisted by the cache store, before any affiliation
/// resolution. `BTreeMap`/`BTreeSet` make equality independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CitationDataset {
    authors: BTreeMap<String, Author>,
    publications: BTreeMap<String, Publication>,
    records: BTreeSet<CitingRecord>,
}

impl CitationDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one of the subject's own publications
    pub fn add_subject_publication(&mut self, publication: &Publication) {
        match self.publications.get_mut(&publication.title) {
            Some(existing) => {
                existing.subject = true;
                existing.refresh_citation_count(publication.citation_count);
                for id in &publication.cites_ids {
                    if !existing.cites_ids.contains(id) {
                        existing.cites_ids.push(id.clone());
                    }
                }
            }
            None => {
                self.publications
                    .insert(publication.title.clone(), publication.clone());
            }
        }
    }

    /// Materialise one citing-work observation against `cited`
    ///
    /// First-seen wins for every entity; a repeated author merges its raw
    /// affiliation strings. Returns `true` if the citation triple was new.
    pub fn insert_citation(&mut self, work: CitingWork, cited: &Publication) -> bool {
        let author_key = work.author.display_name.trim().to_string();
        let paper_key = work.citing_paper.title.trim().to_string();
        if author_key.is_empty() || paper_key.is_empty() {
            return false;
        }

        if !self.publications.contains_key(&cited.title) {
            self.add_subject_publication(cited);
        }

        match self.authors.get_mut(&author_key) {
            Some(existing) => existing.merge_observation(&work.author),
            None => {
                let mut author = work.author;
                author.display_name = author_key.clone();
                self.authors.insert(author_key.clone(), author);
            }
        }

        match self.publications.get_mut(&paper_key) {
            Some(existing) => {
                existing.refresh_citation_count(work.citing_paper.citation_count);
            }
            None => {
                let mut paper = work.citing_paper;
                paper.title = paper_key.clone();
                self.publications.insert(paper_key.clone(), paper);
            }
        }

        self.records.insert(CitingRecord {
            citing_author: author_key,
            citing_paper: paper_key,
            cited_paper: cited.title.clone(),
        })
    }

    pub fn author(&self, display_name: &str) -> Option<&Author> {
        self.authors.get(display_name)
    }

    pub fn publication(&self, title: &str) -> Option<&Publication> {
        self.publications.get(title)
    }

    pub fn authors(&self) -> impl Iterator<Item = &Author> {
        self.authors.values()
    }

    pub fn publications(&self) -> impl Iterator<Item = &Publication> {
        self.publications.values()
    }

    pub fn subject_publications(&self) -> impl Iterator<Item = &Publication> {
        self.publications.values().filter(|p| p.subject)
    }

    pub fn records(&self) -> impl Iterator<Item = &CitingRecord> {
        self.records.iter()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn author_count(&self) -> usize {
        self.authors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Outcome of affiliation resolution for one author
///
/// `resolved_name = None` is a valid terminal state: nothing could be
/// resolved under `policy`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedAffiliation {
    pub author: String,
    pub resolved_name: Option<String>,
    pub policy: AffiliationPolicy,
}

/// Geocoded institution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Normalized affiliation string that was looked up
    pub affiliation_name: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub country: Option<String>,
}

/// Final, fully annotated citation event handed to renderers/exporters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedRecord {
    pub citing_author: String,
    pub citing_paper: String,
    pub cited_paper: String,
    pub affiliation: Option<String>,
    pub location: Option<GeoPoint>,
}
