//! Phase: GEOCODING
//!
//! One lookup per distinct institution, strictly sequential

use super::{distinct_institutions, PipelineOrchestrator};
use crate::models::{GeoPoint, HarvestSession, HarvestState, ResolvedAffiliation, RunSummary};
use crate::services::geocoder::{load_geocode_cache, Geocoder, GEOCODE_CACHE_FILE};
use std::collections::BTreeMap;

impl<G: Geocoder> PipelineOrchestrator<G> {
    /// GEOCODING: institution name → location (None = un-locatable)
    pub(super) async fn phase_geocoding(
        &mut self,
        session: &mut HarvestSession,
        resolved: &BTreeMap<String, ResolvedAffiliation>,
        summary: &mut RunSummary,
    ) -> BTreeMap<String, Option<GeoPoint>> {
        session.transition_to(HarvestState::Geocoding);

        let institutions = distinct_institutions(resolved);
        tracing::info!(
            identifier = %session.identifier,
            institutions = institutions.len(),
            "Phase: GEOCODING"
        );

        let persisted_path = self
            .cache
            .root()
            .filter(|_| self.options.persist_geocode_cache)
            .map(|root| root.join(GEOCODE_CACHE_FILE));

        if let Some(path) = &persisted_path {
            match load_geocode_cache(path) {
                Ok(entries) if !entries.is_empty() => {
                    tracing::debug!(entries = entries.len(), "Geocode cache loaded");
                    self.geocoder.seed_cache(entries);
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Ignoring unreadable geocode cache"),
            }
        }

        let mut locations = BTreeMap::new();
        for name in institutions {
            let location = self.geocoder.geocode(&name).await;
            locations.insert(name, location);
        }

        summary.institutions_located = locations.values().filter(|l| l.is_some()).count();
        summary.institutions_unlocated = locations.len() - summary.institutions_located;

        if let Some(path) = &persisted_path {
            if self.geocoder.is_dirty() {
                if let Err(e) = self.geocoder.save_cache(path) {
                    tracing::warn!(error = %e, "Failed to save geocode cache");
                }
            }
        }

        tracing::info!(
            located = summary.institutions_located,
            unlocated = summary.institutions_unlocated,
            "Institutions geocoded"
        );
        locations
    }
}
