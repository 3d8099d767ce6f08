//! Pipeline run state machine
//!
//! IDLE → HARVESTING → CACHE_WRITTEN → RESOLVING_AFFILIATIONS → GEOCODING → DONE
//!
//! HARVESTING and CACHE_WRITTEN are skipped when a cache is loaded. Any state
//! may move to the terminal PARTIAL state on an irrecoverable condition.

use chrono::{DateTime, Utc};
use citemap_common::AffiliationPolicy;
use serde::{Deserialize, Serialize};

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarvestState {
    Idle,
    /// Profile fetch + concurrent citing-work discovery
    Harvesting,
    /// Pre-resolution snapshot persisted
    CacheWritten,
    ResolvingAffiliations,
    /// Sequential geocode lookups
    Geocoding,
    Done,
    /// Run ended early; harvested data (if any) is preserved in the cache
    Partial,
}

impl HarvestState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HarvestState::Done | HarvestState::Partial)
    }
}

/// State transition event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub old_state: HarvestState,
    pub new_state: HarvestState,
    pub transitioned_at: DateTime<Utc>,
}

/// One pipeline run for one subject identifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestSession {
    pub identifier: String,
    pub policy: AffiliationPolicy,
    pub state: HarvestState,
    pub transitions: Vec<StateTransition>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl HarvestSession {
    pub fn new(identifier: impl Into<String>, policy: AffiliationPolicy) -> Self {
        Self {
            identifier: identifier.into(),
            policy,
            state: HarvestState::Idle,
            transitions: Vec::new(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Transition to new state
    pub fn transition_to(&mut self, new_state: HarvestState) -> &StateTransition {
        tracing::debug!(
            identifier = %self.identifier,
            from = ?self.state,
            to = ?new_state,
            "Pipeline state transition"
        );

        self.transitions.push(StateTransition {
            old_state: self.state,
            new_state,
            transitioned_at: Utc::now(),
        });
        self.state = new_state;

        if new_state.is_terminal() {
            self.ended_at = Some(Utc::now());
        }

        &self.transitions[self.transitions.len() - 1]
    }

    /// States visited so far, starting with IDLE
    pub fn visited_states(&self) -> Vec<HarvestState> {
        let mut states = vec![HarvestState::Idle];
        states.extend(self.transitions.iter().map(|t| t.new_state));
        states
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_is_idle() {
        let session = HarvestSession::new("abc", AffiliationPolicy::Aggressive);
        assert_eq!(session.state, HarvestState::Idle);
        assert!(session.ended_at.is_none());
        assert_eq!(session.visited_states(), vec![HarvestState::Idle]);
    }

    #[test]
    fn test_terminal_transition_sets_end_time() {
        let mut session = HarvestSession::new("abc", AffiliationPolicy::Conservative);
        session.transition_to(HarvestState::Harvesting);
        assert!(session.ended_at.is_none());

        let transition = session.transition_to(HarvestState::Partial);
        assert_eq!(transition.old_state, HarvestState::Harvesting);
        assert!(session.is_terminal());
        assert!(session.ended_at.is_some());
        assert_eq!(
            session.visited_states(),
            vec![HarvestState::Idle, HarvestState::Harvesting, HarvestState::Partial]
        );
    }

    #[test]
    fn test_state_serializes_screaming_snake_case() {
        let json = serde_json::to_string(&HarvestState::ResolvingAffiliations).unwrap();
        assert_eq!(json, "\"RESOLVING_AFFILIATIONS\"");
    }
}
