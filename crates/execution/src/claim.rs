//! Optimistic mission claiming shared with sibling schedulers.

use mission_core::{ClaimRequest, Mission, SessionKey};
use mission_storage::{Result, Storage};

/// Outcome of trying to own a mission.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    /// This call claimed the mission
    Claimed(Mission),
    /// This engine instance already owns it
    Owned(Mission),
    /// Someone else holds it, or it is not claimable
    Lost(String),
}

/// Claims missions under this engine's prefix and instance.
#[derive(Debug, Clone)]
pub struct ClaimProtocol {
    prefix: String,
    instance: String,
}

impl ClaimProtocol {
    /// Create a protocol for one engine instance.
    pub fn new(prefix: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            instance: instance.into(),
        }
    }

    /// Whether this instance owns the mission.
    pub fn owns(&self, mission: &Mission) -> bool {
        mission
            .session_key
            .as_ref()
            .map_or(false, |key| key.is_owned_by(&self.prefix, &self.instance))
    }

    /// Whether the mission is owned by nobody or by this instance.
    pub fn may_recover(&self, mission: &Mission) -> bool {
        mission.session_key.is_none() || self.owns(mission)
    }

    /// Mint a fresh claim token.
    pub fn mint(&self) -> SessionKey {
        SessionKey::mint(&self.prefix, &self.instance)
    }

    /// Own the mission, claiming it with one conditional write if needed.
    pub async fn acquire(&self, storage: &dyn Storage, mission: &Mission) -> Result<ClaimOutcome> {
        if self.owns(mission) {
            return Ok(ClaimOutcome::Owned(mission.clone()));
        }
        if !mission.status.is_claimable() {
            let holder = mission
                .session_key
                .as_ref()
                .map(|k| format!(" (held by {})", k.prefix()))
                .unwrap_or_default();
            return Ok(ClaimOutcome::Lost(format!(
                "Mission {} is {}{}",
                mission.id, mission.status, holder
            )));
        }
        if !mission.is_lifecycle_ready() {
            return Ok(ClaimOutcome::Lost(format!("Mission {} lifecycle not ready", mission.id)));
        }

        let request = ClaimRequest::new(self.mint());
        match storage.claim_mission(&mission.id, &request).await? {
            Some(claimed) => {
                tracing::info!("Claimed mission {} as {}", claimed.id, request.session_key);
                Ok(ClaimOutcome::Claimed(claimed))
            }
            None => {
                tracing::debug!("Lost claim race for mission {}", mission.id);
                Ok(ClaimOutcome::Lost(format!(
                    "Mission {} was claimed by another scheduler",
                    mission.id
                )))
            }
        }
    }
}
