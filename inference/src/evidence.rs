//! Evidence handling for a scored video
//!
//! ```text
//! Received -> Scored -> Discarded
//!                    -> Anchoring -> Anchored -> Recorded
//! ```
//!
//! A positive decision always ends in exactly one record insert. When the
//! anchor service stays unavailable after its retries, the record is still
//! written, flagged as unanchored, and points at the retained local copy.

use crate::aggregation::Decision;
use crate::anchor::AnchorService;
use crate::error::{AnomalyError, Result};
use crate::store::AlertStore;
use crate::types::{AlertMetadata, AlertRecord, ContentIdentifier, RecordId, SourceVideo};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EvidenceState {
    Received,
    Scored,
    Discarded,
    Anchoring,
    Anchored,
    Recorded,
}

/// What happened to one video's evidence
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceOutcome {
    /// Terminal state: `Discarded` or `Recorded`
    pub state: EvidenceState,
    pub transitions: Vec<EvidenceState>,
    pub record_id: Option<RecordId>,
    pub content_id: Option<ContentIdentifier>,
    pub footage_url: Option<String>,
    pub anchor_attempts: u32,
    pub anchored: bool,
}

impl EvidenceOutcome {
    fn new() -> Self {
        Self {
            state: EvidenceState::Received,
            transitions: vec![EvidenceState::Received],
            record_id: None,
            content_id: None,
            footage_url: None,
            anchor_attempts: 0,
            anchored: false,
        }
    }

    fn advance(&mut self, state: EvidenceState, video: &str) {
        log::info!("[{}] {:?} -> {:?}", video, self.state, state);
        self.state = state;
        self.transitions.push(state);
    }
}

/// Anchors and records positive decisions, discards negative ones
pub struct EvidencePipeline {
    anchor: Arc<dyn AnchorService>,
    store: Arc<dyn AlertStore>,
    anchor_retries: u32,
    delete_transient: bool,
}

impl EvidencePipeline {
    pub fn new(anchor: Arc<dyn AnchorService>, store: Arc<dyn AlertStore>) -> Self {
        Self {
            anchor,
            store,
            anchor_retries: 1,
            delete_transient: true,
        }
    }

    /// Extra anchor attempts after the first failure
    pub fn with_anchor_retries(mut self, retries: u32) -> Self {
        self.anchor_retries = retries;
        self
    }

    pub fn with_transient_cleanup(mut self, delete: bool) -> Self {
        self.delete_transient = delete;
        self
    }

    pub fn process(
        &self,
        decision: &Decision,
        source: SourceVideo,
        metadata: &AlertMetadata,
    ) -> Result<EvidenceOutcome> {
        let mut outcome = EvidenceOutcome::new();
        outcome.advance(EvidenceState::Scored, &source.name);

        if !decision.alert {
            outcome.advance(EvidenceState::Discarded, &source.name);
            self.remove_transient(&source);
            return Ok(outcome);
        }

        outcome.advance(EvidenceState::Anchoring, &source.name);
        let cid = self.anchor_with_retry(&source, &mut outcome);

        let footage_url = match &cid {
            Some(cid) => {
                outcome.advance(EvidenceState::Anchored, &source.name);
                self.anchor.gateway_url(cid)
            }
            None => {
                let local = source.local_reference();
                log::error!(
                    "[{}] alert recorded WITHOUT anchored evidence; footage kept at {}",
                    source.name,
                    local
                );
                local
            }
        };

        let record = AlertRecord::new(metadata, footage_url.clone(), cid.is_some(), decision.video_score);
        let record_id = self.store.insert(&record).map_err(|e| {
            log::error!("[{}] failed to persist alert record: {}", source.name, e);
            match e {
                AnomalyError::RecordPersistFailed(_) => e,
                other => AnomalyError::record_persist(other.to_string()),
            }
        })?;

        outcome.anchored = cid.is_some();
        outcome.content_id = cid;
        outcome.footage_url = Some(footage_url);
        outcome.record_id = Some(record_id);
        outcome.advance(EvidenceState::Recorded, &source.name);

        if outcome.anchored {
            self.remove_transient(&source);
        }
        Ok(outcome)
    }

    fn anchor_with_retry(&self, source: &SourceVideo, outcome: &mut EvidenceOutcome) -> Option<ContentIdentifier> {
        let attempts = self.anchor_retries.saturating_add(1);
        for attempt in 1..=attempts {
            outcome.anchor_attempts = attempt;
            match self.anchor.anchor(&source.name, &source.bytes) {
                Ok(cid) => return Some(cid),
                Err(e) if e.is_transient() && attempt < attempts => {
                    log::warn!(
                        "[{}] anchor attempt {}/{} failed: {}; retrying",
                        source.name,
                        attempt,
                        attempts,
                        e
                    );
                }
                Err(e) => {
                    log::error!("[{}] anchor attempt {}/{} failed: {}", source.name, attempt, attempts, e);
                    return None;
                }
            }
        }
        None
    }

    fn remove_transient(&self, source: &SourceVideo) {
        if !self.delete_transient {
            return;
        }
        if let Some(path) = &source.transient_path {
            match std::fs::remove_file(path) {
                Ok(()) => log::debug!("Removed transient file {}", path.display()),
                Err(e) => log::warn!("Failed to remove transient file {}: {}", path.display(), e),
            }
        }
    }
}
