//! Reconciliation: decide what to do with a mapped record.
//!
//! Pure decision logic. Identity matching is by the source GUID stored on
//! the target dataset; change detection compares content fingerprints so
//! unchanged records cost the target catalog nothing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::HarvestError;
use crate::models::{HarvestObject, MappedRecord, ObjectState, SkipReason, TargetDataset};

/// The action the import stage should take for one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Create,
    /// Replace content, preserving the target-assigned identifier and any
    /// target-only fields outside the mapped schema.
    Update { dataset_id: String },
    Skip { reason: SkipReason },
    /// Explicit withdrawal signal: mark the existing dataset instead of
    /// pushing a content update.
    Withdraw { dataset_id: String },
}

/// Decide the action for `mapped` given the datasets currently claiming its
/// GUID in the target catalog.
///
/// More than one claimant is ambiguous and surfaces as
/// [`HarvestError::ReconciliationConflict`]; it is never auto-resolved.
pub fn reconcile(mapped: &MappedRecord, existing: &[TargetDataset]) -> Result<Action, HarvestError> {
    match existing {
        [] => {
            if mapped.withdrawn {
                // Nothing to withdraw; do not create a record the source
                // says is gone.
                Ok(Action::Skip {
                    reason: SkipReason::Withdrawn,
                })
            } else {
                Ok(Action::Create)
            }
        }
        [dataset] => {
            if mapped.withdrawn {
                return Ok(Action::Withdraw {
                    dataset_id: dataset.id.clone(),
                });
            }
            let fingerprint = mapped.fingerprint();
            if dataset.fingerprint.as_deref() == Some(fingerprint.as_str()) {
                Ok(Action::Skip {
                    reason: SkipReason::Unchanged,
                })
            } else {
                Ok(Action::Update {
                    dataset_id: dataset.id.clone(),
                })
            }
        }
        many => Err(HarvestError::ReconciliationConflict {
            guid: mapped.guid.clone(),
            count: many.len(),
        }),
    }
}

/// Resolve duplicate GUIDs within one job before importing.
///
/// When a source listing names the same GUID more than once, only the most
/// recently fetched object is imported; the rest are marked superseded.
/// Resolution is by fetch timestamp, never by processing order. Returns the
/// ids of the superseded objects.
pub fn supersede_duplicates(objects: &mut [HarvestObject]) -> Vec<String> {
    let mut winners: HashMap<String, (usize, DateTime<Utc>)> = HashMap::new();

    for (index, obj) in objects.iter().enumerate() {
        if obj.state != ObjectState::Fetched {
            continue;
        }
        let fetched_at = obj.fetched_at.unwrap_or(DateTime::<Utc>::MIN_UTC);
        match winners.get(&obj.guid) {
            Some((_, best)) if *best >= fetched_at => {}
            _ => {
                winners.insert(obj.guid.clone(), (index, fetched_at));
            }
        }
    }

    let mut superseded = Vec::new();
    for (index, obj) in objects.iter_mut().enumerate() {
        if obj.state != ObjectState::Fetched {
            continue;
        }
        if winners.get(&obj.guid).map(|(i, _)| *i) != Some(index) {
            obj.state = ObjectState::Imported;
            obj.outcome = Some(crate::models::RecordOutcome::Skipped(SkipReason::Superseded));
            superseded.push(obj.id.clone());
        }
    }
    superseded
}
