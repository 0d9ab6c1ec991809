//! State Machine
//!
//! Validates transitions against the per-type graphs and plans paths toward a
//! desired state. The machine is stateless; the registry applies its verdicts
//! while holding the entity lock.

use super::states::LifecycleState;
use crate::entity::{EntityType, EntityUuid};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

// =============================================================================
// Transition Records
// =============================================================================

/// One applied state change, kept in the entity's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// `None` for the registration that created the entity
    pub from: Option<LifecycleState>,
    pub to: LifecycleState,
    pub at: DateTime<Utc>,
}

/// Request to move an entity to `target`
///
/// `expected_state` and `expected_version` turn the request into a
/// compare-and-swap: the registry rejects it with
/// [`Error::ConcurrentModification`] when the entity no longer matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub entity_type: EntityType,
    pub uuid: EntityUuid,
    pub target: LifecycleState,
    pub expected_state: Option<LifecycleState>,
    pub expected_version: Option<u64>,
}

impl TransitionRequest {
    pub fn new(uuid: impl Into<EntityUuid>, target: LifecycleState) -> Self {
        Self {
            entity_type: target.entity_type(),
            uuid: uuid.into(),
            target,
            expected_state: None,
            expected_version: None,
        }
    }

    /// Require the entity to be in `state` at commit time
    pub fn expecting(mut self, state: LifecycleState) -> Self {
        self.expected_state = Some(state);
        self
    }

    /// Require the entity's mutation counter to equal `version` at commit time
    pub fn at_version(mut self, version: u64) -> Self {
        self.expected_version = Some(version);
        self
    }
}

// =============================================================================
// State Machine
// =============================================================================

/// Graph queries shared by every entity type
#[derive(Debug, Clone, Copy, Default)]
pub struct StateMachine;

impl StateMachine {
    /// Check that `from -> to` is an edge of the type's graph
    pub fn validate(entity_type: EntityType, from: LifecycleState, to: LifecycleState) -> Result<()> {
        if to.entity_type() != entity_type || !from.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                entity_type,
                from: from.name().to_string(),
                to: to.name().to_string(),
            });
        }
        Ok(())
    }

    /// Shortest sequence of states leading from `from` to `to`, excluding `from`
    ///
    /// Returns an empty path when already there and `None` when unreachable.
    pub fn plan(from: LifecycleState, to: LifecycleState) -> Option<Vec<LifecycleState>> {
        if from == to {
            return Some(Vec::new());
        }
        if from.entity_type() != to.entity_type() {
            return None;
        }

        let mut previous: HashMap<LifecycleState, LifecycleState> = HashMap::new();
        let mut queue = VecDeque::from([from]);

        while let Some(state) = queue.pop_front() {
            for next in state.successors() {
                if next == from || previous.contains_key(&next) {
                    continue;
                }
                previous.insert(next, state);
                if next == to {
                    let mut path = vec![to];
                    let mut cursor = state;
                    while cursor != from {
                        path.push(cursor);
                        cursor = previous[&cursor];
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(next);
            }
        }
        None
    }

    /// Next state on the shortest path toward `desired`
    pub fn next_step(current: LifecycleState, desired: LifecycleState) -> Option<LifecycleState> {
        Self::plan(current, desired).and_then(|path| path.first().copied())
    }

    /// States reachable from the type's initial state
    pub fn reachable(entity_type: EntityType) -> Vec<LifecycleState> {
        let initial = LifecycleState::initial(entity_type);
        let mut seen = vec![initial];
        let mut queue = VecDeque::from([initial]);
        while let Some(state) = queue.pop_front() {
            for next in state.successors() {
                if !seen.contains(&next) {
                    seen.push(next);
                    queue.push_back(next);
                }
            }
        }
        seen
    }

    /// Check that a recorded history is a valid walk from the initial state
    pub fn verify_history(entity_type: EntityType, history: &[Transition]) -> Result<()> {
        let mut iter = history.iter();
        let Some(first) = iter.next() else {
            return Err(Error::Configuration(format!("empty {} history", entity_type)));
        };
        if first.from.is_some() || first.to != LifecycleState::initial(entity_type) {
            return Err(Error::Configuration(format!(
                "{} history does not start at {}",
                entity_type,
                LifecycleState::initial(entity_type)
            )));
        }

        let mut current = first.to;
        for step in iter {
            if step.from != Some(current) {
                return Err(Error::Configuration(format!(
                    "{} history skips from {} to {:?}",
                    entity_type, current, step.from
                )));
            }
            Self::validate(entity_type, current, step.to)?;
            current = step.to;
        }
        Ok(())
    }
}
