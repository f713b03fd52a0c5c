//! Start glare resolution
//!
//! When both parties send `start` for the same request before seeing the
//! other's, each side compares the two starts by `(method, sender device,
//! sender user)`. The smaller start wins on both sides, so they converge on
//! the same verifier without another round trip.

use keyward_core::{DeviceId, UserId};
use std::cmp::Ordering;

/// Ordering key of a `start` message
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct StartRaceKey {
    method: String,
    device_id: DeviceId,
    user_id: UserId,
}

impl StartRaceKey {
    /// Key of a start sent by `(user_id, device_id)` for `method`
    pub fn new(method: impl Into<String>, user_id: UserId, device_id: DeviceId) -> Self {
        Self {
            method: method.into(),
            device_id,
            user_id,
        }
    }
}

/// Outcome of a start race, from our point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlareOutcome {
    /// Keep our start; ignore theirs
    OursWins,
    /// Drop our start and accept theirs
    TheirsWins,
}

/// Resolve a start race between our start and the peer's
pub fn resolve(ours: &StartRaceKey, theirs: &StartRaceKey) -> GlareOutcome {
    match ours.cmp(theirs) {
        Ordering::Less | Ordering::Equal => GlareOutcome::OursWins,
        Ordering::Greater => GlareOutcome::TheirsWins,
    }
}
