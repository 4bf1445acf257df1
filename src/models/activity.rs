// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Normalized view of a Fitbit activity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of activity, derived from Fitbit's `activityName`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivityCategory {
    Run,
    Walk,
    Hike,
    Ride,
    Swim,
    Other(String),
}

impl ActivityCategory {
    /// Map a Fitbit activity name onto a category.
    pub fn from_fitbit_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "run" | "running" | "treadmill" => ActivityCategory::Run,
            "walk" | "walking" => ActivityCategory::Walk,
            "hike" | "hiking" => ActivityCategory::Hike,
            "bike" | "outdoor bike" | "cycling" | "biking" => ActivityCategory::Ride,
            "swim" | "swimming" => ActivityCategory::Swim,
            _ => ActivityCategory::Other(name.to_string()),
        }
    }

    /// Kinds whose TCX export carries a track Strava can use.
    pub fn is_supported(&self) -> bool {
        matches!(
            self,
            ActivityCategory::Run
                | ActivityCategory::Walk
                | ActivityCategory::Hike
                | ActivityCategory::Ride
        )
    }
}

/// Transient, provider-neutral description of a source activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDescriptor {
    /// Fitbit log ID
    pub id: u64,
    pub start_time: DateTime<Utc>,
    pub category: ActivityCategory,
    /// Whether a GPS track was recorded
    pub has_positional_data: bool,
    /// Recorded automatically by a tracker (as opposed to logged manually)
    pub is_tracker_recorded: bool,
}

/// Why an activity was not uploaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    ManualEntry,
    NoPositionalData,
    UnsupportedKind,
}

impl ActivityDescriptor {
    /// Returns the reason this activity cannot be uploaded, if any.
    ///
    /// Checks run in order: tracker-recorded, positional data, kind.
    pub fn skip_reason(&self) -> Option<SkipReason> {
        if !self.is_tracker_recorded {
            Some(SkipReason::ManualEntry)
        } else if !self.has_positional_data {
            Some(SkipReason::NoPositionalData)
        } else if !self.category.is_supported() {
            Some(SkipReason::UnsupportedKind)
        } else {
            None
        }
    }
}
