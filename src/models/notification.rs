// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitbit subscription notification payload.

use serde::{Deserialize, Serialize};

/// One entry of a Fitbit notification batch.
///
/// Fitbit delivers a JSON array of these; the same owner may appear more
/// than once in a single delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub collection_type: String,
    #[serde(default)]
    pub owner_type: Option<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
}

impl Notification {
    /// True for activity changes belonging to a user.
    pub fn is_user_activity(&self) -> bool {
        self.collection_type == "activities" && self.owner_type.as_deref() == Some("user")
    }
}
