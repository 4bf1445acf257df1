// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Turns a verified Fitbit notification batch into per-user sync tasks.

use crate::models::Notification;
use crate::services::tasks::{SyncUserPayload, TaskDispatcher};
use futures_util::{stream, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

const MAX_CONCURRENT_DISPATCH: usize = 100;

/// Outcome of dispatching one notification batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestResult {
    /// Users whose sync task was accepted, in batch order.
    pub scheduled: Vec<String>,
    /// Users whose sync task could not be dispatched.
    pub failed: Vec<String>,
}

impl IngestResult {
    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Parse a notification batch. Malformed input yields an empty batch.
pub fn parse_batch(body: &[u8]) -> Vec<Notification> {
    match serde_json::from_slice::<Vec<Notification>>(body) {
        Ok(batch) => batch,
        Err(e) => {
            tracing::error!(error = %e, bytes = body.len(), "Malformed notification batch");
            Vec::new()
        }
    }
}

/// Distinct owners of user activity notifications, in first-seen order.
pub fn affected_users(batch: &[Notification]) -> Vec<String> {
    let mut seen = HashSet::new();
    batch
        .iter()
        .filter(|n| n.is_user_activity())
        .filter_map(|n| n.owner_id.as_deref())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

/// Schedule one sync task per affected user.
///
/// Dispatch failures are logged and reported but do not fail the batch; the
/// next notification for that user schedules it again.
pub async fn dispatch_batch(dispatcher: &dyn TaskDispatcher, body: &[u8]) -> IngestResult {
    let batch = parse_batch(body);
    let users = affected_users(&batch);
    if users.is_empty() {
        tracing::debug!(notifications = batch.len(), "No user activity in batch");
        return IngestResult::default();
    }

    let outcomes: Arc<Mutex<Vec<Option<bool>>>> = Arc::new(Mutex::new(vec![None; users.len()]));

    stream::iter(users.iter().enumerate())
        .for_each_concurrent(MAX_CONCURRENT_DISPATCH, |(index, user_id)| {
            let outcomes = Arc::clone(&outcomes);
            async move {
                let payload = SyncUserPayload {
                    user_id: user_id.clone(),
                };
                let ok = match dispatcher.dispatch_sync(payload).await {
                    Ok(()) => true,
                    Err(e) => {
                        tracing::warn!(user_id = %user_id, error = %e, "Failed to dispatch sync task");
                        false
                    }
                };
                outcomes.lock().await[index] = Some(ok);
            }
        })
        .await;

    let outcomes = outcomes.lock().await;
    let mut result = IngestResult::default();
    for (user_id, ok) in users.into_iter().zip(outcomes.iter()) {
        if *ok == Some(true) {
            result.scheduled.push(user_id);
        } else {
            result.failed.push(user_id);
        }
    }

    tracing::info!(
        notifications = batch.len(),
        scheduled = result.scheduled.len(),
        failed = result.failed.len(),
        "Dispatched sync tasks"
    );
    result
}
