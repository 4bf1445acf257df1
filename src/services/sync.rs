// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-user reconciliation between Fitbit and Strava.
//!
//! A pass compares the newest source activity with the stored watermark,
//! collects every source activity newer than what Strava already has (bounded
//! by a look-back horizon), uploads the eligible ones, and advances the
//! watermark only after at least one upload succeeded.

use crate::db::CredentialStore;
use crate::error::AppError;
use crate::models::{ActivityDescriptor, SkipReason};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Where activities come from.
#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// The user's newest activity, if they have any.
    async fn latest_activity(&self, user_id: &str) -> Result<Option<ActivityDescriptor>, AppError>;

    /// Activities that started strictly after `after`, oldest first.
    async fn activities_after(
        &self,
        user_id: &str,
        after: DateTime<Utc>,
    ) -> Result<Vec<ActivityDescriptor>, AppError>;

    async fn export_tcx(&self, user_id: &str, activity_id: u64) -> Result<Vec<u8>, AppError>;
}

/// Where activities go.
#[async_trait]
pub trait ActivityDestination: Send + Sync {
    /// Start time of the user's newest destination activity.
    async fn latest_activity_start(&self, user_id: &str)
        -> Result<Option<DateTime<Utc>>, AppError>;

    /// Upload one TCX document. Only a "created" response counts as success.
    async fn upload_tcx(
        &self,
        user_id: &str,
        source_activity_id: u64,
        tcx: Vec<u8>,
    ) -> Result<(), AppError>;
}

/// How a reconciliation pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    /// No credential on record.
    NotRegistered,
    /// The newest source activity could not be read.
    SourceUnavailable,
    /// The user has no source activities at all.
    NoActivity,
    /// The newest source activity matches the watermark.
    AlreadySynced,
    /// Candidates were processed (possibly with zero uploads).
    Processed,
}

/// Summary of one reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub user_id: String,
    pub outcome: SyncOutcome,
    pub uploaded: usize,
    pub skipped: usize,
    pub failed: usize,
    /// New watermark, if it moved.
    pub watermark: Option<DateTime<Utc>>,
}

impl SyncReport {
    fn finished(user_id: &str, outcome: SyncOutcome) -> Self {
        Self {
            user_id: user_id.to_string(),
            outcome,
            uploaded: 0,
            skipped: 0,
            failed: 0,
            watermark: None,
        }
    }
}

/// Earliest start time considered for a pass.
///
/// Activities already on the destination are excluded, but the window never
/// reaches further back than `horizon` before `now`.
pub fn lower_bound(
    now: DateTime<Utc>,
    horizon: Duration,
    destination_latest: Option<DateTime<Utc>>,
) -> DateTime<Utc> {
    let floor = now - horizon;
    match destination_latest {
        Some(latest) if latest > floor => latest,
        _ => floor,
    }
}

/// Drives reconciliation for one user at a time.
#[derive(Clone)]
pub struct SyncEngine {
    source: Arc<dyn ActivitySource>,
    destination: Arc<dyn ActivityDestination>,
    store: Arc<dyn CredentialStore>,
    horizon: Duration,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn ActivitySource>,
        destination: Arc<dyn ActivityDestination>,
        store: Arc<dyn CredentialStore>,
        horizon: Duration,
    ) -> Self {
        Self {
            source,
            destination,
            store,
            horizon,
        }
    }

    /// Reconcile `user_id` as of now.
    pub async fn reconcile(&self, user_id: &str) -> Result<SyncReport, AppError> {
        self.reconcile_at(user_id, Utc::now()).await
    }

    /// Reconcile `user_id` with an explicit notion of "now".
    ///
    /// Errors are returned only for store failures and for failures reading
    /// the destination or the candidate window; in those cases the watermark
    /// is untouched.
    pub async fn reconcile_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SyncReport, AppError> {
        if self.store.get_credential(user_id).await?.is_none() {
            tracing::info!(user_id, "Sync requested for unregistered user");
            return Ok(SyncReport::finished(user_id, SyncOutcome::NotRegistered));
        }

        let latest = match self.source.latest_activity(user_id).await {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                tracing::info!(user_id, "No source activities");
                return Ok(SyncReport::finished(user_id, SyncOutcome::NoActivity));
            }
            Err(e) => {
                tracing::warn!(user_id, error = %e, "Could not read newest source activity");
                return Ok(SyncReport::finished(
                    user_id,
                    SyncOutcome::SourceUnavailable,
                ));
            }
        };

        let watermark = self
            .store
            .get_watermark(user_id)
            .await?
            .map(|w| w.last_synced_activity_time);

        if watermark == Some(latest.start_time) {
            tracing::info!(user_id, start_time = %latest.start_time, "Already synced");
            return Ok(SyncReport::finished(user_id, SyncOutcome::AlreadySynced));
        }

        let destination_latest = self.destination.latest_activity_start(user_id).await?;
        let after = lower_bound(now, self.horizon, destination_latest);

        let candidates = self.source.activities_after(user_id, after).await?;
        tracing::info!(
            user_id,
            after = %after,
            candidates = candidates.len(),
            "Reconciling"
        );

        let mut report = SyncReport::finished(user_id, SyncOutcome::Processed);
        for activity in &candidates {
            if let Some(reason) = activity.skip_reason() {
                log_skip(user_id, activity, reason);
                report.skipped += 1;
                continue;
            }

            if self.upload(user_id, activity).await {
                report.uploaded += 1;
            } else {
                report.failed += 1;
            }
        }

        if report.uploaded > 0
            && self
                .store
                .advance_watermark(user_id, latest.start_time)
                .await?
        {
            report.watermark = Some(latest.start_time);
        }

        tracing::info!(
            user_id,
            uploaded = report.uploaded,
            skipped = report.skipped,
            failed = report.failed,
            watermark_advanced = report.watermark.is_some(),
            "Sync pass complete"
        );
        Ok(report)
    }

    /// Export one activity and upload it. Failures are logged, not raised.
    pub async fn upload(&self, user_id: &str, activity: &ActivityDescriptor) -> bool {
        let tcx = match self.source.export_tcx(user_id, activity.id).await {
            Ok(tcx) => tcx,
            Err(e) => {
                tracing::warn!(user_id, activity_id = activity.id, error = %e, "TCX export failed");
                return false;
            }
        };

        match self.destination.upload_tcx(user_id, activity.id, tcx).await {
            Ok(()) => {
                tracing::info!(user_id, activity_id = activity.id, "Activity uploaded");
                true
            }
            Err(e) => {
                tracing::warn!(user_id, activity_id = activity.id, error = %e, "Upload failed");
                false
            }
        }
    }
}

fn log_skip(user_id: &str, activity: &ActivityDescriptor, reason: SkipReason) {
    tracing::warn!(
        user_id,
        activity_id = activity.id,
        category = ?activity.category,
        reason = ?reason,
        "Skipping activity"
    );
}
