// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Asynchronous dispatch of per-user sync work.
//!
//! In production each sync runs as a Cloud Task posted back to
//! `/tasks/sync-user`, so the queue provides retries and rate limiting.
//! Locally the same work runs on a bounded pool of tokio tasks.
//!
//! Uses the official google-cloud-tasks-v2 SDK.

use crate::config::{Config, SYNC_QUEUE_NAME};
use crate::error::AppError;
use crate::error::Result;
use crate::services::sync::SyncEngine;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Path of the task handler that runs a sync pass.
pub const SYNC_USER_PATH: &str = "/tasks/sync-user";

/// Payload sent to the sync task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncUserPayload {
    pub user_id: String,
}

/// Schedules a reconciliation pass without waiting for it.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Returns once the work is accepted; the pass itself runs later.
    async fn dispatch_sync(&self, payload: SyncUserPayload) -> Result<()>;
}

/// Cloud Tasks client wrapper.
pub struct TasksService {
    project_id: String,
    location: String,
    queue_name: String,
    service_url: String,
    service_account: String,
}

impl TasksService {
    pub fn new(config: &Config) -> Self {
        Self {
            project_id: config.gcp_project_id.clone(),
            location: config.gcp_region.clone(),
            queue_name: SYNC_QUEUE_NAME.to_string(),
            service_url: config.api_url.clone(),
            service_account: config.tasks_service_account.clone(),
        }
    }

    /// Generic task queuing helper.
    async fn queue_task<T: Serialize>(&self, endpoint: &str, payload: &T) -> Result<()> {
        use google_cloud_tasks_v2::client::CloudTasks;
        use google_cloud_tasks_v2::model::{HttpRequest, OidcToken, Task};

        let client = CloudTasks::builder()
            .build()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cloud Tasks client error: {}", e)))?;

        let queue_path = format!(
            "projects/{}/locations/{}/queues/{}",
            self.project_id, self.location, self.queue_name
        );

        let body = serde_json::to_vec(payload)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("JSON error: {}", e)))?;

        let http_request = HttpRequest::default()
            .set_url(format!("{}{}", self.service_url, endpoint))
            .set_http_method("POST")
            .set_body(axum::body::Bytes::from(body))
            .set_headers(std::collections::HashMap::from([(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )]))
            .set_oidc_token(
                OidcToken::default()
                    .set_service_account_email(self.service_account.clone())
                    .set_audience(self.service_url.clone()),
            );

        let task = Task::default().set_http_request(http_request);

        let _response = client
            .create_task()
            .set_parent(queue_path)
            .set_task(task)
            .send()
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Cloud Tasks create error: {}", e)))?;

        Ok(())
    }
}

#[async_trait]
impl TaskDispatcher for TasksService {
    async fn dispatch_sync(&self, payload: SyncUserPayload) -> Result<()> {
        self.queue_task(SYNC_USER_PATH, &payload).await
    }
}

/// Runs sync passes in-process, at most `workers` at a time.
#[derive(Clone)]
pub struct LocalDispatcher {
    engine: Arc<SyncEngine>,
    permits: Arc<Semaphore>,
}

impl LocalDispatcher {
    pub fn new(engine: Arc<SyncEngine>, workers: usize) -> Self {
        Self {
            engine,
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }
}

#[async_trait]
impl TaskDispatcher for LocalDispatcher {
    async fn dispatch_sync(&self, payload: SyncUserPayload) -> Result<()> {
        let engine = Arc::clone(&self.engine);
        let permits = Arc::clone(&self.permits);

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                tracing::error!(user_id = %payload.user_id, "Local worker pool closed");
                return;
            };

            match engine.reconcile(&payload.user_id).await {
                Ok(report) => {
                    tracing::debug!(user_id = %payload.user_id, outcome = ?report.outcome, "Local sync finished")
                }
                Err(e) => {
                    tracing::warn!(user_id = %payload.user_id, error = %e, "Local sync failed")
                }
            }
        });

        Ok(())
    }
}
