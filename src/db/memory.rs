// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory credential store for tests and local runs.

use crate::db::CredentialStore;
use crate::error::AppError;
use crate::models::{PendingRegistration, Provider, SyncWatermark, TokenPair, UserCredential};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct Tables {
    credentials: HashMap<String, UserCredential>,
    watermarks: HashMap<String, SyncWatermark>,
    pending: HashMap<String, PendingRegistration>,
}

/// Process-local store. Clones share the same tables.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Tables>, AppError> {
        self.tables
            .lock()
            .map_err(|_| AppError::Database("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn get_credential(&self, user_id: &str) -> Result<Option<UserCredential>, AppError> {
        Ok(self.lock()?.credentials.get(user_id).cloned())
    }

    async fn update_tokens(
        &self,
        user_id: &str,
        provider: Provider,
        tokens: &TokenPair,
    ) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        let credential = tables
            .credentials
            .get_mut(user_id)
            .ok_or_else(|| AppError::NotFound(format!("Credential for user {}", user_id)))?;
        credential.set_tokens(provider, tokens.clone(), Utc::now());
        Ok(())
    }

    async fn register_user(&self, credential: &UserCredential) -> Result<bool, AppError> {
        let mut tables = self.lock()?;
        let user_id = credential.user_id.clone();
        tables
            .credentials
            .insert(user_id.clone(), credential.clone());

        let is_new = !tables.watermarks.contains_key(&user_id);
        if is_new {
            let watermark = SyncWatermark::initial(&user_id, Utc::now());
            tables.watermarks.insert(user_id, watermark);
        }
        Ok(is_new)
    }

    async fn delete_user(&self, user_id: &str) -> Result<(), AppError> {
        let mut tables = self.lock()?;
        tables.watermarks.remove(user_id);
        tables.credentials.remove(user_id);
        Ok(())
    }

    async fn get_watermark(&self, user_id: &str) -> Result<Option<SyncWatermark>, AppError> {
        Ok(self.lock()?.watermarks.get(user_id).cloned())
    }

    async fn advance_watermark(
        &self,
        user_id: &str,
        to: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut tables = self.lock()?;
        match tables.watermarks.get_mut(user_id) {
            Some(watermark) if to > watermark.last_synced_activity_time => {
                watermark.last_synced_activity_time = to;
                watermark.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn save_pending_registration(
        &self,
        pending: &PendingRegistration,
    ) -> Result<(), AppError> {
        self.lock()?
            .pending
            .insert(pending.user_id.clone(), pending.clone());
        Ok(())
    }

    async fn take_pending_registration(
        &self,
        user_id: &str,
    ) -> Result<Option<PendingRegistration>, AppError> {
        Ok(self.lock()?.pending.remove(user_id))
    }
}
