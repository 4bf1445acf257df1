// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod activity;
pub mod credential;
pub mod notification;

pub use activity::{ActivityCategory, ActivityDescriptor, SkipReason};
pub use credential::{
    watermark_epoch, PendingRegistration, Provider, SyncWatermark, TokenPair, UserCredential,
};
pub use notification::Notification;
