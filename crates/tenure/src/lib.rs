// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tenure: client-side session lifecycle manager.
//!
//! Holds one bearer credential for an application, persists it, renews it
//! before it lapses, and invalidates it on expiry or inactivity while many
//! concurrent consumers read it.

pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod manager;
pub mod monitor;
pub mod network;
pub mod refresh;
pub mod registration;
pub mod session;
pub mod storage;
pub mod store;
pub mod test_support;
pub mod validate;

pub use crate::config::SessionPolicy;
pub use crate::error::{IdentityError, RefreshFailure, SessionError};
pub use crate::identity::{HttpIdentityService, IdentityService, LoginCredentials, RegistrationForm};
pub use crate::manager::{InitOutcome, SessionManager};
pub use crate::session::{Credential, RegistrationState, Session, SessionPhase, Subject};
pub use crate::storage::{FileStorage, MemoryStorage, SessionStorage};
