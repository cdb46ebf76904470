//! Custodian - consent lifecycle service
//!
//! Individuals grant, time-box and revoke other individuals' access to
//! categories of their personal data; every change lands on an append-only
//! audit trail. All modules are public so the integration tests can drive
//! them directly.

pub mod audit;
pub mod auth;
pub mod categories;
pub mod clock;
pub mod consent;
pub mod entities;
pub mod errors;
pub mod jobs;
pub mod lifecycle;
pub mod mediator;
pub mod settings;
pub mod storage;
pub mod sweeper;
pub mod user_sync;
pub mod web;
