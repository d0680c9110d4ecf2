//! # Provider Sync
//!
//! Mirrors content from third-party providers (Zendesk, Intercom, GitHub,
//! Slack, Notion) into a document index while tracking permission grants,
//! converging the index on upstream truth and garbage-collecting whatever the
//! provider or the user took away.

pub mod activities;
pub mod cache;
pub mod config;
pub mod connectors;
pub mod credentials;
pub mod db;
pub mod documents;
pub mod driver;
pub mod engine;
pub mod error;
pub mod executor;
pub mod gc;
pub mod ids;
pub mod models;
pub mod provider;
pub mod repositories;
pub mod sync_status;
pub mod telemetry;
pub mod walker;
pub use migration;
