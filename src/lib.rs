//! FeedForge: content-platform article collection, rewriting and export.
//!
//! The crate is organized around a single [`core::FeedForge`] facade:
//! - `collect` pulls article listings from account feeds
//! - `storage` persists accounts and articles in SQLite
//! - `task` runs batch jobs and exposes pollable status snapshots
//! - `document` extracts article content and renders Word documents
//! - `rewrite` runs articles through an OpenAI-compatible model
//! - `export` dumps article metadata to CSV or JSON
//! - `api` serves the HTTP bridge the frontend talks to

pub mod api;
pub mod collect;
pub mod config;
pub mod core;
pub mod document;
pub mod error;
pub mod export;
pub mod logging;
pub mod rewrite;
pub mod storage;
pub mod task;

pub use config::AppConfig;
pub use crate::core::FeedForge;
pub use error::{FeedForgeError, ForgeResult};
pub use task::{BatchTaskSpec, TaskState, TaskStatus, TimeWindow};
