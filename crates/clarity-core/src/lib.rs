//! clarity-core library.
//!
//! Event-sourced storage for Clarity workspaces: the sharded JSONL log and
//! its per-entity DAG, replay into a [`model::Snapshot`], the rank algebra
//! and reorder planner, the permission model, the mutation layer, Git
//! synchronization, the doctor, and backup import/export.
//!
//! # Conventions
//!
//! - **Errors**: typed [`error::ClarityError`] with `E####` codes; `anyhow`
//!   only at the global-config edge.
//! - **Logging**: `tracing` macros. The library never installs a subscriber.

pub mod attachment;
pub mod backup;
pub mod cancel;
pub mod config;
pub mod dag;
pub mod doctor;
pub mod error;
pub mod event;
pub mod git;
pub mod id;
pub mod lock;
pub mod log;
pub mod model;
pub mod mutate;
pub mod perm;
pub mod rank;
pub mod reorder;
pub mod replay;
pub mod secret;
pub mod store;
pub mod workspace;

pub use error::{ClarityError, ErrorCode, Result};
pub use store::Store;
