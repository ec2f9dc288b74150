//! override-watch: announces changes to Canvas quiz assignment overrides.
//!
//! Each poll cycle fetches a course's quiz overrides, reduces them to a
//! canonical form, diffs that against the last snapshot, and posts what
//! changed to a notification channel:
//!
//! ```text
//! Transport ─▶ normalize ─▶ diff(snapshot) ─▶ render ─▶ Notifier
//!                                   │
//!                                   └─▶ StateStore (snapshot, etag, last notice)
//! ```
//!
//! # Architecture
//!
//! - **changes**: normalization, positional diffing and rendering (pure)
//! - **throttle**: cooldown for "nothing changed" notices
//! - **cycle**: the poll cycle controller
//! - **service**: self-renewing schedule with start/stop/status
//! - **transport**, **notify**, **store**, **auth**: collaborators behind traits

pub mod auth;
pub mod changes;
pub mod config;
pub mod cycle;
pub mod error;
pub mod notify;
pub mod service;
pub mod store;
pub mod throttle;
pub mod transport;
pub mod watch_dirs;

pub use auth::{CredentialProvider, Credentials, SharedCredentials};
pub use config::WatchConfig;
pub use cycle::{CycleOutcome, PollCycle};
pub use error::{Result, WatchError};
pub use service::{WatchService, WatchStatus};
pub use store::{FileStateStore, StateStore, WatchState};
