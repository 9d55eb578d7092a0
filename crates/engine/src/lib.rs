//! Server file-tracking and client convergence engines driving the
//! replication protocol.
//!
//! Both [`ServerEngine`] and [`ClientEngine`] are single values owned by one
//! async task each, with no shared mutable state and no globals.
//! [`readiness::next_ready`] is the one multiplexed readiness wait both
//! loops funnel their per-session I/O through.

pub mod client;
pub mod constants;
pub mod download;
pub mod mirror;
pub mod readiness;
pub mod server;
pub mod session;
pub mod tracker;

pub use client::{ClientEngine, SourceConfig};
pub use download::{Download, DownloadTable};
pub use mirror::{Mirror, MirrorEntry, StreamState};
pub use server::{ServerEngine, ServerStats};
pub use session::{Session, SessionId};
pub use tracker::{AppendEvent, Tracker, WatchedFile};
