//! Deploy-time synchronizer for "external modules".
//!
//! Each module is a version-controlled dependency pinned to a revision and
//! linked into the application tree at a fixed path. Checkouts live in a
//! revision-addressed cache under a shared directory, so a revision is
//! fetched once and reused by every later deploy; activation is a symlink
//! swap.

pub mod cache;
pub mod config;
pub mod exec;
pub mod publish;
pub mod resolve;
pub mod scm;
pub mod setup;
pub mod types;
