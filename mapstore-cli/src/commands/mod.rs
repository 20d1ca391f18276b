//! CLI command implementations.

pub mod cancel;
pub mod common;
pub mod delete;
pub mod download;
pub mod list;
pub mod status;
pub mod update;
