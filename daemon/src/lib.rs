//! Process-table snapshot collection: per-host latest-snapshot storage with
//! atomic replace, the HTTP service in front of it, and the agent that feeds it.

pub mod agent;
pub mod collector;
pub mod config;
pub mod db;
pub mod error;
pub mod hostname;
pub mod protocol;
pub mod record;
pub mod retry;
pub mod server;
pub mod store;
