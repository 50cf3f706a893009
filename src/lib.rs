#![warn(missing_docs)]
//! A multi-tenant Alertmanager configuration engine: every org gets its own
//! Alertmanager whose configuration is validated, persisted and hot-reloaded.

pub mod cmd;
pub mod config;
pub mod engine;
pub mod http_client;
pub mod loader;
pub mod models;
pub mod notification;
pub mod persistence;
pub mod state;
pub mod supervisor;
pub mod test_helpers;
