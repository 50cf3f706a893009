//! This module contains the persistence layer: configuration history, the
//! key-value fallback store and the image store.

pub mod error;
pub mod sqlite;
pub use sqlite::SqliteStateRepository;
pub mod traits;
