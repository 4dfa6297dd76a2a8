//! Client-side store for a column/post blogging backend.
//!
//! SYSTEM CONTEXT
//! ==============
//! `Store` owns the shared `State` and every REST call that feeds it.
//! Callers (the CLI here, a UI elsewhere) build one store at their
//! composition root and clone it wherever state must be read or changed.

pub mod config;
pub mod error;
pub mod state;
pub mod storage;
pub mod store;
pub mod transport;
pub mod types;

pub use config::{StoreConfig, StoreOptions};
pub use error::StoreError;
pub use state::{Mutation, State};
pub use store::Store;
