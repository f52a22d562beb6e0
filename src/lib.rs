//! Dataset operations service
//!
//! Moves file trees into, around and out of datasets and snapshots datasets
//! into published versions, coordinating with an external lock service so
//! that concurrent operations never observe a half-mutated tree.
//!
//! ## Components
//!
//! - **Lock coordinator**: depth-first read/write locking of node trees
//! - **Workers**: import, delete, move and rename as detached tasks
//! - **Job tracker**: per-item WAITING/RUNNING/SUCCEED/FAILED records
//! - **Publisher**: zip archive, version record and release event
//! - **Operations**: pre-checks and the `{processing, ignored}` manifest,
//!   listings, folder creation, previews and version downloads
//! - **Server**: hyper HTTP/1 endpoints over the operations

pub mod config;
pub mod db;
pub mod jobs;
pub mod locks;
pub mod models;
pub mod nats;
pub mod operations;
pub mod preview;
pub mod publisher;
pub mod routes;
pub mod server;
pub mod services;
pub mod types;
pub mod validation;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::{Args, Settings};
pub use operations::{Backends, FileOperations};
pub use server::{run, serve, AppState};
pub use types::{DatasetError, ErrorKind, Result};
