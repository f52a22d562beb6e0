//! Shared types

pub mod error;

pub use error::{DatasetError, ErrorKind, Result};
