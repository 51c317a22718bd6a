//! Core types for doclog
//!
//! This crate defines the shared vocabulary of the log engine:
//! - Record: the document mutation flowing through every stage
//! - Error: the error enum used by all crates

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod record;

pub use error::{Error, Result};
pub use record::{
    now_millis, validate_index_code, Categories, Fields, Record, Variables, MAX_INDEX_CODE_LEN,
};
