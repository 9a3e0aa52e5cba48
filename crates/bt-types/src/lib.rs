//! # bt-types
//!
//! Core types shared by the BlendTune crates: configurations and their
//! signatures, trial records, search spaces, and the error types.

pub mod config;
pub mod errors;
pub mod float;
pub mod record;
pub mod space;

pub use config::*;
pub use errors::*;
pub use record::*;
pub use space::*;
