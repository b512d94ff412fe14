//! Common utilities and configurations for the Sedona OGR bridge.
//!
//! This crate contains the error macros and configuration namespace shared by
//! the geometry codec, the column catalog and the predicate deparser.

pub mod error;
pub mod option;

pub use option::*;
