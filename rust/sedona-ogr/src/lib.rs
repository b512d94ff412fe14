//! Pushdown of relational predicates into OGR layers
//!
//! The pieces, leaves first: a [catalog] binding relational columns to layer
//! fields, a [codec] for geometry values, a [spatial_filter] extractor for
//! bounding box predicates and the [deparse] module translating the rest into
//! OGR SQL attribute filters. [connection] and [state] tie them to the layer
//! for one scan or modify operation.
pub mod catalog;
pub mod codec;
pub mod connection;
pub mod constant;
pub mod deparse;
pub mod extension_type;
pub mod field;
pub mod spatial_filter;
pub mod state;
pub mod type_catalog;

pub use codec::{external_geometry_to_value, value_to_external_geometry, OgrGeometry};
pub use deparse::{deparse, plan_pushdown};
pub use extension_type::geometry_type_identifier;
