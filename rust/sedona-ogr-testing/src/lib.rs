pub mod attribute_filter;
pub mod create;
pub mod memory;
pub mod udfs;
