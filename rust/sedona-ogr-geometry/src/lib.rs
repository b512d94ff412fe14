pub mod bounding_box;
pub mod bounds;
pub mod error;
pub mod ewkb;
pub mod types;
pub mod wkb_factory;
