pub mod cache;
pub mod meter;
