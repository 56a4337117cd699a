pub mod image_gen;
pub mod vision;
