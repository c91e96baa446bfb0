pub mod angle;
pub mod vec2;
