pub mod dynamics;
pub mod placement;
