pub mod config;
pub mod constants;
pub mod effect;
pub mod mirror;
pub mod node;
pub mod performance;
pub mod render;
pub mod simulation;
pub mod systems;
pub mod tick_loop;
