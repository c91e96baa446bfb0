//! Reaction Ring
//!
//! A WebTransport broker that relays "reaction" events between connected
//! sessions, and an orbital ring simulation that renders every session as a
//! node reacting to them.
//!
//! - [`net`] - session broker, wire protocol, server and client transport
//! - [`sim`] - ring simulation, effects, tick loop and render frames
//! - [`util`] - angle arithmetic in turns and 2D vectors

pub mod config;
pub mod metrics;
pub mod net;
pub mod sim;
pub mod util;

/// Log to stdout at INFO, or as `RUST_LOG` says when it is set
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let builder = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(false);
    match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).init(),
        Err(_) => builder.init(),
    }
}
