pub mod broker;
pub mod client;
pub mod framing;
pub mod protocol;
pub mod session;
pub mod tls;
pub mod transport;
