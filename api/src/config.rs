use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::str::FromStr;

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Read `name` and parse it, keeping `None` (and logging) when the value is
/// malformed or rejected by `accept`
fn env_parse<T: FromStr>(name: &str, accept: impl Fn(&T) -> bool, expected: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(parsed) if accept(&parsed) => Some(parsed),
        Ok(_) => {
            tracing::warn!("{} must be {}, using default", name, expected);
            None
        }
        Err(_) => {
            tracing::warn!("Invalid {} '{}', using default", name, raw);
            None
        }
    }
}

/// Broker server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub bind_address: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,
    /// Queued outbound messages per session before new ones are dropped
    pub outbox_capacity: usize,
    /// Port for the Prometheus/JSON metrics listener
    pub metrics_port: u16,
    /// Path to TLS certificate file
    pub tls_cert_path: Option<String>,
    /// Path to TLS key file
    pub tls_key_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)),
            port: 4433,
            max_sessions: 1000,
            outbox_capacity: 64,
            metrics_port: 9090,
            tls_cert_path: None,
            tls_key_path: None,
        }
    }
}

impl ServerConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(addr) = env_parse::<IpAddr>("BIND_ADDRESS", |_| true, "an IP address") {
            config.bind_address = addr;
        }
        if let Some(port) = env_parse::<u16>("PORT", |p| *p > 0, "> 0") {
            config.port = port;
        }
        if let Some(max) = env_parse::<usize>("MAX_SESSIONS", |m| (1..=100_000).contains(m), "1-100000") {
            config.max_sessions = max;
        }
        if let Some(cap) = env_parse::<usize>("OUTBOX_CAPACITY", |c| (1..=65_536).contains(c), "1-65536") {
            config.outbox_capacity = cap;
        }
        if let Some(port) = env_parse::<u16>("METRICS_PORT", |p| *p > 0, "> 0") {
            config.metrics_port = port;
        }

        if let Ok(cert_path) = std::env::var("TLS_CERT_PATH") {
            config.tls_cert_path = Some(cert_path);
        }
        if let Ok(key_path) = std::env::var("TLS_KEY_PATH") {
            config.tls_key_path = Some(key_path);
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.max_sessions == 0 {
            return Err("max_sessions must be at least 1".to_string());
        }
        if self.outbox_capacity == 0 {
            return Err("outbox_capacity must be at least 1".to_string());
        }
        if self.metrics_port == self.port {
            return Err("metrics_port must differ from port".to_string());
        }
        if self.tls_cert_path.is_some() != self.tls_key_path.is_some() {
            return Err("TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string());
        }
        Ok(())
    }
}

/// Viewer client configuration
#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// WebTransport URL of the broker
    pub server_url: String,
    /// Base64 SHA-256 of the server certificate, for self-signed dev certs
    pub cert_hash: Option<String>,
    /// Send a reaction this often; `None` only listens
    pub reaction_interval_ms: Option<u64>,
    /// Write every frame as a JSON line to this file
    pub frame_dump: Option<PathBuf>,
    /// Log a frame summary every this many ticks
    pub log_every: u64,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            server_url: "https://localhost:4433".to_string(),
            cert_hash: None,
            reaction_interval_ms: None,
            frame_dump: None,
            log_every: 150,
        }
    }
}

impl ViewerConfig {
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(url) = std::env::var("SERVER_URL") {
            config.server_url = url;
        }
        if let Ok(hash) = std::env::var("CERT_HASH") {
            if !hash.trim().is_empty() {
                config.cert_hash = Some(hash.trim().to_string());
            }
        }
        if let Some(ms) = env_parse::<u64>("REACTION_INTERVAL_MS", |_| true, "a number") {
            config.reaction_interval_ms = (ms > 0).then_some(ms);
        }
        if let Ok(path) = std::env::var("FRAME_DUMP") {
            config.frame_dump = Some(PathBuf::from(path));
        }
        if let Some(every) = env_parse::<u64>("FRAME_LOG_EVERY", |e| *e > 0, "> 0") {
            config.log_every = every;
        }

        config
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.server_url.starts_with("https://") {
            return Err(format!("server_url must be https://, got {}", self.server_url));
        }
        self.cert_digest().map(|_| ())
    }

    /// Decoded certificate hash, if one is configured
    pub fn cert_digest(&self) -> Result<Option<[u8; 32]>, String> {
        let Some(hash) = &self.cert_hash else {
            return Ok(None);
        };
        let bytes = STANDARD
            .decode(hash)
            .map_err(|e| format!("cert hash is not base64: {}", e))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| format!("cert hash must be 32 bytes, got {}", b.len()))?;
        Ok(Some(digest))
    }
}

/// Single-process demo configuration
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Synthetic sessions to connect
    pub sessions: usize,
    /// How long to run before exiting; `None` runs until Ctrl+C
    pub duration_secs: Option<u64>,
    /// Per-tick chance that a given session reacts
    pub reaction_chance: f64,
    /// Per-tick chance that the session set churns (one leaves, one joins)
    pub churn_chance: f64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            sessions: 12,
            duration_secs: Some(20),
            reaction_chance: 0.01,
            churn_chance: 0.005,
        }
    }
}

impl DemoConfig {
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Some(n) = env_parse::<usize>("DEMO_SESSIONS", |n| (1..=1000).contains(n), "1-1000") {
            config.sessions = n;
        }
        if let Some(secs) = env_parse::<u64>("DEMO_SECONDS", |_| true, "a number") {
            config.duration_secs = (secs > 0).then_some(secs);
        }
        if let Some(p) = env_parse::<f64>("DEMO_REACTION_CHANCE", |p| (0.0..=1.0).contains(p), "0-1") {
            config.reaction_chance = p;
        }
        if let Some(p) = env_parse::<f64>("DEMO_CHURN_CHANCE", |p| (0.0..=1.0).contains(p), "0-1") {
            config.churn_chance = p;
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4433);
        assert_eq!(config.metrics_port, 9090);
        assert_eq!(config.outbox_capacity, 64);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_or_default() {
        let config = ServerConfig::load_or_default();
        assert!(config.port > 0);
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = ServerConfig::default();
        config.outbox_capacity = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.metrics_port = config.port;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.tls_cert_path = Some("cert.pem".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_parse_missing_var() {
        let value = env_parse::<u16>("REACTION_RING_TEST_UNSET_VAR", |_| true, "");
        assert!(value.is_none());
    }

    #[test]
    fn test_viewer_cert_digest() {
        let mut config = ViewerConfig::default();
        assert_eq!(config.cert_digest(), Ok(None));

        config.cert_hash = Some(STANDARD.encode([7u8; 32]));
        assert_eq!(config.cert_digest(), Ok(Some([7u8; 32])));
        assert!(config.validate().is_ok());

        config.cert_hash = Some(STANDARD.encode([7u8; 16]));
        assert!(config.cert_digest().is_err());

        config.cert_hash = Some("not base64!".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_viewer_url() {
        let mut config = ViewerConfig::default();
        config.server_url = "http://localhost:4433".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_demo_defaults() {
        let config = DemoConfig::default();
        assert_eq!(config.sessions, 12);
        assert!(config.reaction_chance > 0.0);
    }
}
