use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How the relay picks recipients for offer/answer/candidate frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    /// Fan out to every other connection; receivers filter on `target`.
    #[default]
    Broadcast,
    /// Deliver to the registered `target` only; untargeted frames still fan out.
    Targeted,
}

impl FromStr for RoutingMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "broadcast" => Ok(Self::Broadcast),
            "targeted" => Ok(Self::Targeted),
            other => Err(format!("unknown routing mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub bind_addr: String,
    pub routing: RoutingMode,
    pub ping_interval: Duration,
}

impl RelayConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env::var("SIGNAL_BIND_ADDR").unwrap_or(defaults.bind_addr),
            routing: env::var("SIGNAL_ROUTING")
                .ok()
                .and_then(|val| val.parse().ok())
                .unwrap_or(defaults.routing),
            ping_interval: env::var("SIGNAL_PING_INTERVAL_SECS")
                .ok()
                .and_then(|val| parse_positive(&val))
                .map(Duration::from_secs)
                .unwrap_or(defaults.ping_interval),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            routing: RoutingMode::Broadcast,
            ping_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub relay_url: String,
    pub identity_path: PathBuf,
    pub reconnect_delay: Duration,
}

impl ClientConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            relay_url: env::var("SIGNAL_RELAY_URL").unwrap_or(defaults.relay_url),
            identity_path: env::var("SIGNAL_IDENTITY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.identity_path),
            reconnect_delay: env::var("SIGNAL_RECONNECT_DELAY_MS")
                .ok()
                .and_then(|val| parse_positive(&val))
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_delay),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:3000/ws".to_string(),
            identity_path: PathBuf::from(".koda-call/identity.json"),
            reconnect_delay: Duration::from_millis(2000),
        }
    }
}

/// Zero is rejected: both the ping timer and the reconnect loop need a real
/// period.
fn parse_positive(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}
