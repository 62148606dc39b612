//! CLI argument parsing

use clap::Parser;
use roomcast_ws::{TransportKind, WsConfig};

/// roomcast - WebSocket rooms over pub/sub
#[derive(Parser, Debug)]
#[command(name = "roomcast-server")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Address to listen on
    #[arg(short, long, env = "ROOMCAST_ADDR", default_value = "127.0.0.1:8080")]
    pub addr: String,

    /// Pub/sub transport backing rooms (none, memory, redis)
    #[arg(short, long)]
    pub transport: Option<TransportKind>,

    /// Redis URL, required by the redis transport
    #[arg(long)]
    pub redis_url: Option<String>,

    /// Token expected by the /auth endpoint
    #[arg(long, env = "ROOMCAST_AUTH_TOKEN", default_value = "secret", hide_env_values = true)]
    pub auth_token: String,
}

impl Cli {
    /// Apply flags given on the command line over the environment configuration
    pub fn apply(&self, mut config: WsConfig) -> WsConfig {
        if let Some(transport) = self.transport {
            config = config.with_transport(transport);
        }
        if let Some(url) = &self.redis_url {
            config = config.with_redis_url(url.clone());
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_environment() {
        let cli = Cli::parse_from([
            "roomcast-server",
            "--transport",
            "redis",
            "--redis-url",
            "redis://cache:6379",
        ]);
        let config = cli.apply(WsConfig::default());

        assert_eq!(config.transport, TransportKind::Redis);
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
    }

    #[test]
    fn test_missing_flags_keep_environment() {
        let cli = Cli::parse_from(["roomcast-server"]);
        let base = WsConfig::default().with_transport(TransportKind::Memory);

        assert_eq!(cli.apply(base.clone()), base);
    }

    #[test]
    fn test_unknown_transport_is_rejected() {
        assert!(Cli::try_parse_from(["roomcast-server", "--transport", "kafka"]).is_err());
    }
}
