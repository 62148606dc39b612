//! Transport bootstrap
//!
//! Turns the configured [`TransportKind`] into the one [`RoomHub`] a server
//! is built with. A process that configures no transport gets `None`, and
//! every room operation then reports `AdapterUnavailable`.

use crate::config::{TransportKind, WsConfig};
use crate::error::ServerError;
use crate::sink::ErrorReporter;
use roomcast_pubsub::{ErrorHook, MemoryTransport, RoomHub, TransportError};
use std::sync::Arc;

/// Connect the configured transport and start its hub
///
/// Background transport failures are reported through `reporter`.
pub async fn connect(
    config: &WsConfig,
    reporter: &ErrorReporter,
) -> Result<Option<Arc<RoomHub>>, ServerError> {
    config.validate()?;
    let hook = error_hook(reporter);

    let hub = match config.transport {
        TransportKind::None => {
            tracing::info!("no pub/sub transport configured, room operations disabled");
            return Ok(None);
        }
        TransportKind::Memory => RoomHub::start_with_hook(MemoryTransport::new(), hook),
        TransportKind::Redis => connect_redis(config, hook).await?,
    };
    tracing::info!(transport = hub.transport_name(), "pub/sub transport ready");
    Ok(Some(hub))
}

#[cfg(feature = "redis")]
async fn connect_redis(config: &WsConfig, hook: ErrorHook) -> Result<Arc<RoomHub>, ServerError> {
    use roomcast_pubsub::{RedisConfig, RedisTransport};

    let url = config
        .redis_url
        .clone()
        .ok_or(crate::config::ConfigError::Missing("ROOMCAST_REDIS_URL"))?;
    let transport = RedisTransport::connect(RedisConfig {
        url,
        channel_capacity: config.redis_channel_capacity,
    })
    .await?;
    Ok(RoomHub::start_with_hook(transport, hook))
}

#[cfg(not(feature = "redis"))]
async fn connect_redis(_config: &WsConfig, _hook: ErrorHook) -> Result<Arc<RoomHub>, ServerError> {
    Err(crate::config::ConfigError::Invalid {
        key: "ROOMCAST_TRANSPORT",
        reason: "redis support was not compiled in, enable the `redis` feature".to_string(),
    }
    .into())
}

/// Hook that forwards hub-level transport failures to the error sink
pub fn error_hook(reporter: &ErrorReporter) -> ErrorHook {
    let reporter = reporter.clone();
    Arc::new(move |error: &TransportError| {
        reporter.report(&ServerError::Transport(error.clone()), None)
    })
}
