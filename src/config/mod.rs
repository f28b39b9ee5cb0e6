mod settings;

use config::{Config, ConfigError, Environment, File};

use crate::transport::TlsSettings;
use settings::PartialTlsSettings;

pub use settings::{
    BrokerSettings, DemoSettings, LogSettings, PartialSettings, SessionSettings, Settings,
};

/// Prefix of the environment variables read by `load_config`, e.g.
/// `BROKERLINK__BROKER__PORT=8883`.
pub const ENV_PREFIX: &str = "BROKERLINK";

/// Loads the configuration from the default file and environment variables
/// Merges the configuration with default values
/// Returns a `Settings` struct for the broker, TLS, session and demo run
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    merge(partial)
}

/// Fills everything `partial` leaves out from `Settings::default()`.
pub fn merge(partial: PartialSettings) -> Result<Settings, ConfigError> {
    let default = Settings::default();
    let broker = partial.broker.unwrap_or_default();
    let session = partial.session.unwrap_or_default();
    let demo = partial.demo.unwrap_or_default();
    let log = partial.log.unwrap_or_default();

    Ok(Settings {
        broker: BrokerSettings {
            host: broker.host.unwrap_or(default.broker.host),
            port: broker.port.unwrap_or(default.broker.port),
            topic: broker.topic.unwrap_or(default.broker.topic),
        },
        tls: merge_tls(partial.tls)?,
        session: SessionSettings {
            connect_timeout_ms: session
                .connect_timeout_ms
                .unwrap_or(default.session.connect_timeout_ms),
            shutdown_timeout_ms: session
                .shutdown_timeout_ms
                .unwrap_or(default.session.shutdown_timeout_ms),
        },
        demo: DemoSettings {
            message_count: demo.message_count.unwrap_or(default.demo.message_count),
            publish_interval_ms: demo
                .publish_interval_ms
                .unwrap_or(default.demo.publish_interval_ms),
            settle_ms: demo.settle_ms.unwrap_or(default.demo.settle_ms),
            receive_timeout_ms: demo
                .receive_timeout_ms
                .unwrap_or(default.demo.receive_timeout_ms),
        },
        log: LogSettings {
            level: log.level.unwrap_or(default.log.level),
        },
    })
}

// TLS is all-or-nothing: a CA without a client identity cannot do mutual TLS
fn merge_tls(partial: Option<PartialTlsSettings>) -> Result<Option<TlsSettings>, ConfigError> {
    let Some(tls) = partial else {
        return Ok(None);
    };

    match (tls.ca_cert, tls.client_cert, tls.client_key) {
        (None, None, None) => Ok(None),
        (Some(ca_cert), Some(client_cert), Some(client_key)) => Ok(Some(TlsSettings {
            ca_cert,
            client_cert,
            client_key,
        })),
        _ => Err(ConfigError::Message(
            "tls requires ca_cert, client_cert and client_key together".to_string(),
        )),
    }
}
