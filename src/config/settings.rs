use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::transport::{Endpoint, SessionOptions, TlsSettings};

/// Top-level configuration for the client and the demonstration binary.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub tls: Option<TlsSettings>,
    pub session: SessionSettings,
    pub demo: DemoSettings,
    pub log: LogSettings,
}

/// Where the broker is and which topic the demo uses.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub topic: String,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SessionSettings {
    pub connect_timeout_ms: u64,
    pub shutdown_timeout_ms: u64,
}

/// Controls the publish/verify run of the binary.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DemoSettings {
    pub message_count: usize,
    pub publish_interval_ms: u64,
    pub settle_ms: u64,
    pub receive_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub tls: Option<PartialTlsSettings>,
    pub session: Option<PartialSessionSettings>,
    pub demo: Option<PartialDemoSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub topic: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialTlsSettings {
    pub ca_cert: Option<PathBuf>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialSessionSettings {
    pub connect_timeout_ms: Option<u64>,
    pub shutdown_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialDemoSettings {
    pub message_count: Option<usize>,
    pub publish_interval_ms: Option<u64>,
    pub settle_ms: Option<u64>,
    pub receive_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                host: "localhost".to_string(),
                port: 1883,
                topic: "emqx/test".to_string(),
            },
            tls: None,
            session: SessionSettings {
                connect_timeout_ms: 10_000,
                shutdown_timeout_ms: 2_000,
            },
            demo: DemoSettings {
                message_count: 5,
                publish_interval_ms: 1_000,
                settle_ms: 1_000,
                receive_timeout_ms: 2_000,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            host: self.broker.host.clone(),
            port: self.broker.port,
            tls: self.tls.clone(),
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect_timeout: Duration::from_millis(self.session.connect_timeout_ms),
            shutdown_timeout: Duration::from_millis(self.session.shutdown_timeout_ms),
        }
    }
}
