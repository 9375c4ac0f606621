use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for the broker connection, the listeners and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub nats: NatsSettings,
    pub listener: ListenerSettings,
    pub logging: LoggingSettings,
}

/// Where and as whom to connect to the streaming server.
///
/// `client_id` is normally left unset so every process picks a random one;
/// two connections with the same id are rejected by the server.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct NatsSettings {
    pub url: String,
    pub cluster_id: String,
    pub client_id: Option<String>,
}

/// Subscription tuning shared by every listener in the process.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ListenerSettings {
    pub ack_wait_ms: u64,
    pub max_in_flight: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values are filled from defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub nats: Option<PartialNatsSettings>,
    pub listener: Option<PartialListenerSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialNatsSettings {
    pub url: Option<String>,
    pub cluster_id: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialListenerSettings {
    pub ack_wait_ms: Option<u64>,
    pub max_in_flight: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            nats: NatsSettings {
                url: "ws://127.0.0.1:4222".to_string(),
                cluster_id: "ticketing".to_string(),
                client_id: None,
            },
            listener: ListenerSettings {
                ack_wait_ms: 5000,
                max_in_flight: 1024,
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `Settings::default()`.
    pub fn merge_with_defaults(self) -> Settings {
        let default = Settings::default();
        let nats = self.nats;
        let listener = self.listener;
        let logging = self.logging;

        Settings {
            nats: NatsSettings {
                url: nats
                    .as_ref()
                    .and_then(|n| n.url.clone())
                    .unwrap_or(default.nats.url),
                cluster_id: nats
                    .as_ref()
                    .and_then(|n| n.cluster_id.clone())
                    .unwrap_or(default.nats.cluster_id),
                client_id: nats
                    .as_ref()
                    .and_then(|n| n.client_id.clone())
                    .filter(|id| !id.is_empty())
                    .or(default.nats.client_id),
            },
            listener: ListenerSettings {
                ack_wait_ms: listener
                    .as_ref()
                    .and_then(|l| l.ack_wait_ms)
                    .unwrap_or(default.listener.ack_wait_ms),
                max_in_flight: listener
                    .as_ref()
                    .and_then(|l| l.max_in_flight)
                    .unwrap_or(default.listener.max_in_flight),
            },
            logging: LoggingSettings {
                level: logging
                    .and_then(|l| l.level)
                    .unwrap_or(default.logging.level),
            },
        }
    }
}
