use std::time::Duration;

use serde::Deserialize;

use crate::broker::BrokerOptions;
use crate::persistence::BatchConfig;

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub server: ServerSettings,
    pub broker: BrokerSettings,
    pub store: StoreSettings,
    pub logging: LoggingSettings,
}

/// Address the WebSocket server binds to.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

/// Fanout and request limits of the broker.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub fanout_timeout_ms: u64,
    pub subscriber_buffer: usize,
    pub operation_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    InMemory,
    Sled,
}

/// Which message store backs the broker and how it is tuned.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    pub sled: SledSettings,
    pub batch: BatchSettings,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SledSettings {
    pub path: String,
}

/// Write coalescing in front of durable backends.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BatchSettings {
    pub size: usize,
    pub timeout_ms: u64,
    pub queue_capacity: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Missing values are filled from `Settings::default()`.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub store: Option<PartialStoreSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub fanout_timeout_ms: Option<u64>,
    pub subscriber_buffer: Option<usize>,
    pub operation_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialStoreSettings {
    pub backend: Option<StoreBackend>,
    pub sled: Option<PartialSledSettings>,
    pub batch: Option<PartialBatchSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialSledSettings {
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBatchSettings {
    pub size: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub queue_capacity: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            broker: BrokerSettings {
                fanout_timeout_ms: 1000,
                subscriber_buffer: 64,
                operation_timeout_ms: 5000,
            },
            store: StoreSettings {
                backend: StoreBackend::InMemory,
                sled: SledSettings {
                    path: "subjectmq_db".to_string(),
                },
                batch: BatchSettings {
                    size: 2048,
                    timeout_ms: 5,
                    queue_capacity: 1024,
                },
            },
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl Settings {
    /// Fill every value missing from `partial` with the default.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let server = partial.server.unwrap_or_default();
        let broker = partial.broker.unwrap_or_default();
        let store = partial.store.unwrap_or_default();
        let sled = store.sled.unwrap_or_default();
        let batch = store.batch.unwrap_or_default();
        let logging = partial.logging.unwrap_or_default();

        Settings {
            server: ServerSettings {
                host: server.host.unwrap_or(default.server.host),
                port: server.port.unwrap_or(default.server.port),
            },
            broker: BrokerSettings {
                fanout_timeout_ms: broker
                    .fanout_timeout_ms
                    .unwrap_or(default.broker.fanout_timeout_ms),
                subscriber_buffer: broker
                    .subscriber_buffer
                    .unwrap_or(default.broker.subscriber_buffer),
                operation_timeout_ms: broker
                    .operation_timeout_ms
                    .unwrap_or(default.broker.operation_timeout_ms),
            },
            store: StoreSettings {
                backend: store.backend.unwrap_or(default.store.backend),
                sled: SledSettings {
                    path: sled.path.unwrap_or(default.store.sled.path),
                },
                batch: BatchSettings {
                    size: batch.size.unwrap_or(default.store.batch.size),
                    timeout_ms: batch.timeout_ms.unwrap_or(default.store.batch.timeout_ms),
                    queue_capacity: batch
                        .queue_capacity
                        .unwrap_or(default.store.batch.queue_capacity),
                },
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
        }
    }

    /// Reject values that would stall the broker.
    pub fn validate(&self) -> Result<(), String> {
        let checks = [
            (self.broker.fanout_timeout_ms == 0, "broker.fanout_timeout_ms"),
            (self.broker.subscriber_buffer == 0, "broker.subscriber_buffer"),
            (self.broker.operation_timeout_ms == 0, "broker.operation_timeout_ms"),
            (self.store.batch.size == 0, "store.batch.size"),
            (self.store.batch.timeout_ms == 0, "store.batch.timeout_ms"),
            (self.store.batch.queue_capacity == 0, "store.batch.queue_capacity"),
        ];
        let zero: Vec<&str> = checks
            .iter()
            .filter(|(is_zero, _)| *is_zero)
            .map(|(_, name)| *name)
            .collect();

        if zero.is_empty() {
            Ok(())
        } else {
            Err(format!("must be greater than zero: {}", zero.join(", ")))
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn fanout_timeout(&self) -> Duration {
        Duration::from_millis(self.broker.fanout_timeout_ms)
    }

    pub fn broker_options(&self) -> BrokerOptions {
        BrokerOptions {
            subscriber_buffer: self.broker.subscriber_buffer,
            operation_timeout: Duration::from_millis(self.broker.operation_timeout_ms),
        }
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            size: self.store.batch.size,
            timeout: Duration::from_millis(self.store.batch.timeout_ms),
            queue_capacity: self.store.batch.queue_capacity,
        }
    }
}
