use std::time::Duration;

use serde::Deserialize;

use crate::broker::Prefetch;
use crate::topology::{DEFAULT_FANOUT_EXCHANGE, DEFAULT_WORK_QUEUE, TopologyDescriptor};

/// Top-level configuration settings for the application.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub topology: TopologySettings,
    pub worker: WorkerSettings,
    pub log: LogSettings,
}

/// Where the AMQP broker lives and how to log in.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub vhost: String,
}

impl BrokerSettings {
    /// Connection URI in the form `lapin` expects. The default vhost `/` is
    /// percent-encoded.
    pub fn amqp_uri(&self) -> String {
        let vhost = self.vhost.trim_start_matches('/').replace('/', "%2f");
        let vhost = if vhost.is_empty() { "%2f".to_string() } else { vhost };
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, vhost
        )
    }
}

/// Names of the well-known exchange and queue.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TopologySettings {
    pub exchange: String,
    pub queue: String,
}

impl TopologySettings {
    pub fn fanout(&self) -> TopologyDescriptor {
        TopologyDescriptor::fanout(self.exchange.as_str())
    }

    pub fn work_queue(&self) -> TopologyDescriptor {
        TopologyDescriptor::work_queue(self.queue.as_str())
    }
}

/// Consumer tuning.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// `0` means unbounded.
    pub prefetch: u16,
    pub unit_delay_ms: u64,
    pub shutdown_grace_ms: u64,
}

impl WorkerSettings {
    pub fn prefetch(&self) -> Prefetch {
        Prefetch::from_count(self.prefetch)
    }

    pub fn unit_delay(&self) -> Duration {
        Duration::from_millis(self.unit_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct LogSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub topology: Option<PartialTopologySettings>,
    pub worker: Option<PartialWorkerSettings>,
    pub log: Option<PartialLogSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub vhost: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialTopologySettings {
    pub exchange: Option<String>,
    pub queue: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialWorkerSettings {
    pub prefetch: Option<u16>,
    pub unit_delay_ms: Option<u64>,
    pub shutdown_grace_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLogSettings {
    pub level: Option<String>,
}

impl PartialSettings {
    /// Fill every missing value from `defaults`.
    pub fn merge_over(self, defaults: Settings) -> Settings {
        let broker = self.broker.unwrap_or_default();
        let topology = self.topology.unwrap_or_default();
        let worker = self.worker.unwrap_or_default();
        let log = self.log.unwrap_or_default();

        Settings {
            broker: BrokerSettings {
                host: broker.host.unwrap_or(defaults.broker.host),
                port: broker.port.unwrap_or(defaults.broker.port),
                username: broker.username.unwrap_or(defaults.broker.username),
                password: broker.password.unwrap_or(defaults.broker.password),
                vhost: broker.vhost.unwrap_or(defaults.broker.vhost),
            },
            topology: TopologySettings {
                exchange: topology.exchange.unwrap_or(defaults.topology.exchange),
                queue: topology.queue.unwrap_or(defaults.topology.queue),
            },
            worker: WorkerSettings {
                prefetch: worker.prefetch.unwrap_or(defaults.worker.prefetch),
                unit_delay_ms: worker.unit_delay_ms.unwrap_or(defaults.worker.unit_delay_ms),
                shutdown_grace_ms: worker
                    .shutdown_grace_ms
                    .unwrap_or(defaults.worker.shutdown_grace_ms),
            },
            log: LogSettings {
                level: log.level.unwrap_or(defaults.log.level),
            },
        }
    }
}

/// Provides default values for `Settings`.
///
/// A local RabbitMQ with the stock `guest` account, the `logs` exchange and
/// the `work_queues` queue, one message in flight per worker.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                host: "localhost".to_string(),
                port: 5672,
                username: "guest".to_string(),
                password: "guest".to_string(),
                vhost: "/".to_string(),
            },
            topology: TopologySettings {
                exchange: DEFAULT_FANOUT_EXCHANGE.to_string(),
                queue: DEFAULT_WORK_QUEUE.to_string(),
            },
            worker: WorkerSettings {
                prefetch: 1,
                unit_delay_ms: 1000,
                shutdown_grace_ms: 5000,
            },
            log: LogSettings {
                level: "info".to_string(),
            },
        }
    }
}
