use serde::{Deserialize, Serialize};

use crate::manifest::ApplicationManifest;

/// Top-level configuration settings for the application.
///
/// Includes logging, the broker, and the applications registered at startup.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub broker: BrokerSettings,
    pub applications: Vec<ApplicationManifest>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Configuration settings for the broker.
///
/// Controls acknowledgement deadlines and how reply topics and the platform
/// host are named.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct BrokerSettings {
    /// Client-side deadline for broker acknowledgements and `request_one`.
    pub request_timeout_ms: u64,
    pub reply_topic_prefix: String,
    pub host_app_symbolic_name: String,
}

/// Settings as read from files or the environment. Missing values fall back to defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub logging: Option<PartialLoggingSettings>,
    pub broker: Option<PartialBrokerSettings>,
    pub applications: Option<Vec<ApplicationManifest>>,
}

#[derive(Debug, Deserialize)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PartialBrokerSettings {
    pub request_timeout_ms: Option<u64>,
    pub reply_topic_prefix: Option<String>,
    pub host_app_symbolic_name: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            logging: LoggingSettings::default(),
            broker: BrokerSettings::default(),
            applications: Vec::new(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 5000,
            reply_topic_prefix: "_reply".to_string(),
            host_app_symbolic_name: "host".to_string(),
        }
    }
}

impl Settings {
    /// Fills everything `partial` leaves out from the defaults.
    pub fn merge(partial: PartialSettings) -> Self {
        let default = Settings::default();
        let logging = partial.logging.unwrap_or(PartialLoggingSettings { level: None });
        let broker = partial.broker.unwrap_or(PartialBrokerSettings {
            request_timeout_ms: None,
            reply_topic_prefix: None,
            host_app_symbolic_name: None,
        });

        Settings {
            logging: LoggingSettings {
                level: logging.level.unwrap_or(default.logging.level),
            },
            broker: BrokerSettings {
                request_timeout_ms: broker
                    .request_timeout_ms
                    .unwrap_or(default.broker.request_timeout_ms),
                reply_topic_prefix: broker
                    .reply_topic_prefix
                    .unwrap_or(default.broker.reply_topic_prefix),
                host_app_symbolic_name: broker
                    .host_app_symbolic_name
                    .unwrap_or(default.broker.host_app_symbolic_name),
            },
            applications: partial.applications.unwrap_or(default.applications),
        }
    }
}
