use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ConfigError, DEFAULT_MAX_LINE_LENGTH};

pub static DEFAULT_LISTENER_IP: &'static str = "127.0.0.1";
pub const DEFAULT_LISTENER_PORT: u16 = 50002;
pub static DEFAULT_SOCKET_NAME: &'static str = "feedback_socket";
pub static DEFAULT_CONTROLLER_IP: &'static str = "127.0.0.1";
// Secondary client interface, accepts a full script per connection.
pub const DEFAULT_CONTROLLER_PORT: u16 = 30002;

/// Feedback listener settings.
///
/// ```rust,ignore
/// let config = ListenerConfig {
///     port: 0, // let the OS pick
///     ..Default::default()
/// };
/// config.validate()?;
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    pub ip: String,
    pub port: u16,
    /// Upper bound on a single line read, after which the handler re-checks
    /// for shutdown.
    #[serde(with = "duration_ms")]
    pub read_timeout: Duration,
    /// Sleep between passes of the processing loop.
    #[serde(with = "duration_ms")]
    pub processing_interval: Duration,
    /// Default idle timeout of [`FeedbackListener::listen`]. The background
    /// processing loop of a started listener never times out.
    ///
    /// [`FeedbackListener::listen`]: crate::FeedbackListener::listen
    #[serde(with = "option_duration_ms")]
    pub processing_timeout: Option<Duration>,
    /// Longer lines are stored in pieces of this many bytes.
    pub max_line_length: usize,
    pub echo_replies: bool,
    /// Name used for the socket inside generated scripts.
    pub socket_name: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            ip: DEFAULT_LISTENER_IP.to_string(),
            port: DEFAULT_LISTENER_PORT,
            read_timeout: Duration::from_millis(250),
            processing_interval: Duration::from_millis(1),
            processing_timeout: None,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            echo_replies: true,
            socket_name: DEFAULT_SOCKET_NAME.to_string(),
        }
    }
}

impl ListenerConfig {
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            ip: ip.to_string(),
            port,
            ..Default::default()
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    /// Port 0 is allowed here, the OS assigns one at bind time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ip.is_empty() {
            return Err(ConfigError::EmptyAddress("listener ip"));
        }
        if self.socket_name.is_empty() {
            return Err(ConfigError::EmptyAddress("listener socket name"));
        }
        if self.read_timeout.is_zero() {
            return Err(ConfigError::Zero("listener read timeout"));
        }
        if self.processing_interval.is_zero() {
            return Err(ConfigError::Zero("listener processing interval"));
        }
        if self.max_line_length == 0 {
            return Err(ConfigError::Zero("listener max line length"));
        }
        Ok(())
    }
}

/// Where scripts go.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ControllerConfig {
    pub ip: String,
    pub port: u16,
    #[serde(with = "duration_ms")]
    pub connect_timeout: Duration,
    /// Deceleration passed to `stopl` in the stop command.
    pub stop_deceleration: f64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            ip: DEFAULT_CONTROLLER_IP.to_string(),
            port: DEFAULT_CONTROLLER_PORT,
            connect_timeout: Duration::from_secs(2),
            stop_deceleration: 0.5,
        }
    }
}

impl ControllerConfig {
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            ip: ip.to_string(),
            port,
            ..Default::default()
        }
    }

    pub fn connection_url(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ip.is_empty() {
            return Err(ConfigError::EmptyAddress("controller ip"));
        }
        if self.port == 0 {
            return Err(ConfigError::Zero("controller port"));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Zero("controller connect timeout"));
        }
        Ok(())
    }
}

/// Send/await-ack policy of a task.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    /// Number of times the script is transmitted before giving up.
    pub attempts: u32,
    #[serde(with = "duration_ms")]
    pub ack_timeout: Duration,
    #[serde(with = "duration_ms")]
    pub poll_interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 2,
            ack_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, ack_timeout: Duration) -> Self {
        Self {
            attempts,
            ack_timeout,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attempts == 0 {
            return Err(ConfigError::Zero("attempts"));
        }
        if self.ack_timeout.is_zero() {
            return Err(ConfigError::Zero("ack timeout"));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero("poll interval"));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
#[serde(default)]
pub struct FabricationConfig {
    pub listener: ListenerConfig,
    pub controller: ControllerConfig,
    pub retry: RetryPolicy,
}

impl FabricationConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: FabricationConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listener.validate()?;
        self.controller.validate()?;
        self.retry.validate()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(deserializer)?.map(Duration::from_millis))
    }
}
