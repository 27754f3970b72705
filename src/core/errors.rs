use std::io;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("feedback listener address {0} is already in use")]
    AddressInUse(String),
    #[error("failed to bind feedback listener to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("no feedback message arrived within {0:?}")]
    ListenTimeout(Duration),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Error)]
pub enum SendError {
    #[error("controller at {addr} not reachable within {timeout:?}")]
    Unreachable { addr: String, timeout: Duration },
    #[error("failed to connect to controller at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to write script to {addr}: {source}")]
    Write {
        addr: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SocketRegistryError {
    #[error("socket '{0}' is already registered")]
    Duplicate(String),
    #[error("no socket registered with name '{0}'")]
    Unknown(String),
    #[error("socket '{0}' is not open")]
    NotOpen(String),
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("template error: {0}")]
    Template(#[from] tera::Error),
    #[error(transparent)]
    Socket(#[from] SocketRegistryError),
    #[error("script needs the feedback listener address but none is known")]
    MissingListener,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} cannot be empty")]
    EmptyAddress(&'static str),
    #[error("{0} must be greater than 0")]
    Zero(&'static str),
    #[error("could not parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum FabricationError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("a fabrication run is already in progress")]
    AlreadyRunning,
    #[error("no fabrication run to wait for")]
    NotRunning,
}
