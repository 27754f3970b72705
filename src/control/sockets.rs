use std::collections::BTreeMap;

use crate::SocketRegistryError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEntry {
    pub ip: String,
    pub port: u16,
    open_count: u32,
}

impl SocketEntry {
    pub fn is_open(&self) -> bool {
        self.open_count > 0
    }
}

/// Named sockets used inside a generated script.
///
/// `open` and `close` are reference counted: only the first open and the
/// last close need a matching command in the script, which the returned
/// bool signals.
#[derive(Debug, Clone, Default)]
pub struct SocketRegistry {
    sockets: BTreeMap<String, SocketEntry>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, ip: &str, port: u16) -> Result<(), SocketRegistryError> {
        if self.sockets.contains_key(name) {
            return Err(SocketRegistryError::Duplicate(name.to_string()));
        }
        self.sockets.insert(
            name.to_string(),
            SocketEntry {
                ip: ip.to_string(),
                port,
                open_count: 0,
            },
        );
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Result<SocketEntry, SocketRegistryError> {
        self.sockets
            .remove(name)
            .ok_or_else(|| SocketRegistryError::Unknown(name.to_string()))
    }

    pub fn get(&self, name: &str) -> Result<&SocketEntry, SocketRegistryError> {
        self.sockets
            .get(name)
            .ok_or_else(|| SocketRegistryError::Unknown(name.to_string()))
    }

    /// Returns `true` when this call actually opened the socket.
    pub fn open(&mut self, name: &str) -> Result<bool, SocketRegistryError> {
        let entry = self
            .sockets
            .get_mut(name)
            .ok_or_else(|| SocketRegistryError::Unknown(name.to_string()))?;
        entry.open_count += 1;
        Ok(entry.open_count == 1)
    }

    /// Returns `true` when this call released the last reference.
    pub fn close(&mut self, name: &str) -> Result<bool, SocketRegistryError> {
        let entry = self
            .sockets
            .get_mut(name)
            .ok_or_else(|| SocketRegistryError::Unknown(name.to_string()))?;
        if entry.open_count == 0 {
            return Err(SocketRegistryError::NotOpen(name.to_string()));
        }
        entry.open_count -= 1;
        Ok(entry.open_count == 0)
    }

    /// Drops every reference to `name` at once.
    pub fn force_close(&mut self, name: &str) -> Result<(), SocketRegistryError> {
        let entry = self
            .sockets
            .get_mut(name)
            .ok_or_else(|| SocketRegistryError::Unknown(name.to_string()))?;
        if entry.open_count == 0 {
            return Err(SocketRegistryError::NotOpen(name.to_string()));
        }
        entry.open_count = 0;
        Ok(())
    }

    pub fn is_open(&self, name: &str) -> Result<bool, SocketRegistryError> {
        Ok(self.get(name)?.is_open())
    }

    pub fn find_by_address(&self, ip: &str, port: u16) -> Option<&str> {
        self.sockets
            .iter()
            .find(|(_, entry)| entry.ip == ip && entry.port == port)
            .map(|(name, _)| name.as_str())
    }

    pub fn open_names(&self) -> Vec<String> {
        self.sockets
            .iter()
            .filter(|(_, entry)| entry.is_open())
            .map(|(name, _)| name.clone())
            .collect()
    }
}
