//! Monitored targets and the read-only accessor the monitor polls.

use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// One monitored address with its display metadata.
///
/// Identity is the `(address, group)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    #[serde(default)]
    pub group: String,
    pub address: String,
    #[serde(default)]
    pub note: String,
}

impl Target {
    pub fn new(group: impl Into<String>, address: impl Into<String>, note: impl Into<String>) -> Self {
        Self { group: group.into(), address: address.into(), note: note.into() }
    }

    pub fn same_key(&self, address: &str, group: &str) -> bool {
        self.address == address && self.group == group
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("Address cannot be empty")]
    EmptyAddress,
    #[error("Invalid address '{0}'")]
    InvalidAddress(String),
    #[error("{address} is already monitored in group '{group}'")]
    Duplicate { address: String, group: String },
    #[error("{address} is not monitored in group '{group}'")]
    NotFound { address: String, group: String },
}

/// Accepts IP literals, `host:port`, and RFC 1123 style hostnames
pub fn validate_address(address: &str) -> Result<(), TargetError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(TargetError::EmptyAddress);
    }
    if address.parse::<IpAddr>().is_ok() || address.parse::<std::net::SocketAddr>().is_ok() {
        return Ok(());
    }

    let host = match address.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => address,
    };

    let valid_label = |label: &str| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    };

    let host = host.strip_suffix('.').unwrap_or(host);
    if host.len() > 253 || !host.split('.').all(valid_label) {
        return Err(TargetError::InvalidAddress(address.to_string()));
    }

    Ok(())
}

/// Read-only accessor the monitor calls once per pass
pub trait TargetSource: Send + Sync {
    /// Current targets in probe order
    fn targets(&self) -> Vec<Target>;
}

impl<F> TargetSource for F
where
    F: Fn() -> Vec<Target> + Send + Sync,
{
    fn targets(&self) -> Vec<Target> {
        self()
    }
}

/// Shared ordered target list, written by configuration and read by the monitor
#[derive(Debug, Clone, Default)]
pub struct TargetList {
    inner: Arc<RwLock<Vec<Target>>>,
}

impl TargetList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already stored targets, skipping duplicates
    pub fn from_targets(targets: impl IntoIterator<Item = Target>) -> Self {
        let list = Self::new();
        {
            let mut inner = list.write();
            for target in targets {
                if !inner.iter().any(|t| t.same_key(&target.address, &target.group)) {
                    inner.push(target);
                }
            }
        }
        list
    }

    /// Append a target after validating it
    pub fn add(&self, target: Target) -> Result<(), TargetError> {
        validate_address(&target.address)?;
        let target = Target { address: target.address.trim().to_string(), ..target };

        let mut inner = self.write();
        if inner.iter().any(|t| t.same_key(&target.address, &target.group)) {
            return Err(TargetError::Duplicate { address: target.address, group: target.group });
        }
        inner.push(target);
        Ok(())
    }

    pub fn remove(&self, address: &str, group: &str) -> Result<Target, TargetError> {
        let mut inner = self.write();
        let idx = inner.iter().position(|t| t.same_key(address, group)).ok_or_else(|| {
            TargetError::NotFound { address: address.to_string(), group: group.to_string() }
        })?;
        Ok(inner.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Vec<Target>> {
        // a panicked writer cannot leave the Vec half-updated
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Target>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TargetSource for TargetList {
    fn targets(&self) -> Vec<Target> {
        self.read().clone()
    }
}
