//! Live system state consulted by resource modules.

use std::{collections::BTreeMap, fs, sync::Arc, thread};

use serde_json::Value;
use tracing::debug;

pub const MEMORY_TOTAL_MIB: &str = "memory.total_mib";
pub const MEMORY_AVAILABLE_MIB: &str = "memory.available_mib";
pub const CPU_COUNT: &str = "cpu.count";
pub const HOSTNAME: &str = "hostname";

/// Source of system facts, keyed by dotted names such as
/// [`MEMORY_TOTAL_MIB`].
pub trait SystemProbe: Send + Sync {
    /// Returns `None` when the fact is not available on this host.
    fn read(&self, key: &str) -> Option<Value>;
}

/// Reads facts from the running host.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostProbe;

impl SystemProbe for HostProbe {
    fn read(&self, key: &str) -> Option<Value> {
        let value = match key {
            MEMORY_TOTAL_MIB => read_meminfo("MemTotal").map(Value::from),
            MEMORY_AVAILABLE_MIB => read_meminfo("MemAvailable").map(Value::from),
            CPU_COUNT => thread::available_parallelism()
                .ok()
                .map(|n| Value::from(n.get())),
            HOSTNAME => fs::read_to_string("/etc/hostname")
                .ok()
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .map(Value::from),
            _ => None,
        };
        debug!(key = %key, found = value.is_some(), "Probed host");
        value
    }
}

fn read_meminfo(field: &str) -> Option<u64> {
    let content = fs::read_to_string("/proc/meminfo").ok()?;
    meminfo_mib(&content, field)
}

/// Extracts a `/proc/meminfo` field, converted from KiB to MiB.
fn meminfo_mib(content: &str, field: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let (name, rest) = line.split_once(':')?;
        if name.trim() != field {
            return None;
        }
        let kib: u64 = rest.split_whitespace().next()?.parse().ok()?;
        Some(kib / 1024)
    })
}

/// Facts pinned from configuration, with an optional fallback probe for
/// everything not pinned.
#[derive(Clone, Default)]
pub struct PinnedProbe {
    values: BTreeMap<String, Value>,
    fallback: Option<Arc<dyn SystemProbe>>,
}

impl PinnedProbe {
    #[must_use]
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self {
            values,
            fallback: None,
        }
    }

    #[must_use]
    pub fn with_fallback(mut self, fallback: Arc<dyn SystemProbe>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    #[must_use]
    pub fn pin(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl SystemProbe for PinnedProbe {
    fn read(&self, key: &str) -> Option<Value> {
        self.values
            .get(key)
            .cloned()
            .or_else(|| self.fallback.as_ref().and_then(|probe| probe.read(key)))
    }
}
