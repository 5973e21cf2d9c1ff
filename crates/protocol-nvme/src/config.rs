use serde::{Deserialize, Serialize};

pub const ADMIN_TIMEOUT_ENV: &str = "NVME_ADMIN_TIMEOUT_MS";
pub const IO_TIMEOUT_ENV: &str = "NVME_IO_TIMEOUT_MS";

/// Per-session command settings.
///
/// Timeouts are written into each command block and enforced by the driver,
/// not by this crate. Zero selects the driver default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Timeout for admin commands (identify, log pages, admin passthrough).
    pub admin_timeout_ms: u32,
    /// Timeout for I/O passthrough commands.
    pub io_timeout_ms: u32,
}

impl SessionConfig {
    /// Read timeouts from `NVME_ADMIN_TIMEOUT_MS` and `NVME_IO_TIMEOUT_MS`.
    /// Missing or unparsable values fall back to zero.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u32>().ok())
                .unwrap_or(0)
        };
        Self {
            admin_timeout_ms: millis(ADMIN_TIMEOUT_ENV),
            io_timeout_ms: millis(IO_TIMEOUT_ENV),
        }
    }

    pub fn admin_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.admin_timeout_ms = timeout_ms;
        self
    }

    pub fn io_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.io_timeout_ms = timeout_ms;
        self
    }
}
