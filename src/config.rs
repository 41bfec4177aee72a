/*
 * Copyright (C) 2026 Mark Wells Dev
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Broker configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Session idle timeout in seconds before eviction (default: 1800)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Interval in seconds between idle-session sweeps (default: 60)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval: u64,

    /// Seconds an open file may go untouched before it is closed (default: 300)
    #[serde(default = "default_file_idle_timeout")]
    pub file_idle_timeout: u64,

    /// Delay in milliseconds to let pushed diagnostics settle (default: 500)
    #[serde(default = "default_diagnostics_settle_ms")]
    pub diagnostics_settle_ms: u64,

    /// Optional per-request timeout in seconds. Unset means requests wait
    /// until the server answers or exits.
    #[serde(default)]
    pub request_timeout: Option<u64>,

    /// Bound in milliseconds on graceful shutdown/disconnect requests (default: 2000)
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    /// Debug orchestration settings
    #[serde(default)]
    pub debug: DebugConfig,

    /// Language server definitions keyed by language ID (e.g., "rust", "python")
    #[serde(default)]
    pub server: HashMap<String, ServerConfig>,

    /// Debug adapter definitions keyed by language ID
    #[serde(default)]
    pub adapter: HashMap<String, AdapterConfig>,
}

/// Timeouts for the step orchestrator.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct DebugConfig {
    /// How long to wait for a stop event after a step (default: 5000)
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    /// How long to wait for a stop event after the fallback pause (default: 2000)
    #[serde(default = "default_pause_timeout_ms")]
    pub pause_timeout_ms: u64,

    /// How long the launch handshake may take to reach the entry stop (default: 15000)
    #[serde(default = "default_launch_timeout_ms")]
    pub launch_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// The command to execute (e.g., "rust-analyzer")
    pub command: String,

    /// Arguments to pass to the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Initialization options to pass to the LSP server
    #[serde(default)]
    pub initialization_options: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdapterConfig {
    /// The command to execute (e.g., "python3")
    pub command: String,

    /// Arguments to pass to the command (e.g., ["-m", "debugpy.adapter"])
    #[serde(default)]
    pub args: Vec<String>,

    /// `adapterID` sent in the initialize request
    #[serde(default)]
    pub adapter_id: Option<String>,

    /// Extra fields merged into every launch request
    #[serde(default)]
    pub launch_defaults: Option<serde_json::Value>,
}

const fn default_idle_timeout() -> u64 {
    1800
}

const fn default_sweep_interval() -> u64 {
    60
}

const fn default_file_idle_timeout() -> u64 {
    300
}

const fn default_diagnostics_settle_ms() -> u64 {
    500
}

const fn default_shutdown_timeout_ms() -> u64 {
    2000
}

const fn default_stop_timeout_ms() -> u64 {
    5000
}

const fn default_pause_timeout_ms() -> u64 {
    2000
}

const fn default_launch_timeout_ms() -> u64 {
    15000
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: default_stop_timeout_ms(),
            pause_timeout_ms: default_pause_timeout_ms(),
            launch_timeout_ms: default_launch_timeout_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_timeout: default_idle_timeout(),
            sweep_interval: default_sweep_interval(),
            file_idle_timeout: default_file_idle_timeout(),
            diagnostics_settle_ms: default_diagnostics_settle_ms(),
            request_timeout: None,
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            debug: DebugConfig::default(),
            server: HashMap::new(),
            adapter: HashMap::new(),
        }
    }
}

impl Config {
    /// Load configuration from standard paths or a specific file.
    pub fn load(explicit_file: Option<PathBuf>) -> Result<Self> {
        let mut builder = config::Config::builder();

        // 1. Start with defaults
        builder = builder
            .set_default("idle_timeout", 1800)?
            .set_default("sweep_interval", 60)?
            .set_default("file_idle_timeout", 300)?;

        // 2. Load from user config directory (~/.config/lcp/config.toml)
        if let Some(config_dir) = dirs::config_dir() {
            let config_path = config_dir.join("lcp").join("config.toml");
            if config_path.exists() {
                builder = builder.add_source(config::File::from(config_path));
            }
        }

        // 3. Load from explicit file if provided
        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path));
        }

        // 4. Load from environment variables (LCP_IDLE_TIMEOUT, LCP_DEBUG__STOP_TIMEOUT_MS, etc.)
        builder = builder.add_source(
            config::Environment::with_prefix("LCP")
                .prefix_separator("_")
                .separator("__"),
        );

        let config = builder
            .build()
            .context("Failed to build configuration")?;

        config.try_deserialize().context("Failed to deserialize configuration")
    }

    /// Session idle threshold.
    #[must_use]
    pub const fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    /// Interval between idle sweeps; never zero.
    #[must_use]
    pub fn sweep_period(&self) -> Duration {
        Duration::from_secs(self.sweep_interval.max(1))
    }

    /// Open-file auto-close delay; `None` disables auto-close.
    #[must_use]
    pub const fn file_idle_delay(&self) -> Option<Duration> {
        if self.file_idle_timeout == 0 {
            None
        } else {
            Some(Duration::from_secs(self.file_idle_timeout))
        }
    }

    /// Diagnostics settle delay.
    #[must_use]
    pub const fn diagnostics_settle(&self) -> Duration {
        Duration::from_millis(self.diagnostics_settle_ms)
    }

    /// Opt-in per-request bound.
    #[must_use]
    pub fn request_bound(&self) -> Option<Duration> {
        self.request_timeout.map(Duration::from_secs)
    }

    /// Bound on the debug launch handshake.
    #[must_use]
    pub const fn launch_bound(&self) -> Duration {
        Duration::from_millis(self.debug.launch_timeout_ms)
    }

    /// Bound on graceful shutdown requests.
    #[must_use]
    pub const fn shutdown_bound(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session_idle_timeout(), Duration::from_secs(1800));
        assert_eq!(config.file_idle_delay(), Some(Duration::from_secs(300)));
        assert_eq!(config.debug.stop_timeout_ms, 5000);
        assert_eq!(config.debug.pause_timeout_ms, 2000);
        assert!(config.request_bound().is_none());
    }

    #[test]
    fn test_zero_file_timeout_disables_auto_close() {
        let config = Config {
            file_idle_timeout: 0,
            ..Config::default()
        };
        assert!(config.file_idle_delay().is_none());
    }

    #[test]
    fn test_load_explicit_file() {
        let mut table = toml::Table::new();
        table.insert("idle_timeout".into(), toml::Value::Integer(42));

        let mut python = toml::Table::new();
        python.insert("command".into(), toml::Value::String("pylsp".into()));
        let mut servers = toml::Table::new();
        servers.insert("python".into(), toml::Value::Table(python));
        table.insert("server".into(), toml::Value::Table(servers));

        let mut debug = toml::Table::new();
        debug.insert("stop_timeout_ms".into(), toml::Value::Integer(750));
        table.insert("debug".into(), toml::Value::Table(debug));

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "{}", toml::to_string(&table).unwrap()).unwrap();

        let config = Config::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.idle_timeout, 42);
        assert_eq!(config.server["python"].command, "pylsp");
        assert!(config.server["python"].args.is_empty());
        assert_eq!(config.debug.stop_timeout_ms, 750);
        assert_eq!(config.debug.pause_timeout_ms, 2000);
    }
}
