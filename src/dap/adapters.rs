// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Debug adapter launch commands and `launch` argument shapes.

use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::AdapterConfig;
use crate::rpc::LaunchSpec;

/// What the caller asked to debug.
#[derive(Debug, Clone, Default)]
pub struct LaunchTarget {
    /// Program to run.
    pub program: PathBuf,
    /// Program arguments.
    pub args: Vec<String>,
    /// Extra environment for the debuggee.
    pub env: HashMap<String, String>,
    /// Working directory of the debuggee.
    pub cwd: PathBuf,
    /// Halt before the first line runs.
    pub stop_on_entry: bool,
}

/// How to start one debug adapter and phrase its `launch` request.
pub trait AdapterProfile: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// `adapterID` sent in `initialize`.
    fn adapter_id(&self) -> &str;

    /// Adapter command line, run in `cwd`.
    fn launch(&self, cwd: &Path) -> LaunchSpec;

    /// Arguments of the `launch` request.
    fn launch_arguments(&self, target: &LaunchTarget) -> Value {
        base_arguments(target)
    }
}

fn base_arguments(target: &LaunchTarget) -> Value {
    json!({
        "request": "launch",
        "program": target.program,
        "args": target.args,
        "env": target.env,
        "cwd": target.cwd,
        "stopOnEntry": target.stop_on_entry,
    })
}

/// debugpy, started as `python3 -m debugpy.adapter`.
pub struct Debugpy;

impl AdapterProfile for Debugpy {
    fn name(&self) -> &str {
        "debugpy"
    }

    fn adapter_id(&self) -> &str {
        "debugpy"
    }

    fn launch(&self, cwd: &Path) -> LaunchSpec {
        LaunchSpec::new(
            "python3",
            vec!["-m".into(), "debugpy.adapter".into()],
            cwd,
        )
    }

    fn launch_arguments(&self, target: &LaunchTarget) -> Value {
        merge(
            base_arguments(target),
            &json!({
                "type": "python",
                "console": "internalConsole",
                "justMyCode": true,
            }),
        )
    }
}

/// An adapter defined in the `[adapter.<language>]` config table.
pub struct ConfiguredAdapter {
    config: AdapterConfig,
}

impl ConfiguredAdapter {
    /// Wraps a config entry.
    #[must_use]
    pub const fn new(config: AdapterConfig) -> Self {
        Self { config }
    }
}

impl AdapterProfile for ConfiguredAdapter {
    fn name(&self) -> &str {
        &self.config.command
    }

    fn adapter_id(&self) -> &str {
        self.config.adapter_id.as_deref().unwrap_or("lcp-broker")
    }

    fn launch(&self, cwd: &Path) -> LaunchSpec {
        LaunchSpec::new(self.config.command.clone(), self.config.args.clone(), cwd)
    }

    fn launch_arguments(&self, target: &LaunchTarget) -> Value {
        match &self.config.launch_defaults {
            Some(defaults) => merge(base_arguments(target), defaults),
            None => base_arguments(target),
        }
    }
}

/// Shallow merge of `extra` into `base`; `extra` wins except for
/// `stopOnEntry`, which the caller controls.
fn merge(base: Value, extra: &Value) -> Value {
    let Value::Object(mut merged) = base else {
        return base;
    };
    if let Value::Object(extra) = extra {
        for (key, value) in extra {
            if key != "stopOnEntry" {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(merged)
}

/// Built-in adapter for a language ID.
#[must_use]
pub fn builtin(language: &str) -> Option<Box<dyn AdapterProfile>> {
    match language {
        "python" => Some(Box::new(Debugpy)),
        _ => None,
    }
}

/// Resolves the adapter for `language`: a configured entry wins over the built-in.
#[must_use]
pub fn resolve(
    language: &str,
    configured: &HashMap<String, AdapterConfig>,
) -> Option<Box<dyn AdapterProfile>> {
    configured.get(language).map_or_else(
        || builtin(language),
        |config| Some(Box::new(ConfiguredAdapter::new(config.clone())) as Box<dyn AdapterProfile>),
    )
}

/// Empty JSON object, for requests without arguments.
#[must_use]
pub fn no_arguments() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    fn target() -> LaunchTarget {
        LaunchTarget {
            program: PathBuf::from("/work/sample.py"),
            args: vec!["--fast".into()],
            env: HashMap::from([("DEBUG".to_string(), "1".to_string())]),
            cwd: PathBuf::from("/work"),
            stop_on_entry: true,
        }
    }

    #[test]
    fn test_debugpy_launch_arguments() {
        let args = Debugpy.launch_arguments(&target());
        assert_eq!(args["type"], "python");
        assert_eq!(args["program"], "/work/sample.py");
        assert_eq!(args["args"], json!(["--fast"]));
        assert_eq!(args["env"]["DEBUG"], "1");
        assert_eq!(args["stopOnEntry"], true);
    }

    #[test]
    fn test_configured_defaults_cannot_override_stop_on_entry() {
        let adapter = ConfiguredAdapter::new(AdapterConfig {
            command: "mockdap".into(),
            args: vec![],
            adapter_id: Some("mock".into()),
            launch_defaults: Some(json!({"stopOnEntry": false, "noDebug": false})),
        });
        let args = adapter.launch_arguments(&target());
        assert_eq!(args["stopOnEntry"], true);
        assert_eq!(args["noDebug"], false);
        assert_eq!(adapter.adapter_id(), "mock");
    }

    #[test]
    fn test_resolve_prefers_config() {
        let mut configured = HashMap::new();
        assert_eq!(resolve("python", &configured).unwrap().name(), "debugpy");
        configured.insert(
            "python".to_string(),
            AdapterConfig {
                command: "/opt/mockdap".into(),
                args: vec![],
                adapter_id: None,
                launch_defaults: None,
            },
        );
        let adapter = resolve("python", &configured).unwrap();
        assert_eq!(adapter.launch(Path::new("/w")).program, "/opt/mockdap");
        assert!(resolve("go", &HashMap::new()).is_none());
    }
}
