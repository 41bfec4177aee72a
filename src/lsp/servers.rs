// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Per-server launch commands and capability payloads.
//!
//! Profiles only describe how to start a server and what to send in
//! `initialize`; the transport and lifecycle live in [`super::AnalysisClient`].

use lsp_types::{
    ClientCapabilities, DocumentSymbolClientCapabilities, GeneralClientCapabilities,
    HoverClientCapabilities, MarkupKind, PositionEncodingKind, PublishDiagnosticsClientCapabilities,
    TextDocumentClientCapabilities, TextDocumentSyncClientCapabilities, WindowClientCapabilities,
    WorkspaceClientCapabilities,
};
use serde_json::{Value, json};
use std::path::Path;

use crate::config::ServerConfig;
use crate::rpc::LaunchSpec;

/// How to start and initialize one language server.
pub trait ServerProfile: Send + Sync {
    /// Short name used in logs and status.
    fn name(&self) -> &str;

    /// Command line, run with `root` as the working directory.
    fn launch(&self, root: &Path) -> LaunchSpec;

    /// `initializationOptions` for the handshake.
    fn initialization_options(&self) -> Option<Value> {
        None
    }

    /// Capabilities advertised in `initialize`.
    fn capabilities(&self) -> ClientCapabilities {
        base_capabilities()
    }
}

/// Capabilities every profile starts from.
#[must_use]
pub fn base_capabilities() -> ClientCapabilities {
    ClientCapabilities {
        general: Some(GeneralClientCapabilities {
            position_encodings: Some(vec![PositionEncodingKind::UTF16]),
            ..Default::default()
        }),
        text_document: Some(TextDocumentClientCapabilities {
            synchronization: Some(TextDocumentSyncClientCapabilities {
                did_save: Some(true),
                ..Default::default()
            }),
            hover: Some(HoverClientCapabilities {
                content_format: Some(vec![MarkupKind::Markdown, MarkupKind::PlainText]),
                ..Default::default()
            }),
            document_symbol: Some(DocumentSymbolClientCapabilities {
                hierarchical_document_symbol_support: Some(true),
                ..Default::default()
            }),
            publish_diagnostics: Some(PublishDiagnosticsClientCapabilities {
                related_information: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        }),
        window: Some(WindowClientCapabilities {
            work_done_progress: Some(true),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

/// Pyright (`pyright-langserver --stdio`).
pub struct Pyright;

impl ServerProfile for Pyright {
    fn name(&self) -> &str {
        "pyright"
    }

    fn launch(&self, root: &Path) -> LaunchSpec {
        LaunchSpec::new("pyright-langserver", args(&["--stdio"]), root)
    }

    fn capabilities(&self) -> ClientCapabilities {
        // Pyright pulls its settings through workspace/configuration.
        ClientCapabilities {
            workspace: Some(WorkspaceClientCapabilities {
                configuration: Some(true),
                workspace_folders: Some(true),
                ..Default::default()
            }),
            ..base_capabilities()
        }
    }
}

/// `typescript-language-server --stdio` (TypeScript and JavaScript).
pub struct TypeScriptLanguageServer;

impl ServerProfile for TypeScriptLanguageServer {
    fn name(&self) -> &str {
        "typescript-language-server"
    }

    fn launch(&self, root: &Path) -> LaunchSpec {
        LaunchSpec::new("typescript-language-server", args(&["--stdio"]), root)
    }

    fn initialization_options(&self) -> Option<Value> {
        Some(json!({ "hostInfo": "lcp-broker" }))
    }
}

/// rust-analyzer.
pub struct RustAnalyzer;

impl ServerProfile for RustAnalyzer {
    fn name(&self) -> &str {
        "rust-analyzer"
    }

    fn launch(&self, root: &Path) -> LaunchSpec {
        LaunchSpec::new("rust-analyzer", Vec::new(), root)
    }

    fn initialization_options(&self) -> Option<Value> {
        Some(json!({ "cargo": { "buildScripts": { "enable": true } } }))
    }
}

/// gopls.
pub struct Gopls;

impl ServerProfile for Gopls {
    fn name(&self) -> &str {
        "gopls"
    }

    fn launch(&self, root: &Path) -> LaunchSpec {
        LaunchSpec::new("gopls", args(&["serve"]), root)
    }
}

/// A server defined in the `[server.<language>]` config table.
pub struct ConfiguredServer {
    config: ServerConfig,
}

impl ConfiguredServer {
    /// Wraps a config entry.
    #[must_use]
    pub const fn new(config: ServerConfig) -> Self {
        Self { config }
    }
}

impl ServerProfile for ConfiguredServer {
    fn name(&self) -> &str {
        &self.config.command
    }

    fn launch(&self, root: &Path) -> LaunchSpec {
        LaunchSpec::new(self.config.command.clone(), self.config.args.clone(), root)
    }

    fn initialization_options(&self) -> Option<Value> {
        self.config.initialization_options.clone()
    }
}

/// Built-in profile for a language ID.
#[must_use]
pub fn builtin(language: &str) -> Option<Box<dyn ServerProfile>> {
    match language {
        "python" => Some(Box::new(Pyright)),
        "typescript" | "typescriptreact" | "javascript" | "javascriptreact" => {
            Some(Box::new(TypeScriptLanguageServer))
        }
        "rust" => Some(Box::new(RustAnalyzer)),
        "go" => Some(Box::new(Gopls)),
        _ => None,
    }
}

/// Resolves the profile for `language`: a configured entry wins over the built-in.
#[must_use]
pub fn resolve(
    language: &str,
    configured: &std::collections::HashMap<String, ServerConfig>,
) -> Option<Box<dyn ServerProfile>> {
    configured.get(language).map_or_else(
        || builtin(language),
        |config| Some(Box::new(ConfiguredServer::new(config.clone())) as Box<dyn ServerProfile>),
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_builtin_profiles() {
        assert_eq!(builtin("python").unwrap().name(), "pyright");
        assert_eq!(builtin("javascript").unwrap().name(), "typescript-language-server");
        assert_eq!(builtin("go").unwrap().launch(Path::new("/w")).args, vec!["serve"]);
        assert!(builtin("cobol").is_none());
    }

    #[test]
    fn test_config_overrides_builtin() {
        let mut configured = HashMap::new();
        configured.insert(
            "python".to_string(),
            ServerConfig {
                command: "pylsp".into(),
                args: vec!["-v".into()],
                initialization_options: Some(json!({"x": 1})),
            },
        );

        let profile = resolve("python", &configured).unwrap();
        let spec = profile.launch(Path::new("/work"));
        assert_eq!(spec.program, "pylsp");
        assert_eq!(spec.args, vec!["-v"]);
        assert_eq!(spec.cwd, Path::new("/work"));
        assert_eq!(profile.initialization_options(), Some(json!({"x": 1})));

        assert_eq!(resolve("rust", &configured).unwrap().name(), "rust-analyzer");
    }

    #[test]
    fn test_pyright_advertises_configuration() {
        let caps = Pyright.capabilities();
        assert_eq!(caps.workspace.unwrap().configuration, Some(true));
        assert!(caps.text_document.is_some());
    }
}
