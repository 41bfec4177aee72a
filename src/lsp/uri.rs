// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! File path, `file://` URI and language ID helpers.

use anyhow::{Result, anyhow};
use lsp_types::Uri;
use std::path::{Path, PathBuf};

/// Converts an absolute path into a percent-encoded `file://` URI.
///
/// # Errors
///
/// Returns an error for relative paths.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
    let url = url::Url::from_file_path(path)
        .map_err(|()| anyhow!("Path is not absolute: {}", path.display()))?;
    url.as_str()
        .parse()
        .map_err(|e| anyhow!("Invalid path for URI: {}: {}", path.display(), e))
}

/// Converts a `file://` URI back into a path.
#[must_use]
pub fn uri_to_path(uri: &Uri) -> Option<PathBuf> {
    url::Url::parse(uri.as_str()).ok()?.to_file_path().ok()
}

/// Language ID for a file, from its extension.
#[must_use]
pub fn detect_language_id(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("rs") => "rust",
        Some("go") => "go",
        Some("py" | "pyi") => "python",
        Some("js" | "mjs" | "cjs") => "javascript",
        Some("ts" | "mts" | "cts") => "typescript",
        Some("tsx") => "typescriptreact",
        Some("jsx") => "javascriptreact",
        Some("c") => "c",
        Some("cpp" | "cc" | "cxx" | "h" | "hpp") => "cpp",
        Some("java") => "java",
        Some("rb") => "ruby",
        Some("lua") => "lua",
        _ => "plaintext",
    }
}

/// The server family a language ID is served by.
///
/// TypeScript and JavaScript variants share one server process.
#[must_use]
pub fn server_language(language_id: &str) -> &str {
    match language_id {
        "typescriptreact" | "javascript" | "javascriptreact" => "typescript",
        other => other,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    #[test]
    fn test_language_detection() {
        assert_eq!(detect_language_id(Path::new("a/sample.py")), "python");
        assert_eq!(detect_language_id(Path::new("main.rs")), "rust");
        assert_eq!(detect_language_id(Path::new("App.tsx")), "typescriptreact");
        assert_eq!(detect_language_id(Path::new("README")), "plaintext");
    }

    #[test]
    fn test_server_language_groups_typescript() {
        assert_eq!(server_language("javascriptreact"), "typescript");
        assert_eq!(server_language("typescript"), "typescript");
        assert_eq!(server_language("python"), "python");
    }

    #[test]
    fn test_uri_round_trip_with_spaces() {
        let path = Path::new("/tmp/my project/sample.py");
        let uri = path_to_uri(path).unwrap();
        assert_eq!(uri.as_str(), "file:///tmp/my%20project/sample.py");
        assert_eq!(uri_to_path(&uri).unwrap(), path);
    }

    #[test]
    fn test_relative_path_rejected() {
        assert!(path_to_uri(Path::new("relative/file.py")).is_err());
    }
}
