// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Stamps the broker's `--version` output with `git describe`.
//!
//! Outside a git checkout (e.g. a crates.io build) the package version is
//! used as is.

use std::process::Command;

fn main() {
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/refs");

    let version = describe().unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string());
    println!("cargo:rustc-env=LCP_VERSION={version}");
}

fn describe() -> Option<String> {
    let output = Command::new("git")
        .args(["describe", "--tags", "--always", "--dirty"])
        .output()
        .ok()
        .filter(|output| output.status.success())?;

    let text = String::from_utf8(output.stdout).ok()?;
    let tag = text.trim();
    (!tag.is_empty()).then(|| tag.trim_start_matches('v').to_string())
}
