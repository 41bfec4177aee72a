// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! In-memory breakpoint table.
//!
//! The debug protocol only accepts a full replacement list per file, so every
//! change is followed by a sync of that file's enabled breakpoints. The ids
//! sent in the last sync are remembered so the adapter's acknowledgments can
//! be matched back positionally.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::position::to_zero_based;
use crate::protocol::dap::{BreakpointAck, SourceBreakpoint};

/// Broker-assigned breakpoint id.
pub type BreakpointId = u64;

/// Optional breakpoint behaviour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakpointOptions {
    /// Break only when this expression is true.
    #[serde(default)]
    pub condition: Option<String>,
    /// Break only after this many hits.
    #[serde(default)]
    pub hit_condition: Option<String>,
    /// Log this message instead of stopping.
    #[serde(default)]
    pub log_message: Option<String>,
}

/// One breakpoint, as shown to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    /// Broker-assigned id.
    pub id: BreakpointId,
    /// Source file.
    pub file: PathBuf,
    /// 1-based line.
    pub line: u32,
    /// Set only from the adapter's acknowledgment.
    pub verified: bool,
    /// Disabled breakpoints are kept here but never sent upstream.
    pub enabled: bool,
    /// Options given at creation.
    #[serde(flatten)]
    pub options: BreakpointOptions,
    /// Adapter explanation for an unverified breakpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Breakpoint {
    fn to_source(&self) -> SourceBreakpoint {
        SourceBreakpoint {
            line: to_zero_based(i64::from(self.line)),
            condition: self.options.condition.clone(),
            hit_condition: self.options.hit_condition.clone(),
            log_message: self.options.log_message.clone(),
        }
    }
}

/// Breakpoints keyed by id, grouped by file on demand.
#[derive(Debug, Default)]
pub struct BreakpointManager {
    next_id: BreakpointId,
    breakpoints: BTreeMap<BreakpointId, Breakpoint>,
    last_sent: HashMap<PathBuf, Vec<BreakpointId>>,
}

impl BreakpointManager {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new enabled, unverified breakpoint. Never merges with an
    /// existing breakpoint on the same line.
    pub fn add(&mut self, file: &Path, line: u32, options: BreakpointOptions) -> Breakpoint {
        self.next_id += 1;
        let breakpoint = Breakpoint {
            id: self.next_id,
            file: file.to_path_buf(),
            line,
            verified: false,
            enabled: true,
            options,
            message: None,
        };
        debug!("Added breakpoint {} at {}:{}", breakpoint.id, file.display(), line);
        self.breakpoints.insert(breakpoint.id, breakpoint.clone());
        breakpoint
    }

    /// Removes a breakpoint.
    pub fn remove(&mut self, id: BreakpointId) -> Option<Breakpoint> {
        self.breakpoints.remove(&id)
    }

    /// Enables or disables a breakpoint. Disabling also clears `verified`.
    pub fn set_enabled(&mut self, id: BreakpointId, enabled: bool) -> Option<Breakpoint> {
        let breakpoint = self.breakpoints.get_mut(&id)?;
        breakpoint.enabled = enabled;
        if !enabled {
            breakpoint.verified = false;
            breakpoint.message = None;
        }
        Some(breakpoint.clone())
    }

    /// Looks up one breakpoint.
    #[must_use]
    pub fn get(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.get(&id)
    }

    /// Every breakpoint in `file`, enabled or not, in creation order.
    #[must_use]
    pub fn get_by_file(&self, file: &Path) -> Vec<Breakpoint> {
        self.breakpoints
            .values()
            .filter(|bp| bp.file == file)
            .cloned()
            .collect()
    }

    /// Every breakpoint, in creation order.
    #[must_use]
    pub fn list(&self) -> Vec<Breakpoint> {
        self.breakpoints.values().cloned().collect()
    }

    /// Per file, the enabled breakpoints in wire form (0-based lines).
    ///
    /// Files whose breakpoints are all disabled map to an empty list, which
    /// clears them upstream.
    #[must_use]
    pub fn breakpoints_for_sync(&self) -> BTreeMap<PathBuf, Vec<SourceBreakpoint>> {
        let mut payload: BTreeMap<PathBuf, Vec<SourceBreakpoint>> = BTreeMap::new();
        for breakpoint in self.breakpoints.values() {
            let entry = payload.entry(breakpoint.file.clone()).or_default();
            if breakpoint.enabled {
                entry.push(breakpoint.to_source());
            }
        }
        payload
    }

    /// Builds the replacement list for one file and remembers which ids it
    /// carries, for [`Self::apply_acknowledgments`].
    pub fn sync_payload(&mut self, file: &Path) -> Vec<SourceBreakpoint> {
        let (ids, sources): (Vec<_>, Vec<_>) = self
            .breakpoints
            .values()
            .filter(|bp| bp.file == file && bp.enabled)
            .map(|bp| (bp.id, bp.to_source()))
            .unzip();
        self.last_sent.insert(file.to_path_buf(), ids);
        sources
    }

    /// Sets the verification flag of one breakpoint.
    pub fn update_verification(&mut self, id: BreakpointId, verified: bool) -> bool {
        self.breakpoints
            .get_mut(&id)
            .map(|bp| bp.verified = verified)
            .is_some()
    }

    /// Applies a `setBreakpoints` response for `file`, matching entries to the
    /// last list sent for that file by position.
    pub fn apply_acknowledgments(&mut self, file: &Path, acks: &[BreakpointAck]) {
        let Some(ids) = self.last_sent.get(file).cloned() else {
            return;
        };
        if ids.len() != acks.len() {
            debug!(
                "Adapter acknowledged {} of {} breakpoints in {}",
                acks.len(),
                ids.len(),
                file.display()
            );
        }
        for (position, id) in ids.into_iter().enumerate() {
            let ack = acks.get(position);
            self.update_verification(id, ack.is_some_and(|a| a.verified));
            if let Some(bp) = self.breakpoints.get_mut(&id) {
                bp.message = ack.and_then(|a| a.message.clone());
            }
        }
    }

    /// Removes every breakpoint; returns the files that had any.
    pub fn clear(&mut self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.breakpoints.values().map(|bp| bp.file.clone()).collect();
        files.sort();
        files.dedup();
        self.breakpoints.clear();
        files
    }

    /// Marks every breakpoint unverified (adapter gone or restarted).
    pub fn reset_verification(&mut self) {
        for breakpoint in self.breakpoints.values_mut() {
            breakpoint.verified = false;
        }
        self.last_sent.clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, reason = "Tests use unwrap for brevity")]
mod tests {
    use super::*;

    fn file() -> PathBuf {
        PathBuf::from("/work/sample.py")
    }

    #[test]
    fn test_sync_payload_skips_disabled_and_keeps_duplicates() {
        let mut manager = BreakpointManager::new();
        manager.add(&file(), 5, BreakpointOptions::default());
        let off = manager.add(&file(), 9, BreakpointOptions::default());
        manager.add(&file(), 5, BreakpointOptions::default());
        manager.set_enabled(off.id, false);

        let payload = manager.breakpoints_for_sync();
        let lines: Vec<u32> = payload[&file()].iter().map(|bp| bp.line).collect();
        assert_eq!(lines, vec![4, 4]);
        assert_eq!(manager.get_by_file(&file()).len(), 3);
    }

    #[test]
    fn test_add_never_merges() {
        let mut manager = BreakpointManager::new();
        let a = manager.add(&file(), 53, BreakpointOptions::default());
        let b = manager.add(&file(), 53, BreakpointOptions::default());
        assert_ne!(a.id, b.id);
        assert!(a.enabled && !a.verified);
    }

    #[test]
    fn test_options_reach_wire_form() {
        let mut manager = BreakpointManager::new();
        manager.add(
            &file(),
            10,
            BreakpointOptions {
                condition: Some("i > 3".into()),
                hit_condition: Some("2".into()),
                log_message: None,
            },
        );
        let sent = manager.sync_payload(&file());
        assert_eq!(
            sent,
            vec![SourceBreakpoint {
                line: 9,
                condition: Some("i > 3".into()),
                hit_condition: Some("2".into()),
                log_message: None,
            }]
        );
    }

    #[test]
    fn test_acknowledgments_match_by_position() {
        let mut manager = BreakpointManager::new();
        let first = manager.add(&file(), 5, BreakpointOptions::default());
        let disabled = manager.add(&file(), 7, BreakpointOptions::default());
        let third = manager.add(&file(), 60, BreakpointOptions::default());
        manager.set_enabled(disabled.id, false);

        assert_eq!(manager.sync_payload(&file()).len(), 2);
        manager.apply_acknowledgments(
            &file(),
            &[
                BreakpointAck {
                    verified: true,
                    message: None,
                },
                BreakpointAck {
                    verified: false,
                    message: Some("Line beyond end of file".into()),
                },
            ],
        );

        assert!(manager.get(first.id).unwrap().verified);
        assert!(!manager.get(disabled.id).unwrap().verified);
        let third = manager.get(third.id).unwrap();
        assert!(!third.verified);
        assert_eq!(third.message.as_deref(), Some("Line beyond end of file"));
    }

    #[test]
    fn test_disabling_clears_verification() {
        let mut manager = BreakpointManager::new();
        let bp = manager.add(&file(), 5, BreakpointOptions::default());
        manager.update_verification(bp.id, true);
        let bp = manager.set_enabled(bp.id, false).unwrap();
        assert!(!bp.verified);
    }

    #[test]
    fn test_all_disabled_file_syncs_empty_list() {
        let mut manager = BreakpointManager::new();
        let bp = manager.add(&file(), 5, BreakpointOptions::default());
        manager.set_enabled(bp.id, false);
        assert_eq!(manager.breakpoints_for_sync()[&file()], Vec::new());
    }

    #[test]
    fn test_clear_reports_files() {
        let mut manager = BreakpointManager::new();
        manager.add(&file(), 5, BreakpointOptions::default());
        manager.add(&file(), 6, BreakpointOptions::default());
        manager.add(Path::new("/work/other.py"), 1, BreakpointOptions::default());

        let files = manager.clear();
        assert_eq!(files, vec![PathBuf::from("/work/other.py"), file()]);
        assert!(manager.list().is_empty());
    }

    #[test]
    fn test_remove_unknown() {
        let mut manager = BreakpointManager::new();
        assert!(manager.remove(42).is_none());
        assert!(manager.set_enabled(42, true).is_none());
    }
}
