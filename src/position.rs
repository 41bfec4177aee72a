// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Coordinate conversion between caller-facing and protocol-internal positions.
//!
//! Callers speak 1-based lines and columns. Both upstream protocols are driven
//! with 0-based values (the debug client negotiates `linesStartAt1: false`).
//! Conversion happens once, where a value crosses the broker boundary.

/// Converts a caller-facing 1-based value to the protocol's 0-based form.
///
/// Zero and negative inputs clamp to 0.
#[must_use]
pub fn to_zero_based(one_based: i64) -> u32 {
    u32::try_from(one_based.saturating_sub(1).max(0)).unwrap_or(u32::MAX)
}

/// Converts a protocol 0-based value to the caller-facing 1-based form.
#[must_use]
pub const fn to_one_based(zero_based: u32) -> u32 {
    zero_based.saturating_add(1)
}

/// Converts a possibly-signed 0-based value reported by a debug adapter.
#[must_use]
pub fn to_one_based_signed(zero_based: i64) -> u32 {
    to_one_based(u32::try_from(zero_based.max(0)).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_for_positive_lines() {
        for n in 1..=10_000_i64 {
            assert_eq!(i64::from(to_one_based(to_zero_based(n))), n);
        }
    }

    #[test]
    fn test_clamps_non_positive() {
        assert_eq!(to_zero_based(0), 0);
        assert_eq!(to_zero_based(-7), 0);
        assert_eq!(to_zero_based(i64::MIN), 0);
    }

    #[test]
    fn test_signed_adapter_values() {
        assert_eq!(to_one_based_signed(52), 53);
        assert_eq!(to_one_based_signed(-1), 1);
    }
}
