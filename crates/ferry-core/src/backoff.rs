// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capped exponential backoff shared by queue retries and channel reconnects.

use std::time::Duration;

/// Delay before attempt number `attempt` (1-based): `min(base * 2^(attempt-1), max)`.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let factor = 1u32
        .checked_shl(attempt.saturating_sub(1))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}
