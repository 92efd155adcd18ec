// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! General support code for stochastic-runner.

use std::time::Duration;

/// Utilities for pluralizing various words based on count.
pub(crate) mod plural {
    /// Returns "test" if `count` is 1, otherwise "tests".
    pub(crate) fn tests_str(count: usize) -> &'static str {
        if count == 1 { "test" } else { "tests" }
    }

    /// Returns "group" if `count` is 1, otherwise "groups".
    pub(crate) fn groups_str(count: usize) -> &'static str {
        if count == 1 { "group" } else { "groups" }
    }

    /// Returns "invocation" if `count` is 1, otherwise "invocations".
    pub(crate) fn invocations_str(count: usize) -> &'static str {
        if count == 1 {
            "invocation"
        } else {
            "invocations"
        }
    }

    /// Returns "pass" if `count` is 1, otherwise "passes".
    pub(crate) fn passes_str(count: u32) -> &'static str {
        if count == 1 { "pass" } else { "passes" }
    }
}

/// Formats a duration as seconds with three decimal places, right-aligned.
pub(crate) fn format_duration(duration: Duration) -> String {
    format!("{:>8.3?}s", duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(Duration::from_millis(1500) => "   1.500s"; "seconds")]
    #[test_case(Duration::ZERO => "   0.000s"; "zero")]
    #[test_case(Duration::from_secs(12345) => "12345.000s"; "overflows width")]
    fn duration(duration: Duration) -> String {
        format_duration(duration)
    }

    #[test]
    fn plurals() {
        assert_eq!(plural::tests_str(1), "test");
        assert_eq!(plural::tests_str(0), "tests");
        assert_eq!(plural::passes_str(2), "passes");
        assert_eq!(plural::invocations_str(1), "invocation");
        assert_eq!(plural::groups_str(3), "groups");
    }
}
