//! The error taxonomy and exit code mapper.
//!
//! Classification is a pure function of the raw exit status and the level's
//! declared category. Message text is never inspected, so classification is
//! deterministic and testable independent of free-form diagnostics.

use std::time::Duration;

use gantry_types::{RawOutcome, TaxonomyKind};

use crate::registry::ValidationLevel;

/// Map a raw check outcome to its taxonomy kind: exit 0 is `Success`, any
/// other exit status is the level's pre-declared failure kind.
pub fn classify(level: &ValidationLevel, raw: &RawOutcome) -> TaxonomyKind {
    if raw.is_success() {
        TaxonomyKind::Success
    } else {
        level.category.failure_kind()
    }
}

/// The forced classification for a level whose executable exceeded the hard
/// timeout. A timeout is always an integration-level concern, regardless of
/// the level's own category: the check could not complete cleanly.
pub fn timeout_kind() -> TaxonomyKind {
    TaxonomyKind::Integration
}

/// Message recorded for a forced-timeout result.
pub fn timeout_message(timeout: Duration) -> String {
    format!(
        "check did not complete within the {}ms timeout; forced integration failure",
        timeout.as_millis()
    )
}
