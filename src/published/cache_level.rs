//! Effective cache level resolution.

use crate::domain::types::CacheLevel;

/// Level a single read is cached at, plus the reference level handed to nested conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveLevel {
    pub level: CacheLevel,
    pub reference: CacheLevel,
}

/// Resolves the level a property read is cached at.
///
/// `Snapshot` is never memoized and counts as `None`. An unmemoized level, or
/// one no longer-lived than the container (`reference`), is used as declared
/// and becomes the new reference. A declared level that would outlive its
/// container is clamped to `Element` and the reference is kept.
pub fn effective_cache_level(declared: CacheLevel, reference: CacheLevel) -> EffectiveLevel {
    if !declared.is_memoized() || declared >= reference {
        EffectiveLevel {
            level: declared,
            reference: declared,
        }
    } else {
        EffectiveLevel {
            level: CacheLevel::Element,
            reference,
        }
    }
}
