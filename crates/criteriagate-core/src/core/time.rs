// crates/criteriagate-core/src/core/time.rs
// ============================================================================
// Module: CriteriaGate Time Model
// Description: Canonical timestamp representation for aggregates and logs.
// Purpose: Keep every timestamp explicit and UTC so checkpoints and audit
//          logs replay deterministically.
// Dependencies: serde, time
// ============================================================================

//! ## Overview
//! All timestamps in CriteriaGate are UTC and monotonic at creation;
//! `updated_at` fields are monotonic on change. The core never compares
//! timestamps against wall-clock time implicitly — callers supply `now`.

use serde::Deserialize;
use serde::Serialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// UTC timestamp, serialized as RFC 3339 on the wire.
///
/// # Invariants
/// - Always UTC.
/// - `updated_at` fields on a given aggregate are non-decreasing across writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(#[serde(with = "rfc3339_nanos")] OffsetDateTime);

impl Timestamp {
    /// Creates a timestamp from an explicit `OffsetDateTime`, normalizing to UTC.
    #[must_use]
    pub fn new(value: OffsetDateTime) -> Self {
        Self(value.to_offset(time::UtcOffset::UTC))
    }

    /// Returns the underlying `OffsetDateTime`.
    #[must_use]
    pub const fn as_offset_date_time(&self) -> OffsetDateTime {
        self.0
    }

    /// Returns a timestamp `duration` later than `self`.
    #[must_use]
    pub fn plus(&self, duration: time::Duration) -> Self {
        Self(self.0 + duration)
    }

    /// Returns whether `self` is at or after `other`.
    #[must_use]
    pub fn is_at_or_after(&self, other: &Self) -> bool {
        self.0 >= other.0
    }
}

mod rfc3339_nanos {
    use serde::Deserialize;
    use serde::Deserializer;
    use serde::Serializer;
    use time::OffsetDateTime;

    use super::Rfc3339;

    pub fn serialize<S: Serializer>(value: &OffsetDateTime, ser: S) -> Result<S::Ok, S::Error> {
        let text = value.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
        ser.serialize_str(&text)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<OffsetDateTime, D::Error> {
        let text = String::deserialize(de)?;
        OffsetDateTime::parse(&text, &Rfc3339).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::Timestamp;

    #[test]
    fn roundtrips_through_json() {
        let ts = Timestamp::new(datetime!(2026 - 01 - 15 09:30:00 UTC));
        let json = serde_json::to_string(&ts).expect("serialize");
        let back: Timestamp = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(ts, back);
    }

    #[test]
    fn plus_advances_monotonically() {
        let ts = Timestamp::new(datetime!(2026 - 01 - 15 09:30:00 UTC));
        let later = ts.plus(time::Duration::seconds(30));
        assert!(later.is_at_or_after(&ts));
        assert!(!ts.is_at_or_after(&later));
    }
}
