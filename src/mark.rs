//! Marks: the unit of formatting.
//!
//! A mark is an instruction "key = value over the anchor span
//! `[start, end)`", carrying a precedence stamp. Conflicting marks for the
//! same key are resolved by precedence: greatest stamp wins. A mark whose
//! value is JSON `null` removes the key from the format - that's the
//! reserved sentinel, not an ordinary payload.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use serde_json::Value;
use smartstring::alias::String as SmartString;
use crate::anchor::Anchor;
use crate::order::Position;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The resolved format at a point: for each key, the winning mark's value.
/// Keys whose winner carries the null sentinel are omitted.
pub type Format = BTreeMap<SmartString, Value>;

/// How marks are totally ordered. Pluggable; [`Mark::cmp_stamp`] is the
/// default. Two marks are *the same mark* exactly when the comparator
/// returns `Equal`.
pub type MarkCmp<P> = fn(&Mark<P>, &Mark<P>) -> Ordering;

/// A formatting instruction over the half-open anchor span `[start, end)`.
///
/// `timestamp` is a positive Lamport-style counter and `(creator,
/// timestamp)` is globally unique; together they form the default
/// precedence stamp. The engine treats marks as immutable once added.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(bound(
    serialize = "P: Serialize + Clone",
    deserialize = "P: Deserialize<'de>"
)))]
pub struct Mark<P: Position> {
    pub start: Anchor<P>,
    pub end: Anchor<P>,
    pub key: SmartString,
    pub value: Value,
    pub timestamp: u64,
    pub creator: SmartString,
}

impl<P: Position> Mark<P> {
    pub fn new(
        start: Anchor<P>,
        end: Anchor<P>,
        key: impl Into<SmartString>,
        value: Value,
        timestamp: u64,
        creator: impl Into<SmartString>,
    ) -> Self {
        Mark {
            start,
            end,
            key: key.into(),
            value,
            timestamp,
            creator: creator.into(),
        }
    }

    /// The default precedence order: timestamp, then creator id as the
    /// tie-break. Lamport assignment makes this unique across replicas.
    pub fn cmp_stamp(a: &Mark<P>, b: &Mark<P>) -> Ordering {
        a.timestamp.cmp(&b.timestamp)
            .then_with(|| a.creator.cmp(&b.creator))
    }

    /// Does the span `[start, end)` contain this anchor?
    pub(crate) fn covers(&self, a: &Anchor<P>) -> bool {
        *a >= self.start && *a < self.end
    }
}

/// One observable consequence of adding or deleting a mark: over
/// `[start, end)`, `key` changed from `previous_value` to `value`.
///
/// `value` / `previous_value` are JSON `null` when the key has no winner on
/// that side of the transition. `format` is the full resolved format over
/// the span after the mutation; keys other than `key` are unchanged by it.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(bound(
    serialize = "P: Serialize + Clone",
    deserialize = "P: Deserialize<'de>"
)))]
pub struct FormatChange<P: Position> {
    pub start: Anchor<P>,
    pub end: Anchor<P>,
    pub key: SmartString,
    pub value: Value,
    pub previous_value: Value,
    pub format: Format,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::order::LexPos;

    fn mark(ts: u64, creator: &str) -> Mark<LexPos> {
        Mark::new(
            Anchor::min(),
            Anchor::max(),
            "bold",
            json!(true),
            ts,
            creator,
        )
    }

    #[test]
    fn stamp_order() {
        let a = mark(1, "alice");
        let b = mark(2, "alice");
        let c = mark(2, "bob");
        assert_eq!(Mark::cmp_stamp(&a, &b), Ordering::Less);
        assert_eq!(Mark::cmp_stamp(&b, &c), Ordering::Less);
        assert_eq!(Mark::cmp_stamp(&c, &c), Ordering::Equal);
    }

    #[test]
    fn covers_is_half_open() {
        let m = Mark::new(
            Anchor::before(LexPos::Str("d".into())),
            Anchor::before(LexPos::Str("k".into())),
            "bold",
            json!(true),
            1,
            "alice",
        );
        assert!(m.covers(&Anchor::before(LexPos::Str("d".into()))));
        assert!(m.covers(&Anchor::after(LexPos::Str("f".into()))));
        assert!(!m.covers(&Anchor::before(LexPos::Str("k".into()))));
        assert!(!m.covers(&Anchor::after(LexPos::Str("c".into()))));
    }
}
