//! The formatting engine: a resolution index over anchors, plus the change
//! computation for mark add / delete.
//!
//! The index is sparse: only positions where some mark starts or ends get
//! an entry. Each entry holds, per side, a map from format key to a stack
//! of covering marks in ascending precedence - the top of a stack is the
//! current winner for that key at that anchor. Everything else follows
//! from a left-walk: a position without its own entry is formatted like
//! the nearest entry to its left.
//!
//! Storing the stacks per anchor side (rather than one global per-key
//! order) keeps `add_mark` at O(entries-in-span * keys-touched), because
//! every anchor boundary is a potential winner change and we never need a
//! reconstruction pass.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;
use serde_json::Value;
use smallvec::SmallVec;
use smartstring::alias::String as SmartString;
use crate::FmtError;
use crate::anchor::{Anchor, Side};
use crate::mark::{Format, FormatChange, Mark, MarkCmp};
use crate::markset::{MarkRef, MarkSet};
use crate::order::Position;
use crate::spans::{Span, SpanBuilder};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Ascending-precedence stack of covering marks; the last element wins.
pub(crate) type MarkStack = SmallVec<[MarkRef; 2]>;

/// Per-key stacks on one side of a position. Stacks are never empty - a
/// drained stack is removed from the map.
pub(crate) type SideStacks = BTreeMap<SmartString, MarkStack>;

/// The formatting state at one position of the index. At least one side is
/// always populated.
#[derive(Clone, Debug, Default)]
pub(crate) struct FormatEntry {
    pub before: Option<SideStacks>,
    pub after: Option<SideStacks>,
}

impl FormatEntry {
    /// The stacks governing everything to the right of this position, used
    /// by the left-walk.
    fn effective(&self) -> &SideStacks {
        self.after.as_ref().or(self.before.as_ref()).unwrap()
    }

    fn sides_mut(&mut self) -> [(Side, &mut Option<SideStacks>); 2] {
        [
            (Side::Before, &mut self.before),
            (Side::After, &mut self.after),
        ]
    }
}

/// A maximal run of positions sharing one resolved format.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(bound(
    serialize = "P: Serialize + Clone",
    deserialize = "P: Deserialize<'de>"
)))]
pub struct FormatSpan<P: Position> {
    pub start: Anchor<P>,
    pub end: Anchor<P>,
    pub format: Format,
}

/// What happened at one anchor while applying or retracting a mark. Fed to
/// the span builder; `None` closes any running change span.
#[derive(Clone, Debug, PartialEq)]
enum ChangeEvent {
    None,
    Won {
        value: Value,
        previous: Value,
        format: Format,
    },
}

/// The formatting engine. Owns the canonical mark set and the resolution
/// index; holds no reference to any backing list.
#[derive(Clone, Debug)]
pub struct Formatting<P: Position> {
    pub(crate) marks: MarkSet<P>,
    pub(crate) index: BTreeMap<P, FormatEntry>,
    max_timestamp: u64,
}

impl<P: Position> Default for Formatting<P> {
    fn default() -> Self { Self::new() }
}

impl<P: Position> Formatting<P> {
    pub fn new() -> Self {
        Self::with_cmp(Mark::cmp_stamp)
    }

    /// An engine using a custom total order on marks instead of the
    /// default `(timestamp, creator)` stamp.
    pub fn with_cmp(cmp: MarkCmp<P>) -> Self {
        Formatting {
            marks: MarkSet::with_cmp(cmp),
            index: Self::seed_index(),
            max_timestamp: 0,
        }
    }

    // The seed entry guarantees every left-walk terminates: any legal
    // anchor has the minimum anchor at or below it.
    fn seed_index() -> BTreeMap<P, FormatEntry> {
        let mut index = BTreeMap::new();
        index.insert(P::min_pos(), FormatEntry {
            before: None,
            after: Some(SideStacks::new()),
        });
        index
    }

    pub fn num_marks(&self) -> usize { self.marks.len() }
    pub fn is_empty(&self) -> bool { self.marks.is_empty() }

    /// Marks in ascending precedence order.
    pub fn iter_marks(&self) -> impl Iterator<Item = &Mark<P>> + '_ {
        self.marks.iter()
    }

    /// The largest timestamp observed through `add_mark` or `load`.
    /// Stamping new marks one above this makes them win over everything
    /// already seen.
    pub fn max_timestamp(&self) -> u64 { self.max_timestamp }

    /// Add a mark and return the format changes it caused, as maximal
    /// spans. Adding a mark that is already present (by compare-equality)
    /// is a no-op with an empty change list.
    pub fn add_mark(&mut self, mark: Mark<P>) -> Result<Vec<FormatChange<P>>, FmtError> {
        mark.start.validate()?;
        mark.end.validate()?;
        if mark.start >= mark.end {
            // Note Before < After on equal positions, so the one legal
            // zero-width shape - (p, Before) to (p, After), a single
            // embed - passes this check.
            return Err(FmtError::MarkRangeInvalid);
        }
        let (r, inserted) = self.marks.add(mark)?;
        if !inserted {
            return Ok(Vec::new());
        }
        self.max_timestamp = self.max_timestamp.max(self.marks.get(r).timestamp);
        Ok(self.apply_mark(r))
    }

    /// Delete the canonical mark equal to `mark` and return the format
    /// changes. Deleting an absent mark is a no-op with an empty change
    /// list.
    pub fn delete_mark(&mut self, mark: &Mark<P>) -> Result<Vec<FormatChange<P>>, FmtError> {
        mark.start.validate()?;
        mark.end.validate()?;
        let Some((r, canonical)) = self.marks.remove(mark)? else {
            return Ok(Vec::new());
        };
        Ok(self.retract_mark(r, canonical))
    }

    /// The resolved format at `pos`. The sentinels themselves have no
    /// format.
    pub fn get_format(&self, pos: &P) -> Result<Format, FmtError> {
        if pos.is_min() || pos.is_max() {
            return Err(FmtError::FormatAtBoundary);
        }
        if let Some(entry) = self.index.get(pos) {
            if let Some(stacks) = &entry.before {
                return Ok(format_of(&self.marks, stacks));
            }
        }
        let entry = self.entry_left_of(pos);
        Ok(format_of(&self.marks, entry.effective()))
    }

    /// Enumerate the whole sequence as maximal single-format spans. The
    /// result covers the minimum anchor to the maximum anchor with no
    /// gaps, and consecutive spans differ in at least one key.
    pub fn formatted_spans(&self) -> Vec<FormatSpan<P>> {
        let mut builder = SpanBuilder::new(|a: &Format, b: &Format| a == b);
        for (pos, entry) in self.index.iter() {
            if let Some(stacks) = &entry.before {
                builder.push(Anchor::before(pos.clone()), format_of(&self.marks, stacks));
            }
            if let Some(stacks) = &entry.after {
                builder.push(Anchor::after(pos.clone()), format_of(&self.marks, stacks));
            }
        }
        builder
            .finish(Anchor::max())
            .into_iter()
            .map(|s| FormatSpan { start: s.start, end: s.end, format: s.payload })
            .collect()
    }

    /// The saved state: marks in ascending precedence order.
    pub fn save(&self) -> Vec<Mark<P>> {
        self.marks.save()
    }

    /// Replace all state with `marks` (assumed sorted; sorted defensively)
    /// and rebuild the index. Advances the timestamp watermark past
    /// everything loaded.
    pub fn load(&mut self, marks: Vec<Mark<P>>) -> Result<(), FmtError> {
        for m in &marks {
            m.start.validate()?;
            m.end.validate()?;
            if m.start >= m.end {
                return Err(FmtError::MarkRangeInvalid);
            }
        }
        self.index = Self::seed_index();
        self.max_timestamp = 0;
        self.marks.load(marks);
        let refs: Vec<MarkRef> = self.marks.refs().collect();
        for r in refs {
            self.max_timestamp = self.max_timestamp.max(self.marks.get(r).timestamp);
            self.apply_mark(r);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.marks.clear();
        self.index = Self::seed_index();
        self.max_timestamp = 0;
    }

    /// Insert `r` into every per-key stack its span covers, recording the
    /// winner changes.
    fn apply_mark(&mut self, r: MarkRef) -> Vec<FormatChange<P>> {
        let mark = self.marks.get(r).clone();
        self.ensure_anchor(&mark.start);
        self.ensure_anchor(&mark.end);

        let mut builder = SpanBuilder::new(|a: &ChangeEvent, b: &ChangeEvent| a == b);
        let marks = &self.marks;
        let range = (Bound::Included(&mark.start.pos), Bound::Included(&mark.end.pos));
        for (pos, entry) in self.index.range_mut(range) {
            for (side, stacks) in entry.sides_mut() {
                let Some(stacks) = stacks.as_mut() else { continue };
                let anchor = Anchor::new(pos.clone(), side);
                if !mark.covers(&anchor) {
                    continue;
                }

                let won = {
                    let stack = stacks.entry(mark.key.clone()).or_default();
                    let at = stack
                        .iter()
                        .position(|&o| marks.cmp_refs(o, r) == Ordering::Greater)
                        .unwrap_or(stack.len());
                    if at == stack.len() {
                        let previous = stack
                            .last()
                            .map_or(Value::Null, |&o| marks.get(o).value.clone());
                        stack.push(r);
                        Some(previous)
                    } else {
                        stack.insert(at, r);
                        None
                    }
                };

                let payload = match won {
                    Some(previous) => ChangeEvent::Won {
                        value: mark.value.clone(),
                        previous,
                        format: format_of(marks, stacks),
                    },
                    None => ChangeEvent::None,
                };
                builder.push(anchor, payload);
            }
        }
        convert_events(builder.finish(mark.end.clone()), &mark.key)
    }

    /// The mirror of `apply_mark`: pull a just-removed mark out of every
    /// stack its span covers. `r` is dead in the slab by now; it is only
    /// compared against, never dereferenced.
    fn retract_mark(&mut self, r: MarkRef, mark: Mark<P>) -> Vec<FormatChange<P>> {
        let mut builder = SpanBuilder::new(|a: &ChangeEvent, b: &ChangeEvent| a == b);
        let marks = &self.marks;
        let range = (Bound::Included(&mark.start.pos), Bound::Included(&mark.end.pos));
        for (pos, entry) in self.index.range_mut(range) {
            for (side, stacks) in entry.sides_mut() {
                let Some(stacks) = stacks.as_mut() else { continue };
                let anchor = Anchor::new(pos.clone(), side);
                if !mark.covers(&anchor) {
                    continue;
                }

                // Every covered side contains the mark: it was inserted on
                // add, and sides created later copy from a covered
                // neighbour.
                let mut won = None;
                let mut found = false;
                if let Some(stack) = stacks.get_mut(&mark.key) {
                    if let Some(at) = stack.iter().position(|&o| o == r) {
                        found = true;
                        let was_top = at + 1 == stack.len();
                        stack.remove(at);
                        if was_top {
                            won = Some(stack.last().map_or(Value::Null, |&o| {
                                marks.get(o).value.clone()
                            }));
                        }
                        if stack.is_empty() {
                            stacks.remove(&mark.key);
                        }
                    }
                }
                debug_assert!(found, "canonical mark missing from covered side");

                let payload = match won {
                    Some(value) => ChangeEvent::Won {
                        value,
                        previous: mark.value.clone(),
                        format: format_of(marks, stacks),
                    },
                    None => ChangeEvent::None,
                };
                builder.push(anchor, payload);
            }
        }
        convert_events(builder.finish(mark.end.clone()), &mark.key)
    }

    /// Make sure the entry at `a.pos` exists and has the `a.side` stacks
    /// populated, deep-copying the effective stacks from the left. No-op at
    /// the minimum position (the seed is always there).
    fn ensure_anchor(&mut self, a: &Anchor<P>) {
        if a.pos.is_min() {
            return;
        }
        let have = match self.index.get(&a.pos) {
            Some(e) => match a.side {
                Side::Before => e.before.is_some(),
                Side::After => e.after.is_some(),
            },
            None => false,
        };
        if have {
            return;
        }

        let copied: SideStacks = if a.side == Side::After {
            // Filling the after side: the same entry's before side, when
            // present, is the closest anchor to our left.
            match self.index.get(&a.pos).and_then(|e| e.before.as_ref()) {
                Some(before) => before.clone(),
                None => self.stacks_left_of(&a.pos).clone(),
            }
        } else {
            self.stacks_left_of(&a.pos).clone()
        };

        let entry = self.index.entry(a.pos.clone()).or_default();
        match a.side {
            Side::Before => entry.before = Some(copied),
            Side::After => entry.after = Some(copied),
        }
    }

    fn stacks_left_of(&self, pos: &P) -> &SideStacks {
        self.entry_left_of(pos).effective()
    }

    // The seed entry makes the unwrap safe for any pos > min.
    fn entry_left_of(&self, pos: &P) -> &FormatEntry {
        self.index
            .range((Bound::Unbounded, Bound::Excluded(pos)))
            .next_back()
            .unwrap()
            .1
    }

}

/// Resolve one side's stacks to a format record: top of each stack wins,
/// null winners are omitted.
fn format_of<P: Position>(marks: &MarkSet<P>, stacks: &SideStacks) -> Format {
    let mut format = Format::new();
    for (key, stack) in stacks {
        debug_assert!(!stack.is_empty());
        let top = marks.get(*stack.last().unwrap());
        if !top.value.is_null() {
            format.insert(key.clone(), top.value.clone());
        }
    }
    format
}

/// Keep the spans whose transition is observable (the winner's value
/// actually differs) and shape them into change records.
fn convert_events<P: Position>(
    spans: Vec<Span<P, ChangeEvent>>,
    key: &SmartString,
) -> Vec<FormatChange<P>> {
    spans
        .into_iter()
        .filter_map(|s| match s.payload {
            ChangeEvent::None => None,
            ChangeEvent::Won { value, previous, format } => {
                if value == previous {
                    None
                } else {
                    Some(FormatChange {
                        start: s.start,
                        end: s.end,
                        key: key.clone(),
                        value,
                        previous_value: previous,
                        format,
                    })
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::order::LexPos;

    fn pos(s: &str) -> LexPos { LexPos::Str(s.into()) }

    fn mark(
        start: Anchor<LexPos>,
        end: Anchor<LexPos>,
        key: &str,
        value: Value,
        ts: u64,
    ) -> Mark<LexPos> {
        Mark::new(start, end, key, value, ts, "alice")
    }

    #[test]
    fn empty_engine_single_span() {
        let fmt: Formatting<LexPos> = Formatting::new();
        let spans = fmt.formatted_spans();
        assert_eq!(spans, vec![FormatSpan {
            start: Anchor::min(),
            end: Anchor::max(),
            format: Format::new(),
        }]);
        assert_eq!(fmt.get_format(&pos("m")).unwrap(), Format::new());
    }

    #[test]
    fn single_mark() {
        let mut fmt = Formatting::new();
        let m = mark(
            Anchor::before(pos("d")),
            Anchor::before(pos("k")),
            "bold",
            json!(true),
            1,
        );
        let changes = fmt.add_mark(m.clone()).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].start, Anchor::before(pos("d")));
        assert_eq!(changes[0].end, Anchor::before(pos("k")));
        assert_eq!(changes[0].value, json!(true));
        assert_eq!(changes[0].previous_value, Value::Null);

        assert_eq!(fmt.get_format(&pos("c")).unwrap(), Format::new());
        assert_eq!(
            fmt.get_format(&pos("d")).unwrap(),
            Format::from([("bold".into(), json!(true))])
        );
        assert_eq!(
            fmt.get_format(&pos("f")).unwrap(),
            Format::from([("bold".into(), json!(true))])
        );
        assert_eq!(fmt.get_format(&pos("k")).unwrap(), Format::new());

        // Adding the same mark again changes nothing.
        assert!(fmt.add_mark(m).unwrap().is_empty());
        assert_eq!(fmt.num_marks(), 1);
    }

    #[test]
    fn null_value_hides_key() {
        let mut fmt = Formatting::new();
        fmt.add_mark(mark(Anchor::min(), Anchor::max(), "bold", json!(true), 1))
            .unwrap();
        let changes = fmt
            .add_mark(mark(
                Anchor::before(pos("d")),
                Anchor::before(pos("k")),
                "bold",
                Value::Null,
                2,
            ))
            .unwrap();
        // Removing bold over the middle is an observable change.
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].value, Value::Null);
        assert_eq!(changes[0].previous_value, json!(true));
        assert_eq!(changes[0].format, Format::new());

        assert_eq!(fmt.get_format(&pos("f")).unwrap(), Format::new());
        assert_eq!(
            fmt.get_format(&pos("c")).unwrap(),
            Format::from([("bold".into(), json!(true))])
        );
        // Three spans: bold, plain, bold.
        assert_eq!(fmt.formatted_spans().len(), 3);
    }

    #[test]
    fn zero_width_mark_formats_single_position() {
        let mut fmt = Formatting::new();
        let m = mark(
            Anchor::before(pos("d")),
            Anchor::after(pos("d")),
            "embed",
            json!("image"),
            1,
        );
        let changes = fmt.add_mark(m).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(
            fmt.get_format(&pos("d")).unwrap(),
            Format::from([("embed".into(), json!("image"))])
        );
        assert_eq!(fmt.get_format(&pos("c")).unwrap(), Format::new());
        assert_eq!(fmt.get_format(&pos("e")).unwrap(), Format::new());
    }

    #[test]
    fn invalid_ranges_rejected() {
        let mut fmt: Formatting<LexPos> = Formatting::new();
        let a = Anchor::before(pos("d"));
        assert_eq!(
            fmt.add_mark(mark(a.clone(), a.clone(), "bold", json!(true), 1)),
            Err(FmtError::MarkRangeInvalid)
        );
        assert_eq!(
            fmt.add_mark(mark(
                Anchor::after(pos("d")),
                Anchor::before(pos("d")),
                "bold",
                json!(true),
                1
            )),
            Err(FmtError::MarkRangeInvalid)
        );
        assert_eq!(
            fmt.add_mark(mark(
                Anchor::before(LexPos::Min),
                Anchor::max(),
                "bold",
                json!(true),
                1
            )),
            Err(FmtError::InvalidAnchor)
        );
        assert!(fmt.is_empty());
    }

    #[test]
    fn boundary_lookups_rejected() {
        let fmt: Formatting<LexPos> = Formatting::new();
        assert_eq!(fmt.get_format(&LexPos::Min), Err(FmtError::FormatAtBoundary));
        assert_eq!(fmt.get_format(&LexPos::Max), Err(FmtError::FormatAtBoundary));
    }

    #[test]
    fn delete_restores_previous_winner() {
        let mut fmt = Formatting::new();
        let m1 = mark(Anchor::min(), Anchor::max(), "url", json!("a"), 1);
        let m2 = mark(
            Anchor::before(pos("d")),
            Anchor::before(pos("k")),
            "url",
            json!("b"),
            2,
        );
        fmt.add_mark(m1).unwrap();
        fmt.add_mark(m2.clone()).unwrap();
        assert_eq!(fmt.get_format(&pos("f")).unwrap()["url"], json!("b"));

        let changes = fmt.delete_mark(&m2).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].value, json!("a"));
        assert_eq!(changes[0].previous_value, json!("b"));
        assert_eq!(fmt.get_format(&pos("f")).unwrap()["url"], json!("a"));
        // One span again: the whole document is url=a.
        assert_eq!(fmt.formatted_spans().len(), 1);

        // Deleting again is a no-op.
        assert!(fmt.delete_mark(&m2).unwrap().is_empty());
    }

    #[test]
    fn losing_mark_add_emits_no_changes() {
        let mut fmt = Formatting::new();
        fmt.add_mark(mark(Anchor::min(), Anchor::max(), "bold", json!(true), 5))
            .unwrap();
        // An older mark with the same key loses everywhere.
        let changes = fmt
            .add_mark(mark(
                Anchor::before(pos("d")),
                Anchor::before(pos("k")),
                "bold",
                json!(false),
                1,
            ))
            .unwrap();
        assert!(changes.is_empty());
        assert_eq!(fmt.get_format(&pos("f")).unwrap()["bold"], json!(true));
    }

    #[test]
    fn save_load_round_trip() {
        let mut fmt = Formatting::new();
        fmt.add_mark(mark(Anchor::min(), Anchor::before(pos("k")), "bold", json!(true), 1))
            .unwrap();
        fmt.add_mark(mark(Anchor::before(pos("d")), Anchor::max(), "italic", json!(true), 2))
            .unwrap();
        let saved = fmt.save();
        let spans = fmt.formatted_spans();

        let mut other: Formatting<LexPos> = Formatting::new();
        other.load(saved).unwrap();
        assert_eq!(other.formatted_spans(), spans);
        assert_eq!(other.max_timestamp(), 2);

        fmt.clear();
        assert_eq!(fmt.formatted_spans().len(), 1);
        assert_eq!(fmt.num_marks(), 0);
    }
}
