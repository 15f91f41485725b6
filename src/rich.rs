//! `RichList`: a value list paired with a formatting engine.
//!
//! The engine itself only speaks positions and anchors. This facade owns a
//! concrete list of `(position, value)` pairs (positions minted from
//! [`LexPos`]), so callers can think in indices: format a slice, insert
//! values that match a desired format, enumerate formatted runs.

use std::fmt::{Debug, Formatter};
use serde_json::Value;
use smartstring::alias::String as SmartString;
use crate::FmtError;
use crate::anchor::{span_from_slice, slice_from_span, Anchor, Expand};
use crate::fmt::Formatting;
use crate::mark::{Format, FormatChange, Mark};
use crate::order::{LexPos, PositionList};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A maximal run of list indices sharing one resolved format.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FormatSlice {
    pub start: usize,
    pub end: usize,
    pub format: Format,
}

/// Saved facade state. The field order is the load order: position
/// metadata, then the value list, then the formatting marks.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(bound(
    serialize = "V: Serialize",
    deserialize = "V: Deserialize<'de>"
)))]
pub struct RichListSave<V> {
    pub positions: Vec<LexPos>,
    pub values: Vec<V>,
    pub marks: Vec<Mark<LexPos>>,
}

/// A list of values with inline formatting.
///
/// Fresh marks are stamped with this replica's id and a timestamp one past
/// the largest the engine has seen, so local formatting always wins over
/// marks observed from elsewhere.
pub struct RichList<V> {
    items: Vec<(LexPos, V)>,
    pub formatting: Formatting<LexPos>,
    replica: SmartString,
    on_new_mark: Option<Box<dyn FnMut(&Mark<LexPos>)>>,
}

impl<V> PositionList for RichList<V> {
    type Pos = LexPos;

    fn len(&self) -> usize { self.items.len() }

    fn position_at(&self, idx: usize) -> &LexPos { &self.items[idx].0 }

    fn locate(&self, p: &LexPos) -> Result<usize, usize> {
        self.items.binary_search_by(|(q, _)| q.cmp(p))
    }
}

impl<V> RichList<V> {
    pub fn new(replica: impl Into<SmartString>) -> Self {
        RichList {
            items: Vec::new(),
            formatting: Formatting::new(),
            replica: replica.into(),
            on_new_mark: None,
        }
    }

    pub fn replica(&self) -> &str { self.replica.as_str() }

    pub fn get(&self, idx: usize) -> Option<&V> {
        self.items.get(idx).map(|(_, v)| v)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> + '_ {
        self.items.iter().map(|(_, v)| v)
    }

    /// Register a callback fired for every mark this facade creates, after
    /// the engine has fully absorbed it.
    pub fn on_new_mark(&mut self, f: impl FnMut(&Mark<LexPos>) + 'static) {
        self.on_new_mark = Some(Box::new(f));
    }

    /// Insert plain (format-inheriting) values at `idx`.
    pub fn insert(&mut self, idx: usize, values: Vec<V>) -> Result<(), FmtError> {
        if idx > self.items.len() {
            return Err(FmtError::OutOfRange);
        }
        self.insert_values(idx, values);
        Ok(())
    }

    /// A fresh mark over `[start, end)`, stamped to win over every mark
    /// the engine has observed. The mark is *not* added; hand it to
    /// `formatting.add_mark` (or use [`RichList::format`]).
    pub fn new_mark(
        &self,
        start: Anchor<LexPos>,
        end: Anchor<LexPos>,
        key: impl Into<SmartString>,
        value: Value,
    ) -> Mark<LexPos> {
        Mark::new(
            start,
            end,
            key,
            value,
            self.formatting.max_timestamp() + 1,
            self.replica.clone(),
        )
    }

    /// Format the slice `[start_idx, end_idx)` with `key = value`,
    /// expanding per `expand`. Returns the created mark and the observable
    /// changes.
    pub fn format(
        &mut self,
        start_idx: usize,
        end_idx: usize,
        key: impl Into<SmartString>,
        value: Value,
        expand: Expand,
    ) -> Result<(Mark<LexPos>, Vec<FormatChange<LexPos>>), FmtError> {
        let (start, end) = span_from_slice(&*self, start_idx, end_idx, expand)?;
        let mark = self.new_mark(start, end, key, value);
        let changes = self.formatting.add_mark(mark.clone())?;
        self.fire_new_mark(&mark);
        Ok((mark, changes))
    }

    /// Insert `values` at `idx` so that they end up formatted exactly as
    /// `format`, minting one mark per key the inherited format misses.
    /// Marks expand `After`; use [`RichList::insert_with_format_by`] to
    /// choose per key. Returns the created marks.
    pub fn insert_with_format(
        &mut self,
        idx: usize,
        format: &Format,
        values: Vec<V>,
    ) -> Result<Vec<Mark<LexPos>>, FmtError> {
        self.insert_with_format_by(idx, format, values, |_, _| Expand::After)
    }

    /// As [`RichList::insert_with_format`], with an expand rule deciding
    /// per `(key, value)` how the new mark should bind. Typical policy:
    /// `After` for text styling, `None` for hyperlinks.
    pub fn insert_with_format_by(
        &mut self,
        idx: usize,
        format: &Format,
        values: Vec<V>,
        rule: impl Fn(&str, &Value) -> Expand,
    ) -> Result<Vec<Mark<LexPos>>, FmtError> {
        if idx > self.items.len() {
            return Err(FmtError::OutOfRange);
        }
        let count = values.len();
        if count == 0 {
            return Ok(Vec::new());
        }
        self.insert_values(idx, values);

        let inherited = self.formatting.get_format(&self.items[idx].0)?;
        let delta = diff_formats(&inherited, format);

        let mut created = Vec::with_capacity(delta.len());
        for (key, value) in delta {
            let expand = rule(key.as_str(), &value);
            let (start, end) = span_from_slice(&*self, idx, idx + count, expand)?;
            let mark = self.new_mark(start, end, key, value);
            self.formatting.add_mark(mark.clone())?;
            self.fire_new_mark(&mark);
            created.push(mark);
        }
        Ok(created)
    }

    /// The formatted runs of the list, projected to indices: empty slices
    /// dropped, same-format neighbours merged. `window` restricts to
    /// `[start_idx, end_idx)`.
    pub fn formatted_slices(
        &self,
        window: Option<(usize, usize)>,
    ) -> Result<Vec<FormatSlice>, FmtError> {
        let (w0, w1) = window.unwrap_or((0, self.items.len()));
        if w0 > w1 || w1 > self.items.len() {
            return Err(FmtError::OutOfRange);
        }
        let mut out: Vec<FormatSlice> = Vec::new();
        for span in self.formatting.formatted_spans() {
            let (s, e) = slice_from_span(self, &span.start, &span.end);
            let (s, e) = (s.max(w0), e.min(w1));
            if s >= e {
                continue;
            }
            // Distinct formats can project onto the same indices (spans
            // covering only gaps collapse), so merge again here.
            if let Some(last) = out.last_mut() {
                if last.end == s && last.format == span.format {
                    last.end = e;
                    continue;
                }
            }
            out.push(FormatSlice { start: s, end: e, format: span.format });
        }
        Ok(out)
    }

    /// Every present item with its position and resolved format, in order.
    pub fn entries(
        &self,
        window: Option<(usize, usize)>,
    ) -> Result<impl Iterator<Item = (&LexPos, &V, Format)> + '_, FmtError> {
        let slices = self.formatted_slices(window)?;
        Ok(slices.into_iter().flat_map(move |slice| {
            let format = slice.format;
            self.items[slice.start..slice.end]
                .iter()
                .map(move |(p, v)| (p, v, format.clone()))
        }))
    }

    pub fn save(&self) -> RichListSave<V>
    where V: Clone {
        RichListSave {
            positions: self.items.iter().map(|(p, _)| p.clone()).collect(),
            values: self.items.iter().map(|(_, v)| v.clone()).collect(),
            marks: self.formatting.save(),
        }
    }

    /// Replace everything with the saved state, in save order: positions,
    /// values, then marks (which also advances the timestamp watermark).
    pub fn load(&mut self, saved: RichListSave<V>) -> Result<(), FmtError> {
        let RichListSave { positions, values, marks } = saved;
        if positions.len() != values.len() {
            return Err(FmtError::OutOfRange);
        }
        debug_assert!(positions.windows(2).all(|w| w[0] < w[1]));
        self.items = positions.into_iter().zip(values).collect();
        self.formatting.load(marks)
    }

    fn insert_values(&mut self, idx: usize, values: Vec<V>) {
        let mut left = if idx == 0 {
            LexPos::Min
        } else {
            self.items[idx - 1].0.clone()
        };
        let right = if idx == self.items.len() {
            LexPos::Max
        } else {
            self.items[idx].0.clone()
        };
        let new_items: Vec<(LexPos, V)> = values
            .into_iter()
            .map(|v| {
                let p = LexPos::between(&left, &right);
                left = p.clone();
                (p, v)
            })
            .collect();
        self.items.splice(idx..idx, new_items);
    }

    fn fire_new_mark(&mut self, mark: &Mark<LexPos>) {
        if let Some(f) = &mut self.on_new_mark {
            f(mark);
        }
    }
}

impl<V: Debug> Debug for RichList<V> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RichList")
            .field("items", &self.items)
            .field("formatting", &self.formatting)
            .field("replica", &self.replica)
            .finish_non_exhaustive()
    }
}

/// The per-key edits needed to go from `current` to `target`, ignoring
/// null entries on either side. A null in the result means "remove this
/// key".
pub fn diff_formats(current: &Format, target: &Format) -> Format {
    let mut delta = Format::new();
    for (key, value) in target {
        if value.is_null() {
            continue;
        }
        if current.get(key) != Some(value) {
            delta.insert(key.clone(), value.clone());
        }
    }
    for (key, value) in current {
        if value.is_null() {
            continue;
        }
        if target.get(key).map_or(true, Value::is_null) {
            delta.insert(key.clone(), Value::Null);
        }
    }
    delta
}
