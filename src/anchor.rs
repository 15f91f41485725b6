//! Anchors: points in the gaps between positions.
//!
//! An anchor names the gap immediately before or after a position. Marks
//! cover half-open anchor ranges `[start, end)`, which is what lets two
//! concurrent inserts at a mark boundary land unambiguously inside or
//! outside the mark.

use crate::FmtError;
use crate::order::{Position, PositionList};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Which side of the position the anchor sits on. `Before < After`, so the
/// derived order on [`Anchor`] is position order with before-side first.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Side {
    Before,
    After,
}

/// A point in the gap just before or just after `pos`.
///
/// The two extremes `(min, Before)` and `(max, After)` are illegal - they
/// would sit outside the sequence entirely. The permitted extremes are
/// [`Anchor::min`] `= (min, After)` and [`Anchor::max`] `= (max, Before)`.
///
/// On the wire (with the `serde` feature) an anchor is `{pos, before}`.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(from = "AnchorWire<P>", into = "AnchorWire<P>"))]
#[cfg_attr(feature = "serde", serde(bound(
    serialize = "P: Serialize + Clone",
    deserialize = "P: Deserialize<'de>"
)))]
pub struct Anchor<P: Position> {
    pub pos: P,
    pub side: Side,
}

/// Wire form of an anchor: `{pos, before: bool}`.
#[cfg(feature = "serde")]
#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct AnchorWire<P> {
    pos: P,
    before: bool,
}

#[cfg(feature = "serde")]
impl<P: Position> From<AnchorWire<P>> for Anchor<P> {
    fn from(w: AnchorWire<P>) -> Self {
        Anchor {
            pos: w.pos,
            side: if w.before { Side::Before } else { Side::After },
        }
    }
}

#[cfg(feature = "serde")]
impl<P: Position> From<Anchor<P>> for AnchorWire<P> {
    fn from(a: Anchor<P>) -> Self {
        AnchorWire { pos: a.pos, before: a.side == Side::Before }
    }
}

impl<P: Position> Anchor<P> {
    pub fn new(pos: P, side: Side) -> Self {
        Anchor { pos, side }
    }

    pub fn before(pos: P) -> Self { Anchor { pos, side: Side::Before } }
    pub fn after(pos: P) -> Self { Anchor { pos, side: Side::After } }

    /// The smallest legal anchor: just after the minimum sentinel.
    pub fn min() -> Self { Anchor { pos: P::min_pos(), side: Side::After } }

    /// The largest legal anchor: just before the maximum sentinel.
    pub fn max() -> Self { Anchor { pos: P::max_pos(), side: Side::Before } }

    /// Rejects exactly the two illegal extremes.
    pub fn validate(&self) -> Result<(), FmtError> {
        let bad = (self.side == Side::Before && self.pos.is_min())
            || (self.side == Side::After && self.pos.is_max());
        if bad { Err(FmtError::InvalidAnchor) } else { Ok(()) }
    }
}

/// Which gap neighbour an index binds to when converting a slice endpoint
/// into an anchor.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Bind {
    Left,
    Right,
}

/// Per-mark policy for whether a slice-derived span covers the gaps just
/// outside its endpoints. Text formatting typically expands `After` (typing
/// at the end of a bold run stays bold); hyperlinks typically don't expand
/// at all.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Expand {
    #[default]
    After,
    Before,
    Both,
    None,
}

/// The index immediately to the right of `a` in `list`: for a before-side
/// anchor, the index of the first present position `>= a.pos`; for an
/// after-side anchor, one past the last present position `<= a.pos`.
/// Always in `0..=list.len()`.
pub fn index_of_anchor<L>(list: &L, a: &Anchor<L::Pos>) -> usize
where L: PositionList + ?Sized {
    match (list.locate(&a.pos), a.side) {
        (Ok(i), Side::Before) => i,
        (Ok(i), Side::After) => i + 1,
        (Err(ins), _) => ins,
    }
}

/// The anchor in the gap between index `i - 1` and `i`. Binding left names
/// the gap from the left neighbour's perspective (or the minimum anchor at
/// the front); binding right from the right neighbour's (or the maximum
/// anchor at the back).
///
/// Panics if `i > list.len()`.
pub fn anchor_at<L>(list: &L, i: usize, bind: Bind) -> Anchor<L::Pos>
where L: PositionList + ?Sized {
    assert!(i <= list.len());
    match bind {
        Bind::Left => {
            if i == 0 { Anchor::min() }
            else { Anchor::after(list.position_at(i - 1).clone()) }
        }
        Bind::Right => {
            if i == list.len() { Anchor::max() }
            else { Anchor::before(list.position_at(i).clone()) }
        }
    }
}

/// Convert the slice `[start_idx, end_idx)` into an anchor span, choosing
/// the bind per endpoint from the expand policy: expanding at the start
/// binds left, expanding at the end binds right.
pub fn span_from_slice<L>(list: &L, start_idx: usize, end_idx: usize, expand: Expand)
    -> Result<(Anchor<L::Pos>, Anchor<L::Pos>), FmtError>
where L: PositionList + ?Sized {
    if start_idx >= end_idx || end_idx > list.len() {
        return Err(FmtError::OutOfRange);
    }
    let start_bind = match expand {
        Expand::Before | Expand::Both => Bind::Left,
        _ => Bind::Right,
    };
    let end_bind = match expand {
        Expand::After | Expand::Both => Bind::Right,
        _ => Bind::Left,
    };
    Ok((anchor_at(list, start_idx, start_bind), anchor_at(list, end_idx, end_bind)))
}

/// The inverse projection: the index range a span covers in `list`.
pub fn slice_from_span<L>(list: &L, start: &Anchor<L::Pos>, end: &Anchor<L::Pos>)
    -> (usize, usize)
where L: PositionList + ?Sized {
    (index_of_anchor(list, start), index_of_anchor(list, end))
}
