//! Inline formatting marks over an ordered position space.
//!
//! This crate maintains the formatting half of a rich-text document: a
//! mutable set of *marks* ("bold over this span", "url = ... over that
//! span") and an efficient projection of that set onto a single resolved
//! *format* per position. Conflicts between overlapping marks for the same
//! key are settled by a total precedence order, so the resolved state is a
//! pure function of the mark set - applying the same marks in any order on
//! any replica converges. The crate is not itself a replicated data type;
//! it is the local resolution engine a CRDT (or anything else) can sit on
//! top of.
//!
//! The pieces:
//!
//! - [`order`]: the external position contract ([`Position`],
//!   [`PositionList`]) and a self-contained lexicographic implementation
//!   ([`LexPos`]).
//! - [`anchor`]: points in the gaps between positions, and the
//!   slice <-> span conversions.
//! - [`mark`]: the [`Mark`] itself and the [`FormatChange`] records
//!   mutations produce.
//! - [`fmt`]: the engine - [`Formatting`] - answering `get_format` and
//!   `formatted_spans`, and computing the observable changes of every
//!   add / delete.
//! - [`rich`]: [`RichList`], a convenience facade pairing a value list
//!   with the engine for index-based editing.
//!
//! ```
//! use rich_marks::{Expand, RichList};
//! use serde_json::json;
//!
//! let mut doc: RichList<char> = RichList::new("alice");
//! doc.insert(0, "hello".chars().collect()).unwrap();
//! let (_, changes) = doc.format(0, 5, "bold", json!(true), Expand::After).unwrap();
//! assert_eq!(changes.len(), 1);
//! assert_eq!(doc.formatted_slices(None).unwrap().len(), 1);
//! ```

pub mod anchor;
mod check;
pub mod fmt;
pub mod mark;
mod markset;
pub mod order;
pub mod rich;
pub mod spans;

use std::fmt::{Display, Formatter};

pub use anchor::{anchor_at, index_of_anchor, slice_from_span, span_from_slice};
pub use anchor::{Anchor, Bind, Expand, Side};
pub use fmt::{FormatSpan, Formatting};
pub use mark::{Format, FormatChange, Mark, MarkCmp};
pub use order::{LexPos, Position, PositionList};
pub use rich::{diff_formats, FormatSlice, RichList, RichListSave};
pub use spans::{Span, SpanBuilder};

/// Everything that can go wrong. All failures are synchronous and leave
/// the engine untouched; they signal caller bugs, not recoverable
/// conditions.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum FmtError {
    /// `(min, Before)` or `(max, After)` - the two anchors that would sit
    /// outside the sequence.
    InvalidAnchor,
    /// Slice arguments outside `[0, len]`, or an empty / inverted range.
    OutOfRange,
    /// A mark whose anchor span is empty or inverted.
    MarkRangeInvalid,
    /// The sentinels themselves have no format.
    FormatAtBoundary,
    /// The pluggable mark comparator contradicted itself.
    InconsistentComparator,
}

impl Display for FmtError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FmtError::InvalidAnchor => f.write_str("anchor outside the legal range"),
            FmtError::OutOfRange => f.write_str("slice out of range"),
            FmtError::MarkRangeInvalid => f.write_str("mark span is empty or inverted"),
            FmtError::FormatAtBoundary => f.write_str("no format at the sentinel positions"),
            FmtError::InconsistentComparator => f.write_str("mark comparator is not a total order"),
        }
    }
}

impl std::error::Error for FmtError {}
