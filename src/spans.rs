//! A small streaming device that turns an in-order sequence of
//! `(anchor, payload)` events into maximal half-open spans.
//!
//! The builder knows nothing about marks. Callers plug in the payload
//! equality: whole-format equality when enumerating the document, or a
//! change/no-change tag when computing the effect of a mutation. Same idea
//! as run-length merging elsewhere in the crate's family of structures,
//! keyed on payload equality instead of run adjacency.

use crate::anchor::Anchor;
use crate::order::Position;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A half-open anchor interval `[start, end)` carrying one payload.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(bound(
    serialize = "P: Serialize + Clone, T: Serialize",
    deserialize = "P: Deserialize<'de>, T: Deserialize<'de>"
)))]
pub struct Span<P: Position, T> {
    pub start: Anchor<P>,
    pub end: Anchor<P>,
    pub payload: T,
}

/// Streams `(anchor, payload)` pairs, in anchor order, into maximal spans.
///
/// Zero-length spans are skipped; a new span merges into the running one
/// when the payloads are equal under the supplied equality.
pub struct SpanBuilder<P: Position, T, F: FnMut(&T, &T) -> bool> {
    eq: F,
    open: Option<(Anchor<P>, T)>,
    done: Vec<Span<P, T>>,
}

impl<P: Position, T, F: FnMut(&T, &T) -> bool> SpanBuilder<P, T, F> {
    pub fn new(eq: F) -> Self {
        SpanBuilder { eq, open: None, done: Vec::new() }
    }

    /// Feed the next event. `anchor` must be >= every previously pushed
    /// anchor.
    pub fn push(&mut self, anchor: Anchor<P>, payload: T) {
        let (start, open_payload) = match self.open.take() {
            None => {
                self.open = Some((anchor, payload));
                return;
            }
            Some(open) => open,
        };
        debug_assert!(start <= anchor);

        if start == anchor {
            // The running span is empty and its payload is dead. If
            // dropping it reconnects us with the previous finished span,
            // reopen that span instead.
            let reopen = match self.done.last() {
                Some(last) => last.end == anchor && (self.eq)(&last.payload, &payload),
                None => false,
            };
            if reopen {
                let last = self.done.pop().unwrap();
                self.open = Some((last.start, last.payload));
            } else {
                self.open = Some((start, payload));
            }
        } else if (self.eq)(&open_payload, &payload) {
            // Same payload: the running span swallows this event.
            self.open = Some((start, open_payload));
        } else {
            self.done.push(Span { start, end: anchor.clone(), payload: open_payload });
            self.open = Some((anchor, payload));
        }
    }

    /// Close the running span at `next` and return every span built.
    pub fn finish(mut self, next: Anchor<P>) -> Vec<Span<P, T>> {
        if let Some((start, payload)) = self.open.take() {
            debug_assert!(start <= next);
            if start != next {
                self.done.push(Span { start, end: next, payload });
            }
        }
        self.done
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::LexPos;
    use crate::anchor::Anchor;

    fn a(s: &str) -> Anchor<LexPos> { Anchor::after(LexPos::Str(s.into())) }

    #[test]
    fn merges_equal_payloads() {
        let mut b = SpanBuilder::new(|x: &u32, y: &u32| x == y);
        b.push(Anchor::min(), 1);
        b.push(a("c"), 1);
        b.push(a("f"), 2);
        let spans = b.finish(Anchor::max());
        assert_eq!(spans, vec![
            Span { start: Anchor::min(), end: a("f"), payload: 1 },
            Span { start: a("f"), end: Anchor::max(), payload: 2 },
        ]);
    }

    #[test]
    fn skips_empty_spans() {
        let mut b = SpanBuilder::new(|x: &u32, y: &u32| x == y);
        b.push(a("c"), 1);
        let spans = b.finish(a("c"));
        assert!(spans.is_empty());

        // Replacement at the same anchor: the empty first span vanishes.
        let mut b = SpanBuilder::new(|x: &u32, y: &u32| x == y);
        b.push(a("c"), 1);
        b.push(a("c"), 2);
        let spans = b.finish(a("f"));
        assert_eq!(spans, vec![Span { start: a("c"), end: a("f"), payload: 2 }]);
    }

    #[test]
    fn reopens_across_vanished_span() {
        // 1 then an empty 2 then 1 again: all one span of 1s.
        let mut b = SpanBuilder::new(|x: &u32, y: &u32| x == y);
        b.push(a("c"), 1);
        b.push(a("f"), 2);
        b.push(a("f"), 1);
        let spans = b.finish(a("m"));
        assert_eq!(spans, vec![Span { start: a("c"), end: a("m"), payload: 1 }]);
    }
}
