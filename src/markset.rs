//! The canonical mark store.
//!
//! Marks live in a slab and are referenced everywhere else by stable
//! integer handles, so the per-anchor stacks in the resolution index never
//! share ownership with the store. `ordered` is the precedence-ascending
//! sequence of handles; it *is* the saved state.

use std::cmp::Ordering;
use crate::FmtError;
use crate::mark::{Mark, MarkCmp};
use crate::order::Position;

/// Stable handle to a canonical mark in the slab. Only meaningful to the
/// `MarkSet` that issued it.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct MarkRef(u32);

/// How many tail slots `locate` probes linearly before giving up and
/// binary-searching the prefix. New marks almost always postdate the whole
/// set, so the tail probe is the hot path.
const TAIL_SCAN: usize = 10;

#[derive(Clone, Debug)]
pub(crate) struct MarkSet<P: Position> {
    slots: Vec<Option<Mark<P>>>,
    free: Vec<u32>,
    ordered: Vec<MarkRef>,
    cmp: MarkCmp<P>,
}

impl<P: Position> MarkSet<P> {
    pub fn new() -> Self {
        Self::with_cmp(Mark::cmp_stamp)
    }

    pub fn with_cmp(cmp: MarkCmp<P>) -> Self {
        MarkSet {
            slots: Vec::new(),
            free: Vec::new(),
            ordered: Vec::new(),
            cmp,
        }
    }

    pub fn len(&self) -> usize { self.ordered.len() }
    pub fn is_empty(&self) -> bool { self.ordered.is_empty() }

    pub fn get(&self, r: MarkRef) -> &Mark<P> {
        self.slots[r.0 as usize].as_ref().unwrap()
    }

    pub fn cmp_marks(&self, a: &Mark<P>, b: &Mark<P>) -> Ordering {
        (self.cmp)(a, b)
    }

    pub fn cmp_refs(&self, a: MarkRef, b: MarkRef) -> Ordering {
        (self.cmp)(self.get(a), self.get(b))
    }

    /// Marks in ascending precedence order.
    pub fn iter(&self) -> impl Iterator<Item = &Mark<P>> + '_ {
        self.ordered.iter().map(move |&r| self.get(r))
    }

    pub fn refs(&self) -> impl Iterator<Item = MarkRef> + '_ {
        self.ordered.iter().copied()
    }

    /// Where `m` sits in `ordered`: the insertion index, plus the existing
    /// canonical handle when `m` compares equal to a stored mark.
    ///
    /// Fails with `InconsistentComparator` when the comparator contradicts
    /// itself around the computed slot.
    pub fn locate(&self, m: &Mark<P>) -> Result<(usize, Option<MarkRef>), FmtError> {
        let n = self.ordered.len();
        if n == 0 {
            return Ok((0, None));
        }

        // Common case: the new mark postdates everything we've seen.
        let mut probe = None;
        match (self.cmp)(m, self.get(self.ordered[n - 1])) {
            Ordering::Greater => probe = Some((n, None)),
            Ordering::Equal => probe = Some((n - 1, Some(self.ordered[n - 1]))),
            Ordering::Less => {}
        }

        let floor = n.saturating_sub(TAIL_SCAN);
        if probe.is_none() {
            // Walk the tail backwards looking for our slot.
            for i in (floor..n - 1).rev() {
                match (self.cmp)(m, self.get(self.ordered[i])) {
                    Ordering::Greater => {
                        probe = Some((i + 1, None));
                        break;
                    }
                    Ordering::Equal => {
                        probe = Some((i, Some(self.ordered[i])));
                        break;
                    }
                    Ordering::Less => {}
                }
            }
            if probe.is_none() && floor == 0 {
                probe = Some((0, None));
            }
        }

        let (at, existing) = match probe {
            Some(x) => x,
            None => {
                // The mark predates the tail entirely: binary search the
                // prefix.
                let mut lo = 0;
                let mut hi = floor;
                let mut found = None;
                while lo < hi {
                    let mid = lo + (hi - lo) / 2;
                    match (self.cmp)(m, self.get(self.ordered[mid])) {
                        Ordering::Less => hi = mid,
                        Ordering::Greater => lo = mid + 1,
                        Ordering::Equal => {
                            found = Some(self.ordered[mid]);
                            lo = mid;
                            break;
                        }
                    }
                }
                (lo, found)
            }
        };

        self.verify_slot(m, at, existing.is_some())?;
        Ok((at, existing))
    }

    /// Cross-check the computed slot by comparing in the *opposite*
    /// direction. An asymmetric or non-transitive comparator shows up here
    /// as a neighbour on the wrong side.
    fn verify_slot(&self, m: &Mark<P>, at: usize, existing: bool) -> Result<(), FmtError> {
        if at > 0 {
            let prev = self.get(self.ordered[at - 1]);
            if (self.cmp)(prev, m) != Ordering::Less {
                return Err(FmtError::InconsistentComparator);
            }
        }
        let next_i = if existing { at + 1 } else { at };
        if next_i < self.ordered.len() {
            let next = self.get(self.ordered[next_i]);
            if (self.cmp)(next, m) != Ordering::Greater {
                return Err(FmtError::InconsistentComparator);
            }
        }
        Ok(())
    }

    /// Insert `m` unless a compare-equal mark is already stored. Returns
    /// the canonical handle and whether an insert happened.
    pub fn add(&mut self, m: Mark<P>) -> Result<(MarkRef, bool), FmtError> {
        let (at, existing) = self.locate(&m)?;
        if let Some(r) = existing {
            return Ok((r, false));
        }
        let r = self.alloc(m);
        self.ordered.insert(at, r);
        Ok((r, true))
    }

    /// Remove the canonical copy of `m` (by compare-equality) and return
    /// it, or `None` when absent. The returned handle is dead: it must not
    /// be dereferenced again, only compared against.
    pub fn remove(&mut self, m: &Mark<P>) -> Result<Option<(MarkRef, Mark<P>)>, FmtError> {
        let (at, existing) = self.locate(m)?;
        let Some(r) = existing else {
            return Ok(None);
        };
        self.ordered.remove(at);
        let mark = self.slots[r.0 as usize].take().unwrap();
        self.free.push(r.0);
        Ok(Some((r, mark)))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.ordered.clear();
    }

    /// The saved state is exactly the ascending mark sequence.
    pub fn save(&self) -> Vec<Mark<P>> {
        self.iter().cloned().collect()
    }

    /// Replace the state with `marks`. The input is assumed sorted, but we
    /// sort (and drop compare-equal duplicates) defensively.
    pub fn load(&mut self, mut marks: Vec<Mark<P>>) {
        marks.sort_by(|a, b| (self.cmp)(a, b));
        marks.dedup_by(|a, b| (self.cmp)(a, b) == Ordering::Equal);
        self.clear();
        for m in marks {
            let r = self.alloc(m);
            self.ordered.push(r);
        }
    }

    pub fn cmp_fn(&self) -> MarkCmp<P> {
        self.cmp
    }

    /// Internal consistency check, for tests and fuzzing.
    pub fn dbg_check(&self) {
        for w in self.ordered.windows(2) {
            assert_eq!(self.cmp_refs(w[0], w[1]), Ordering::Less, "ordered marks out of order");
        }
        let live = self.slots.iter().filter(|s| s.is_some()).count();
        assert_eq!(live, self.ordered.len(), "slab/ordered disagree");
        assert_eq!(live + self.free.len(), self.slots.len(), "slab leaked slots");
        for &r in &self.ordered {
            assert!(self.slots[r.0 as usize].is_some());
        }
    }

    fn alloc(&mut self, m: Mark<P>) -> MarkRef {
        match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(m);
                MarkRef(i)
            }
            None => {
                self.slots.push(Some(m));
                MarkRef((self.slots.len() - 1) as u32)
            }
        }
    }
}
