//! Deep structural validation of the engine, used by tests and fuzzers
//! after every mutation. Not wired into release paths.

use crate::anchor::Anchor;
use crate::fmt::Formatting;
use crate::order::Position;

impl<P: Position> Formatting<P> {
    /// Panics if any structural invariant is broken. With `deep`, also
    /// re-resolves the whole mark set from scratch and compares.
    pub fn dbg_check(&self, deep: bool) {
        self.marks.dbg_check();

        // The seed entry must always be there, after side populated,
        // before side impossible.
        let min = P::min_pos();
        let min_entry = self.index.get(&min).expect("seed entry missing");
        assert!(min_entry.after.is_some(), "seed after side missing");
        assert!(min_entry.before.is_none(), "illegal before side at minimum");

        for (pos, entry) in &self.index {
            assert!(
                entry.before.is_some() || entry.after.is_some(),
                "entry with no sides at {:?}", pos
            );
            if pos.is_max() {
                assert!(entry.after.is_none(), "illegal after side at maximum");
            }

            for (side, stacks) in [
                (crate::anchor::Side::Before, &entry.before),
                (crate::anchor::Side::After, &entry.after),
            ] {
                let Some(stacks) = stacks else { continue };
                let anchor = Anchor::new(pos.clone(), side);
                for (key, stack) in stacks {
                    assert!(!stack.is_empty(), "empty stack for {:?} at {:?}", key, anchor);
                    for w in stack.windows(2) {
                        assert_eq!(
                            self.marks.cmp_refs(w[0], w[1]),
                            std::cmp::Ordering::Less,
                            "stack out of precedence order at {:?}", anchor
                        );
                    }
                    for &r in stack.iter() {
                        let m = self.marks.get(r);
                        assert_eq!(&m.key, key, "mark filed under wrong key");
                        assert!(m.covers(&anchor), "mark in stack outside its span");
                    }
                }
            }
        }

        if deep {
            // Every mark must be present in every populated side its span
            // covers.
            for r in self.marks.refs() {
                let m = self.marks.get(r);
                let range = (
                    std::ops::Bound::Included(&m.start.pos),
                    std::ops::Bound::Included(&m.end.pos),
                );
                for (pos, entry) in self.index.range(range) {
                    for (side, stacks) in [
                        (crate::anchor::Side::Before, &entry.before),
                        (crate::anchor::Side::After, &entry.after),
                    ] {
                        let Some(stacks) = stacks else { continue };
                        let anchor = Anchor::new(pos.clone(), side);
                        if !m.covers(&anchor) {
                            continue;
                        }
                        let stack = stacks
                            .get(&m.key)
                            .unwrap_or_else(|| panic!("no stack for covered {:?}", anchor));
                        assert!(stack.contains(&r), "mark missing from covered {:?}", anchor);
                    }
                }
            }

            // Re-resolving the saved mark set from scratch must agree with
            // the incrementally maintained state.
            let mut fresh = Formatting::with_cmp(self.marks.cmp_fn());
            fresh.load(self.save()).expect("saved state failed to reload");
            assert_eq!(
                fresh.formatted_spans(),
                self.formatted_spans(),
                "incremental state diverged from scratch resolution"
            );
        }
    }
}
