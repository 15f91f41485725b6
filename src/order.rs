//! The position space contract, and one concrete implementation of it.
//!
//! Positions are opaque, totally ordered identifiers of slots in a sequence.
//! The formatting engine never creates or destroys positions - it only
//! compares them. The total order is expressed through `Ord`, with two
//! reserved sentinels that compare strictly below / above every real
//! position.

use std::fmt::Debug;
use smartstring::alias::String as SmartString;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// An opaque, totally ordered position.
///
/// The `Ord` impl *is* the external order. `min_pos()` and `max_pos()` are
/// the reserved sentinels: they must compare strictly below / above every
/// other value of the type, and they never appear in a real list.
pub trait Position: Ord + Clone + Debug {
    fn min_pos() -> Self;
    fn max_pos() -> Self;

    fn is_min(&self) -> bool { *self == Self::min_pos() }
    fn is_max(&self) -> bool { *self == Self::max_pos() }
}

/// A list which contains some subset of positions, in position order.
///
/// Lookups are binary-search shaped: `locate` returns `Ok(index)` when the
/// position is present and `Err(insertion point)` when it isn't. The
/// would-be insertion point is the index of the first present position
/// greater than `p` - so the index strictly left of the gap is `ins - 1`
/// and the index strictly right of it is `ins`.
pub trait PositionList {
    type Pos: Position;

    fn len(&self) -> usize;
    fn is_empty(&self) -> bool { self.len() == 0 }

    /// Panics if `idx >= len()`.
    fn position_at(&self, idx: usize) -> &Self::Pos;

    fn locate(&self, p: &Self::Pos) -> Result<usize, usize>;
}

impl<P: Position> PositionList for [P] {
    type Pos = P;

    fn len(&self) -> usize { <[P]>::len(self) }

    fn position_at(&self, idx: usize) -> &P { &self[idx] }

    fn locate(&self, p: &P) -> Result<usize, usize> {
        self.binary_search(p)
    }
}

/// A lexicographic position: an arbitrary-precision "fraction" encoded as a
/// byte string over `a..=z`, ordered by the derived enum order (so `Min`
/// sorts below every string and `Max` above).
///
/// This is the crate's reference position space. It makes `RichList` and
/// the test suite self-contained; any type implementing [`Position`] works
/// just as well.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LexPos {
    Min,
    Str(SmartString),
    Max,
}

const DIGIT_BASE: u8 = b'a';
const RADIX: u32 = 26;

impl LexPos {
    /// Create a position strictly between `left` and `right`.
    ///
    /// Panics if `left >= right`. The result is the shortest-ish midpoint
    /// string; repeated splits grow the strings by O(1) amortized per split
    /// in the usual append-heavy case.
    pub fn between(left: &LexPos, right: &LexPos) -> LexPos {
        assert!(left < right, "between() needs left < right");
        let a = match left {
            LexPos::Min => &[][..],
            LexPos::Str(s) => s.as_bytes(),
            LexPos::Max => unreachable!(),
        };
        let b = match right {
            LexPos::Min => unreachable!(),
            LexPos::Str(s) => Some(s.as_bytes()),
            LexPos::Max => None,
        };
        let mut out = SmartString::new();
        midpoint(a, b, &mut out);
        LexPos::Str(out)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            LexPos::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

impl Position for LexPos {
    fn min_pos() -> Self { LexPos::Min }
    fn max_pos() -> Self { LexPos::Max }
}

impl Debug for LexPos {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexPos::Min => f.write_str("MIN"),
            LexPos::Str(s) => write!(f, "{:?}", s.as_str()),
            LexPos::Max => f.write_str("MAX"),
        }
    }
}

fn digit(b: u8) -> u32 { (b - DIGIT_BASE) as u32 }
fn from_digit(d: u32) -> u8 { DIGIT_BASE + d as u8 }

/// Append a string strictly between `a` and `b` to `out`. `a` empty means
/// negative infinity, `b = None` positive infinity. Inputs must not end in
/// the zero digit (`'a'`); the output never does either, which keeps the
/// order dense under repeated splitting.
fn midpoint(a: &[u8], b: Option<&[u8]>, out: &mut SmartString) {
    if let Some(b) = b {
        // Shared prefix, treating `a` as padded with zero digits. The pad
        // matters: between "" and "ab" the answer must start with "a".
        let mut n = 0;
        while n < b.len() && a.get(n).copied().unwrap_or(DIGIT_BASE) == b[n] {
            n += 1;
        }
        if n > 0 {
            debug_assert!(n < b.len(), "right bound ends in the zero digit");
            out.push_str(std::str::from_utf8(&b[..n]).unwrap());
            let a_rest = if n < a.len() { &a[n..] } else { &[][..] };
            return midpoint(a_rest, Some(&b[n..]), out);
        }
    }

    let digit_a = a.first().map_or(0, |&c| digit(c));
    let digit_b = b.map_or(RADIX, |b| digit(b[0]));
    debug_assert!(digit_a < digit_b);

    if digit_b - digit_a > 1 {
        // Room for a single digit in between. Never the zero digit, since
        // digit_b >= 2 here.
        let mid = (digit_a + digit_b + 1) / 2;
        out.push(from_digit(mid) as char);
    } else if b.map_or(false, |b| b.len() > 1) {
        // Consecutive first digits and b has more to say: b's first digit
        // alone already sits strictly between.
        out.push(b.unwrap()[0] as char);
    } else {
        // Consecutive first digits, b exhausted. Keep a's first digit and
        // recurse with the rest of a against +infinity.
        out.push(from_digit(digit_a) as char);
        let a_rest = if a.is_empty() { &[][..] } else { &a[1..] };
        midpoint(a_rest, None, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::prelude::*;

    fn mk(s: &str) -> LexPos { LexPos::Str(s.into()) }

    #[test]
    fn sentinel_order() {
        assert!(LexPos::Min < mk("a"));
        assert!(mk("zzzz") < LexPos::Max);
        assert!(LexPos::Min < LexPos::Max);
    }

    #[test]
    fn between_simple() {
        let p = LexPos::between(&LexPos::Min, &LexPos::Max);
        assert!(LexPos::Min < p && p < LexPos::Max);
        assert_eq!(p, mk("n"));

        let q = LexPos::between(&LexPos::Min, &p);
        assert!(q < p);
        let r = LexPos::between(&p, &LexPos::Max);
        assert!(p < r);
    }

    #[test]
    fn between_tight() {
        // Lexicographically adjacent-looking pairs still have room.
        let cases = [
            (mk("a"), mk("b")),
            (mk("ab"), mk("b")),
            (mk("n"), mk("nb")),
            (mk("yz"), mk("z")),
        ];
        for (l, r) in cases {
            let m = LexPos::between(&l, &r);
            assert!(l < m && m < r, "{:?} < {:?} < {:?}", l, m, r);
        }
    }

    #[test]
    fn no_trailing_zero_digit() {
        let mut rng = SmallRng::seed_from_u64(12);
        let mut positions = vec![LexPos::Min, LexPos::Max];
        for _ in 0..2000 {
            let i = rng.gen_range(0..positions.len() - 1);
            let p = LexPos::between(&positions[i], &positions[i + 1]);
            if let LexPos::Str(s) = &p {
                assert!(!s.ends_with('a'), "trailing zero digit in {:?}", s);
            }
            positions.insert(i + 1, p);
        }
        // And the whole set is still strictly ordered.
        for w in positions.windows(2) {
            assert!(w[0] < w[1]);
        }
    }

    #[test]
    fn slice_locate() {
        let list: Vec<LexPos> = ["b", "d", "f"].iter().map(|s| mk(s)).collect();
        assert_eq!(list.as_slice().locate(&mk("d")), Ok(1));
        assert_eq!(list.as_slice().locate(&mk("c")), Err(1));
        assert_eq!(list.as_slice().locate(&LexPos::Min), Err(0));
        assert_eq!(list.as_slice().locate(&LexPos::Max), Err(3));
    }
}
