// Copyright 2023 Greptime Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::cmp::Ordering;
use std::ops::{Index, IndexMut};

/// The deepest supported nesting level. Levels are `0..=MAX_DEFINITION_LEVEL`.
pub const MAX_DEFINITION_LEVEL: usize = 7;

const NUM_SLOTS: usize = MAX_DEFINITION_LEVEL + 1;

/// `RowNumber` is the sequence of row ordinals uniquely identifying a value in
/// a tree of nested columns, starting at the top-level row and adding another
/// ordinal for each level of nesting. `-1` is a placeholder for undefined at
/// lower levels. Two row numbers can be compared for full equality with `==`,
/// or partially with [`compare_row_numbers`], looking for equal lineages down
/// to a certain level.
///
/// For example, given the following tree the row numbers would be:
///
/// ```text
/// A          0, -1, -1
///   B        0,  0, -1
///   C        0,  1, -1
///     D      0,  1,  0
///   E        0,  2, -1
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RowNumber([i32; NUM_SLOTS]);

/// Slots strictly above the repetition level are cleared before the
/// undefine mask is applied: `mask[rep][i] == -1` iff `i <= rep`.
const KEEP_THROUGH_REP: [[i32; NUM_SLOTS]; NUM_SLOTS] = build_masks(true);

/// Slots strictly below the definition level become undefined:
/// `mask[def][i] == -1` iff `i > def`.
const UNDEFINE_BELOW_DEF: [[i32; NUM_SLOTS]; NUM_SLOTS] = build_masks(false);

const fn build_masks(keep: bool) -> [[i32; NUM_SLOTS]; NUM_SLOTS] {
    let mut masks = [[0i32; NUM_SLOTS]; NUM_SLOTS];
    let mut level = 0;
    while level < NUM_SLOTS {
        let mut slot = 0;
        while slot < NUM_SLOTS {
            let inside = if keep { slot <= level } else { slot > level };
            masks[level][slot] = if inside { -1 } else { 0 };
            slot += 1;
        }
        level += 1;
    }
    masks
}

#[track_caller]
fn check_level(level: usize) {
    assert!(
        level <= MAX_DEFINITION_LEVEL,
        "level out of bounds: should be [0:{MAX_DEFINITION_LEVEL}] but got {level}"
    );
}

impl RowNumber {
    /// An unassigned row number, ordered before every real row number.
    pub const EMPTY: RowNumber = RowNumber([-1; NUM_SLOTS]);

    /// The maximum(-ish) representable row number, ordered after every row
    /// number a scan can produce.
    pub const MAX: RowNumber = RowNumber([i32::MAX, -1, -1, -1, -1, -1, -1, -1]);

    /// Creates an empty invalid row number.
    pub fn empty() -> RowNumber {
        Self::EMPTY
    }

    pub fn valid(&self) -> bool {
        self.0[0] >= 0
    }

    /// Advances to the next row number for a value observed at the given
    /// repetition and definition level: a new sibling at `repetition_level`,
    /// new children down through `definition_level`, undefined below it.
    ///
    /// Levels outside `0..=7` are programmer errors and panic.
    #[inline]
    pub fn next(&mut self, repetition_level: usize, definition_level: usize) {
        #[cfg(feature = "masked-next")]
        self.next_masked(repetition_level, definition_level);
        #[cfg(not(feature = "masked-next"))]
        self.next_slow(repetition_level, definition_level);
    }

    /// Mask-table implementation of [`RowNumber::next`]: one scalar increment
    /// plus a lane-wise `(slot & keep) | undefine`, which the compiler can
    /// vectorize over the 8 slots.
    #[cfg_attr(not(feature = "masked-next"), allow(dead_code))]
    #[inline]
    fn next_masked(&mut self, rep: usize, def: usize) {
        check_level(rep);
        check_level(def);

        self.0[rep] += 1;
        let keep = &KEEP_THROUGH_REP[rep];
        let undefine = &UNDEFINE_BELOW_DEF[def];
        for i in 0..NUM_SLOTS {
            self.0[i] = (self.0[i] & keep[i]) | undefine[i];
        }
    }

    /// The original two-loop implementation of [`RowNumber::next`]. Kept to
    /// cross-check the masked version in the differential test.
    pub fn next_slow(&mut self, repetition_level: usize, definition_level: usize) {
        check_level(repetition_level);
        check_level(definition_level);

        self.0[repetition_level] += 1;

        // New children up through the definition level.
        for i in repetition_level + 1..=definition_level {
            self.0[i] = 0;
        }

        // Children past the definition level are undefined.
        for i in definition_level + 1..NUM_SLOTS {
            self.0[i] = -1;
        }
    }

    /// Skips rows at the root level.
    pub fn skip(&mut self, num_rows: i64) {
        self.0[0] += num_rows as i32;
        for i in 1..NUM_SLOTS {
            self.0[i] = -1;
        }
    }

    /// Returns the largest representable row number that is immediately prior
    /// to this one. Think of it like `f64::next_down` but for segmented row
    /// numbers:
    ///
    /// ```text
    /// 1000.0.0   (defined at 3 levels) is preceded by 999.max.max
    /// 1000.-1.-1 (defined at 1 level)  is preceded by 999.-1.-1
    /// ```
    pub fn preceding(mut self) -> RowNumber {
        for i in (0..NUM_SLOTS).rev() {
            match self.0[i] {
                -1 => continue,
                0 => self.0[i] = i32::MAX,
                _ => {
                    self.0[i] -= 1;
                    return self;
                }
            }
        }
        self
    }

    /// Keeps slots `0..=level` and marks everything deeper undefined.
    pub fn truncate(level: usize, mut row: RowNumber) -> RowNumber {
        check_level(level);
        let undefine = &UNDEFINE_BELOW_DEF[level];
        for i in 0..NUM_SLOTS {
            row.0[i] |= undefine[i];
        }
        row
    }
}

impl Default for RowNumber {
    fn default() -> Self {
        Self::EMPTY
    }
}

impl Index<usize> for RowNumber {
    type Output = i32;

    fn index(&self, slot: usize) -> &i32 {
        &self.0[slot]
    }
}

impl IndexMut<usize> for RowNumber {
    fn index_mut(&mut self, slot: usize) -> &mut i32 {
        &mut self.0[slot]
    }
}

/// Compares the sequences of row ordinals in `a` and `b` for partial
/// equality, descending from the top level through the given definition
/// level. For example, definition level 1 compares the top level and one
/// level of nesting below it.
pub fn compare_row_numbers(up_to_definition_level: usize, a: RowNumber, b: RowNumber) -> Ordering {
    for i in 0..=up_to_definition_level {
        match a.0[i].cmp(&b.0[i]) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    Ordering::Equal
}

/// Partial equality of `a` and `b` down to the given definition level.
/// A little faster than `compare_row_numbers(d, a, b) == Ordering::Equal`.
pub fn equal_row_numbers(up_to_definition_level: usize, a: RowNumber, b: RowNumber) -> bool {
    a.0[..=up_to_definition_level] == b.0[..=up_to_definition_level]
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    fn row(slots: [i32; 8]) -> RowNumber {
        RowNumber(slots)
    }

    #[test]
    fn test_next() {
        let cases = [
            // (input, rep, def, expected)
            (
                row([2, -1, -1, -1, -1, -1, -1, -1]),
                0,
                3,
                row([3, 0, 0, 0, -1, -1, -1, -1]),
            ),
            (
                row([3, 2, 1, 0, -1, -1, -1, -1]),
                1,
                2,
                row([3, 3, 0, -1, -1, -1, -1, -1]),
            ),
            (
                row([3, 2, 1, 1, -1, -1, -1, -1]),
                2,
                4,
                row([3, 2, 2, 0, 0, -1, -1, -1]),
            ),
            (
                row([1, 1, 1, 1, 1, 1, 1, 1]),
                7,
                7,
                row([1, 1, 1, 1, 1, 1, 1, 2]),
            ),
            // A sibling starting above its definition level undefines itself.
            (
                row([3, 2, 1, 0, -1, -1, -1, -1]),
                2,
                1,
                row([3, 2, -1, -1, -1, -1, -1, -1]),
            ),
        ];

        for (input, rep, def, expected) in cases {
            let mut fast = input;
            fast.next(rep, def);
            let mut slow = input;
            slow.next_slow(rep, def);

            assert_eq!(expected, fast, "next({rep}, {def}) on {input:?}");
            assert_eq!(expected, slow, "next_slow({rep}, {def}) on {input:?}");
        }
    }

    #[test]
    fn test_next_steps() {
        // Name.Language.Country examples from the Dremel whitepaper.
        let mut tr = RowNumber::empty();
        assert_eq!(row([-1, -1, -1, -1, -1, -1, -1, -1]), tr);

        let steps = [
            (0, 3, row([0, 0, 0, 0, -1, -1, -1, -1])),
            (2, 2, row([0, 0, 1, -1, -1, -1, -1, -1])),
            (1, 1, row([0, 1, -1, -1, -1, -1, -1, -1])),
            (1, 3, row([0, 2, 0, 0, -1, -1, -1, -1])),
            (0, 1, row([1, 0, -1, -1, -1, -1, -1, -1])),
        ];
        for (rep, def, expected) in steps {
            tr.next(rep, def);
            assert_eq!(expected, tr);
        }
    }

    // Compares the masked next() with the original next_slow() to prevent
    // drift.
    #[test]
    fn test_next_compare_impl() {
        let mut rng = rand::thread_rng();
        let mut fast = row([0; 8]);
        let mut slow = row([0; 8]);

        for _ in 0..1000 {
            let rep = rng.gen_range(0..=MAX_DEFINITION_LEVEL);
            let def = rng.gen_range(0..=MAX_DEFINITION_LEVEL);

            fast.next(rep, def);
            slow.next_slow(rep, def);

            assert_eq!(slow, fast, "next({rep}, {def})");
        }
    }

    #[test]
    #[should_panic(expected = "level out of bounds")]
    fn test_next_invalid_level() {
        let mut rn = row([1, 2, 3, 4, 5, 6, 7, 8]);
        rn.next(0, MAX_DEFINITION_LEVEL + 1);
    }

    #[test]
    fn test_truncate() {
        let rn = row([1, 2, 3, 4, 5, 6, 7, 8]);
        for level in 0..=MAX_DEFINITION_LEVEL {
            let truncated = RowNumber::truncate(level, rn);
            for slot in 0..=level {
                assert_eq!(rn[slot], truncated[slot]);
            }
            for slot in level + 1..8 {
                assert_eq!(-1, truncated[slot]);
            }
        }
    }

    #[test]
    #[should_panic(expected = "level out of bounds")]
    fn test_truncate_invalid_level() {
        RowNumber::truncate(MAX_DEFINITION_LEVEL + 1, row([1, 2, 3, 4, 5, 6, 7, 8]));
    }

    #[test]
    fn test_compare_row_numbers() {
        let cases = [
            (row([-1; 8]), row([0, -1, -1, -1, -1, -1, -1, -1]), Ordering::Less),
            (row([0, -1, -1, -1, -1, -1, -1, -1]), row([0, -1, -1, -1, -1, -1, -1, -1]), Ordering::Equal),
            (row([1, -1, -1, -1, -1, -1, -1, -1]), row([0, -1, -1, -1, -1, -1, -1, -1]), Ordering::Greater),
            (row([0, 1, -1, -1, -1, -1, -1, -1]), row([0, 2, -1, -1, -1, -1, -1, -1]), Ordering::Less),
            (row([0, 2, -1, -1, -1, -1, -1, -1]), row([0, 1, -1, -1, -1, -1, -1, -1]), Ordering::Greater),
        ];

        for (a, b, expected) in cases {
            assert_eq!(expected, compare_row_numbers(MAX_DEFINITION_LEVEL, a, b));
            assert_eq!(expected.reverse(), compare_row_numbers(MAX_DEFINITION_LEVEL, b, a));
            assert_eq!(
                expected == Ordering::Equal,
                equal_row_numbers(MAX_DEFINITION_LEVEL, a, b)
            );
        }
    }

    #[test]
    fn test_compare_is_total_order() {
        let mut rng = rand::thread_rng();
        let mut rows = vec![RowNumber::empty(); 64];
        let mut rn = RowNumber::empty();
        for r in rows.iter_mut() {
            rn.next(rng.gen_range(0..4), rng.gen_range(0..4));
            *r = rn;
        }

        for &a in &rows {
            assert_eq!(Ordering::Equal, compare_row_numbers(3, a, a));
            for &b in &rows {
                let ab = compare_row_numbers(3, a, b);
                assert_eq!(ab.reverse(), compare_row_numbers(3, b, a));
                for &c in &rows {
                    if ab == Ordering::Less && compare_row_numbers(3, b, c) == Ordering::Less {
                        assert_eq!(Ordering::Less, compare_row_numbers(3, a, c));
                    }
                }
            }
        }
    }

    #[test]
    fn test_preceding() {
        let cases = [
            (
                row([1000, -1, -1, -1, -1, -1, -1, -1]),
                row([999, -1, -1, -1, -1, -1, -1, -1]),
            ),
            (
                row([1000, 0, 0, 0, 0, 0, 0, 0]),
                row([
                    999,
                    i32::MAX,
                    i32::MAX,
                    i32::MAX,
                    i32::MAX,
                    i32::MAX,
                    i32::MAX,
                    i32::MAX,
                ]),
            ),
            (
                row([5, 3, 2, -1, -1, -1, -1, -1]),
                row([5, 3, 1, -1, -1, -1, -1, -1]),
            ),
        ];

        for (start, expected) in cases {
            assert_eq!(expected, start.preceding());
            assert_eq!(
                Ordering::Less,
                compare_row_numbers(MAX_DEFINITION_LEVEL, start.preceding(), start)
            );
        }
    }

    #[test]
    fn test_skip() {
        let mut rn = RowNumber::empty();
        rn.skip(10);
        assert_eq!(row([9, -1, -1, -1, -1, -1, -1, -1]), rn);

        rn.next(0, 3);
        assert_eq!(row([10, 0, 0, 0, -1, -1, -1, -1]), rn);
    }
}
