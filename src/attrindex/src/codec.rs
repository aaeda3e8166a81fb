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

//! Compact encoding for sorted sequences of row numbers.
//!
//! Layout: one descriptor byte holding the encoded slot count (always 4,
//! deeper slots are stripped), then per record one count byte `n` followed
//! by `n` zig-zag varint deltas against the previous record. `n` is the
//! slot count minus the record's run of trailing zero deltas, so a record
//! equal to its predecessor costs a single byte. Dropping trailing zero
//! deltas equals dropping trailing zero bytes: a canonical varint only ends
//! in a zero byte when it encodes the one-byte value zero.
//!
//! Decoded records always carry `-1` in slots 4..7 regardless of what the
//! encoder saw there.

use snafu::ensure;

use parquetscan::RowNumber;

use crate::error::{CorruptRowNumbersSnafu, Result};

/// Slots 0..ENCODED_SLOTS of each record are preserved by the codec.
pub const ENCODED_SLOTS: usize = 4;

/// Encodes `rows` into `buf` (cleared first; returned to allow buffer
/// reuse). Rows must be sorted; the delta encoding does not require it but
/// compresses poorly otherwise.
pub fn row_numbers_encode(mut buf: Vec<u8>, rows: &[RowNumber]) -> Vec<u8> {
    buf.clear();
    if rows.is_empty() {
        return buf;
    }

    buf.push(ENCODED_SLOTS as u8);
    let mut prev = [0i32; ENCODED_SLOTS];
    for row in rows {
        let mut deltas = [0i64; ENCODED_SLOTS];
        for slot in 0..ENCODED_SLOTS {
            deltas[slot] = row[slot] as i64 - prev[slot] as i64;
            prev[slot] = row[slot];
        }

        let mut count = ENCODED_SLOTS;
        while count > 0 && deltas[count - 1] == 0 {
            count -= 1;
        }
        buf.push(count as u8);
        for delta in &deltas[..count] {
            put_uvarint(&mut buf, zigzag_encode(*delta));
        }
    }
    buf
}

/// Decodes into `dst` (cleared first; returned to allow buffer reuse).
pub fn row_numbers_decode(mut dst: Vec<RowNumber>, data: &[u8]) -> Result<Vec<RowNumber>> {
    dst.clear();
    if data.is_empty() {
        return Ok(dst);
    }

    let slots = data[0] as usize;
    ensure!(
        slots == ENCODED_SLOTS,
        CorruptRowNumbersSnafu {
            reason: format!("unsupported slot count {slots}"),
        }
    );

    let mut pos = 1;
    let mut prev = [0i32; ENCODED_SLOTS];
    while pos < data.len() {
        let count = data[pos] as usize;
        pos += 1;
        ensure!(
            count <= ENCODED_SLOTS,
            CorruptRowNumbersSnafu {
                reason: format!("record slot count {count} out of range"),
            }
        );

        let mut row = RowNumber::empty();
        for slot in 0..ENCODED_SLOTS {
            let delta = if slot < count {
                let (value, read) = read_uvarint(&data[pos..])?;
                pos += read;
                zigzag_decode(value)
            } else {
                0
            };
            prev[slot] = (prev[slot] as i64 + delta) as i32;
            row[slot] = prev[slot];
        }
        dst.push(row);
    }
    Ok(dst)
}

fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

fn put_uvarint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

fn read_uvarint(data: &[u8]) -> Result<(u64, usize)> {
    let mut value = 0u64;
    let mut shift = 0u32;
    for (i, byte) in data.iter().enumerate() {
        ensure!(
            shift < 64,
            CorruptRowNumbersSnafu {
                reason: "varint overflows 64 bits",
            }
        );
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
        shift += 7;
    }
    CorruptRowNumbersSnafu {
        reason: "truncated varint",
    }
    .fail()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rn(slots: [i32; 8]) -> RowNumber {
        let mut row = RowNumber::empty();
        for (i, s) in slots.iter().enumerate() {
            row[i] = *s;
        }
        row
    }

    fn round_trip(input: &[RowNumber]) -> Vec<RowNumber> {
        let encoded = row_numbers_encode(Vec::new(), input);
        row_numbers_decode(Vec::new(), &encoded).unwrap()
    }

    #[test]
    fn test_encode_decode() {
        let cases: Vec<(&str, Vec<RowNumber>, Vec<RowNumber>)> = vec![
            ("empty", vec![], vec![]),
            (
                "single row number",
                vec![rn([1, 2, 3, 4, 5, 6, 7, 8])],
                vec![rn([1, 2, 3, 4, -1, -1, -1, -1])],
            ),
            (
                "multiple row numbers",
                vec![
                    rn([1, 2, 3, 4, 5, 6, 7, 8]),
                    rn([10, 20, 30, 40, 50, 60, 70, 80]),
                    rn([100, 200, 300, 400, 500, 600, 700, 800]),
                ],
                vec![
                    rn([1, 2, 3, 4, -1, -1, -1, -1]),
                    rn([10, 20, 30, 40, -1, -1, -1, -1]),
                    rn([100, 200, 300, 400, -1, -1, -1, -1]),
                ],
            ),
            (
                "negative values",
                vec![
                    rn([1, 2, -1, -2, 5, 6, 7, 8]),
                    rn([10, -1, -10, -11, 50, 60, 70, 80]),
                ],
                vec![
                    rn([1, 2, -1, -2, -1, -1, -1, -1]),
                    rn([10, -1, -10, -11, -1, -1, -1, -1]),
                ],
            ),
            (
                "sequential values",
                vec![
                    rn([0, 0, 0, 0, 0, 0, 0, 0]),
                    rn([1, 1, 1, 1, 1, 1, 1, 1]),
                    rn([2, 2, 2, 2, 2, 2, 2, 2]),
                ],
                vec![
                    rn([0, 0, 0, 0, -1, -1, -1, -1]),
                    rn([1, 1, 1, 1, -1, -1, -1, -1]),
                    rn([2, 2, 2, 2, -1, -1, -1, -1]),
                ],
            ),
            (
                "large deltas",
                vec![
                    rn([0, 0, 0, 0, 0, 0, 0, 0]),
                    rn([1001, 1002, 1003, 1004, 0, 0, 0, 0]),
                    rn([2001, 2002, 2003, 2004, 0, 0, 0, 0]),
                ],
                vec![
                    rn([0, 0, 0, 0, -1, -1, -1, -1]),
                    rn([1001, 1002, 1003, 1004, -1, -1, -1, -1]),
                    rn([2001, 2002, 2003, 2004, -1, -1, -1, -1]),
                ],
            ),
        ];

        for (name, input, expected) in cases {
            assert_eq!(expected, round_trip(&input), "{name}");
        }
    }

    #[test]
    fn test_zero_delta_record_is_one_byte() {
        // First record: all-zero deltas against the implicit zero
        // predecessor; every further repeat costs one count byte.
        let rows = vec![rn([0, 0, 0, 0, -1, -1, -1, -1]); 5];
        let encoded = row_numbers_encode(Vec::new(), &rows);
        assert_eq!(1 + 5, encoded.len());
        assert_eq!(rows, row_numbers_decode(Vec::new(), &encoded).unwrap());
    }

    #[test]
    fn test_trailing_zero_truncation() {
        let cases = vec![
            // (row, expected bytes after the count byte)
            (rn([5, 0, 0, 0, -1, -1, -1, -1]), 1), // one delta survives
            (rn([5, 3, 0, 0, -1, -1, -1, -1]), 2),
            (rn([5, 3, 2, 0, -1, -1, -1, -1]), 3),
            (rn([5, 3, 2, 1, -1, -1, -1, -1]), 4),
        ];
        for (row, deltas) in cases {
            let encoded = row_numbers_encode(Vec::new(), &[row]);
            // descriptor + count byte + varints (all single-byte here)
            assert_eq!(1 + 1 + deltas, encoded.len(), "{row:?}");
            assert_eq!(
                vec![row],
                row_numbers_decode(Vec::new(), &encoded).unwrap()
            );
        }
    }

    #[test]
    fn test_negative_mid_deltas_round_trip() {
        // A deeper slot resetting to a smaller ordinal yields negative
        // deltas between sorted records.
        let rows = vec![
            rn([7, 4, -1, -1, -1, -1, -1, -1]),
            rn([8, 0, -1, -1, -1, -1, -1, -1]),
            rn([8, 1, -1, -1, -1, -1, -1, -1]),
        ];
        assert_eq!(rows, round_trip(&rows));
    }

    #[test]
    fn test_encoded_size_bound() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        let mut rows = Vec::new();
        let mut row = rn([10, 0, 0, 0, -1, -1, -1, -1]);
        for _ in 0..1000 {
            row[0] += rng.gen_range(0..1000);
            row[1] = rng.gen_range(0..5);
            row[2] = rng.gen_range(0..5);
            row[3] = rng.gen_range(0..5);
            rows.push(row);
        }

        let encoded = row_numbers_encode(Vec::new(), &rows);
        // Count byte plus at most 5 varint bytes per slot.
        assert!(encoded.len() <= 1 + rows.len() * (1 + ENCODED_SLOTS * 5));
        assert_eq!(
            rows.iter()
                .map(|r| RowNumber::truncate(3, *r))
                .collect::<Vec<_>>(),
            round_trip(&rows)
        );
    }

    #[test]
    fn test_corrupt_input() {
        // Unsupported slot count.
        assert!(row_numbers_decode(Vec::new(), &[8, 0]).is_err());
        // Record count byte out of range.
        assert!(row_numbers_decode(Vec::new(), &[4, 5]).is_err());
        // Truncated varint.
        assert!(row_numbers_decode(Vec::new(), &[4, 1, 0x80]).is_err());
    }
}
