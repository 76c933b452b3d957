//! Fixed DEFLATE tables: extra bits and base values for length and distance
//! codes, and the transmission order of the code length alphabet.

/// Number of entries in the length and distance base tables.
pub const BASE_TABLE_LEN: usize = 30;

/// Code length symbols in the order their 3-bit lengths are transmitted.
pub const CODE_LENGTH_ORDER: [u8; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Builds an extra bits table and its base table.
///
/// The first `delta` codes carry no extra bits; after that every `delta`
/// codes share one more extra bit. Bases start at `first` and advance by the
/// range each code covers.
const fn build_bits_base(delta: usize, first: u16) -> ([u8; BASE_TABLE_LEN], [u16; BASE_TABLE_LEN]) {
    let mut bits = [0u8; BASE_TABLE_LEN];
    let mut base = [0u16; BASE_TABLE_LEN];

    let mut i = 0;
    while i < BASE_TABLE_LEN - delta {
        bits[i + delta] = (i / delta) as u8;
        i += 1;
    }

    let mut sum = first;
    i = 0;
    while i < BASE_TABLE_LEN {
        base[i] = sum;
        sum += 1u16 << bits[i];
        i += 1;
    }

    (bits, base)
}

const LENGTH_TABLES: ([u8; BASE_TABLE_LEN], [u16; BASE_TABLE_LEN]) = {
    let mut tables = build_bits_base(4, 3);
    // symbol 285 is a single code for length 258
    tables.0[28] = 0;
    tables.1[28] = 258;
    tables
};

const DISTANCE_TABLES: ([u8; BASE_TABLE_LEN], [u16; BASE_TABLE_LEN]) = build_bits_base(2, 1);

pub const LENGTH_BITS: [u8; BASE_TABLE_LEN] = LENGTH_TABLES.0;
pub const LENGTH_BASE: [u16; BASE_TABLE_LEN] = LENGTH_TABLES.1;
pub const DISTANCE_BITS: [u8; BASE_TABLE_LEN] = DISTANCE_TABLES.0;
pub const DISTANCE_BASE: [u16; BASE_TABLE_LEN] = DISTANCE_TABLES.1;

/// Literal/length symbols that may appear in a block (257..=285 are lengths).
pub const LENGTH_CODES: usize = 29;

#[test]
fn length_tables_match_rfc1951() {
    assert_eq!(&LENGTH_BITS[..LENGTH_CODES], &[
        0, 0, 0, 0, 0, 0, 0, 0, 1, 1, 1, 1, 2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4, 5, 5, 5, 5, 0
    ]);
    assert_eq!(&LENGTH_BASE[..LENGTH_CODES], &[
        3, 4, 5, 6, 7, 8, 9, 10, 11, 13, 15, 17, 19, 23, 27, 31, 35, 43, 51, 59, 67, 83, 99, 115,
        131, 163, 195, 227, 258
    ]);
}

#[test]
fn distance_tables_match_rfc1951() {
    assert_eq!(DISTANCE_BITS, [
        0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12,
        13, 13
    ]);
    assert_eq!(DISTANCE_BASE[..6], [1, 2, 3, 4, 5, 7]);
    assert_eq!(DISTANCE_BASE[29], 24577);
}
