use std::cmp::Ordering;
use std::fmt;

use crate::header::HashCache;

/// Bits held by one long-integer cell: `sizeof(word) * 4 - 1`.
pub const INT_CELL_WIDTH: u32 = (std::mem::size_of::<u64>() * 4 - 1) as u32;
pub const MAX_INT_CELL: u32 = (1u32 << INT_CELL_WIDTH) - 1;
const CELL_BASE: u64 = 1u64 << INT_CELL_WIDTH;

/// Arbitrary-precision integer.
///
/// Cells are little-endian, each below `2^INT_CELL_WIDTH`. The only value
/// with no cells is zero; there is never a most-significant zero cell.
#[derive(Debug, Clone)]
pub struct LongInt {
    negative: bool,
    cells: Vec<u32>,
    pub(crate) hash: HashCache,
}

impl PartialEq for LongInt {
    fn eq(&self, other: &Self) -> bool {
        self.negative == other.negative && self.cells == other.cells
    }
}

impl Eq for LongInt {}

impl LongInt {
    pub fn zero() -> Self {
        Self {
            negative: false,
            cells: Vec::new(),
            hash: HashCache::new(),
        }
    }

    pub fn from_i64(value: i64) -> Self {
        Self::from_i128(value as i128)
    }

    pub fn from_i128(value: i128) -> Self {
        let negative = value < 0;
        let mut mag = value.unsigned_abs();
        let mut cells = Vec::new();
        while mag != 0 {
            cells.push((mag % CELL_BASE as u128) as u32);
            mag /= CELL_BASE as u128;
        }
        Self::from_parts(negative, cells)
    }

    /// Build from a sign and little-endian cells, normalizing.
    pub fn from_parts(negative: bool, mut cells: Vec<u32>) -> Self {
        trim(&mut cells);
        Self {
            negative: negative && !cells.is_empty(),
            cells,
            hash: HashCache::new(),
        }
    }

    pub fn cells(&self) -> &[u32] {
        &self.cells
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    pub fn is_zero(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn to_i64(&self) -> Option<i64> {
        if self.cells.len() > 3 {
            return None;
        }
        let mut mag: i128 = 0;
        for cell in self.cells.iter().rev() {
            mag = mag * CELL_BASE as i128 + *cell as i128;
        }
        let value = if self.negative { -mag } else { mag };
        i64::try_from(value).ok()
    }

    pub fn to_f64(&self) -> f64 {
        let mut value = 0.0f64;
        for cell in self.cells.iter().rev() {
            value = value * CELL_BASE as f64 + *cell as f64;
        }
        if self.negative { -value } else { value }
    }

    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let negative = value < 0.0;
        let mut mag = value.abs().trunc();
        let mut cells = Vec::new();
        while mag >= 1.0 {
            let cell = (mag % CELL_BASE as f64) as u32;
            cells.push(cell);
            mag = (mag / CELL_BASE as f64).trunc();
        }
        Some(Self::from_parts(negative, cells))
    }

    pub fn is_odd(&self) -> bool {
        self.cells.first().is_some_and(|c| c & 1 == 1)
    }

    /// Parse decimal digits with an optional leading sign.
    pub fn parse(text: &str) -> Option<Self> {
        let (negative, digits) = match text.as_bytes().first()? {
            b'-' => (true, &text[1..]),
            b'+' => (false, &text[1..]),
            _ => (false, text),
        };
        if digits.is_empty() {
            return None;
        }
        let mut cells: Vec<u32> = Vec::new();
        for chunk in digits.as_bytes().chunks(9) {
            let mut scale = 1u64;
            let mut add = 0u64;
            for b in chunk {
                if !b.is_ascii_digit() {
                    return None;
                }
                scale *= 10;
                add = add * 10 + (b - b'0') as u64;
            }
            mul_small_add(&mut cells, scale, add);
        }
        Some(Self::from_parts(negative, cells))
    }

    pub fn neg(&self) -> Self {
        Self::from_parts(!self.negative, self.cells.clone())
    }

    pub fn abs(&self) -> Self {
        Self::from_parts(false, self.cells.clone())
    }

    pub fn add(&self, other: &Self) -> Self {
        if self.negative == other.negative {
            return Self::from_parts(self.negative, add_mag(&self.cells, &other.cells));
        }
        match cmp_mag(&self.cells, &other.cells) {
            Ordering::Equal => Self::zero(),
            Ordering::Greater => {
                Self::from_parts(self.negative, sub_mag(&self.cells, &other.cells))
            }
            Ordering::Less => {
                Self::from_parts(other.negative, sub_mag(&other.cells, &self.cells))
            }
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        self.add(&other.neg())
    }

    pub fn mul(&self, other: &Self) -> Self {
        Self::from_parts(
            self.negative != other.negative,
            mul_mag(&self.cells, &other.cells),
        )
    }

    /// Truncating division; `None` when dividing by zero.
    ///
    /// Quotient rounds toward zero and the remainder takes the sign of the
    /// dividend.
    pub fn div_rem(&self, other: &Self) -> Option<(Self, Self)> {
        if other.is_zero() {
            return None;
        }
        let (q, r) = divmod_mag(&self.cells, &other.cells);
        Some((
            Self::from_parts(self.negative != other.negative, q),
            Self::from_parts(self.negative, r),
        ))
    }

    /// Remainder with the sign of the divisor's magnitude, always `>= 0`.
    pub fn modulo(&self, other: &Self) -> Option<Self> {
        let (_, r) = self.div_rem(other)?;
        if r.negative {
            Some(r.add(&other.abs()))
        } else {
            Some(r)
        }
    }

    pub fn pow(&self, mut exp: u64) -> Self {
        let mut base = self.clone();
        let mut acc = Self::from_i64(1);
        while exp > 0 {
            if exp & 1 == 1 {
                acc = acc.mul(&base);
            }
            exp >>= 1;
            if exp > 0 {
                base = base.mul(&base);
            }
        }
        acc
    }

    pub fn cmp_value(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, false) => cmp_mag(&self.cells, &other.cells),
            (true, true) => cmp_mag(&other.cells, &self.cells),
        }
    }

    pub fn hash_code(&self) -> i32 {
        self.hash.get_or_compute(|| {
            let mut h: u32 = if self.negative { 0x9e37_79b9 } else { 0 };
            for cell in &self.cells {
                h = h.rotate_left(5) ^ *cell;
            }
            (h & 0x7fff_ffff) as i32
        })
    }
}

impl fmt::Display for LongInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }
        let mut mag = self.cells.clone();
        let mut chunks = Vec::new();
        while !mag.is_empty() {
            chunks.push(div_small(&mut mag, 1_000_000_000));
        }
        if self.negative {
            f.write_str("-")?;
        }
        let mut iter = chunks.iter().rev();
        if let Some(first) = iter.next() {
            write!(f, "{first}")?;
        }
        for chunk in iter {
            write!(f, "{chunk:09}")?;
        }
        Ok(())
    }
}

// ── magnitude helpers ──────────────────────────────────────────────

fn trim(cells: &mut Vec<u32>) {
    while cells.last() == Some(&0) {
        cells.pop();
    }
}

fn cmp_mag(a: &[u32], b: &[u32]) -> Ordering {
    if a.len() != b.len() {
        return a.len().cmp(&b.len());
    }
    for i in (0..a.len()).rev() {
        if a[i] != b[i] {
            return a[i].cmp(&b[i]);
        }
    }
    Ordering::Equal
}

fn add_mag(a: &[u32], b: &[u32]) -> Vec<u32> {
    let max_len = a.len().max(b.len());
    let mut out = Vec::with_capacity(max_len + 1);
    let mut carry = 0u64;
    for i in 0..max_len {
        let av = a.get(i).copied().unwrap_or(0) as u64;
        let bv = b.get(i).copied().unwrap_or(0) as u64;
        let sum = av + bv + carry;
        out.push((sum % CELL_BASE) as u32);
        carry = sum / CELL_BASE;
    }
    if carry != 0 {
        out.push(carry as u32);
    }
    out
}

/// `a - b` where `|a| >= |b|`.
fn sub_mag(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(a.len());
    let mut borrow = 0i64;
    for i in 0..a.len() {
        let mut diff = a[i] as i64 - b.get(i).copied().unwrap_or(0) as i64 - borrow;
        if diff < 0 {
            diff += CELL_BASE as i64;
            borrow = 1;
        } else {
            borrow = 0;
        }
        out.push(diff as u32);
    }
    trim(&mut out);
    out
}

fn mul_mag(a: &[u32], b: &[u32]) -> Vec<u32> {
    if a.is_empty() || b.is_empty() {
        return Vec::new();
    }
    let mut out = vec![0u64; a.len() + b.len()];
    for (i, &av) in a.iter().enumerate() {
        let mut carry = 0u64;
        for (j, &bv) in b.iter().enumerate() {
            let acc = out[i + j] + av as u64 * bv as u64 + carry;
            out[i + j] = acc % CELL_BASE;
            carry = acc / CELL_BASE;
        }
        let mut k = i + b.len();
        while carry != 0 {
            let acc = out[k] + carry;
            out[k] = acc % CELL_BASE;
            carry = acc / CELL_BASE;
            k += 1;
        }
    }
    let mut cells: Vec<u32> = out.into_iter().map(|c| c as u32).collect();
    trim(&mut cells);
    cells
}

fn mul_small_add(cells: &mut Vec<u32>, scale: u64, add: u64) {
    let mut carry = add;
    for cell in cells.iter_mut() {
        let acc = *cell as u64 * scale + carry;
        *cell = (acc % CELL_BASE) as u32;
        carry = acc / CELL_BASE;
    }
    while carry != 0 {
        cells.push((carry % CELL_BASE) as u32);
        carry /= CELL_BASE;
    }
}

/// Divide in place by a small divisor, returning the remainder.
fn div_small(cells: &mut Vec<u32>, divisor: u64) -> u64 {
    let mut rem = 0u64;
    for cell in cells.iter_mut().rev() {
        let acc = rem * CELL_BASE + *cell as u64;
        *cell = (acc / divisor) as u32;
        rem = acc % divisor;
    }
    trim(cells);
    rem
}

fn shift_left_one(cells: &mut Vec<u32>, bit: u32) {
    let mut carry = bit;
    for cell in cells.iter_mut() {
        let next = *cell >> (INT_CELL_WIDTH - 1);
        *cell = ((*cell << 1) & MAX_INT_CELL) | carry;
        carry = next;
    }
    if carry != 0 {
        cells.push(carry);
    }
}

fn divmod_mag(a: &[u32], b: &[u32]) -> (Vec<u32>, Vec<u32>) {
    if cmp_mag(a, b) == Ordering::Less {
        return (Vec::new(), a.to_vec());
    }
    if b.len() == 1 {
        let mut q = a.to_vec();
        let r = div_small(&mut q, b[0] as u64);
        let mut rem = vec![r as u32];
        trim(&mut rem);
        return (q, rem);
    }
    // binary long division over the dividend's bits
    let mut quotient = vec![0u32; a.len()];
    let mut rem: Vec<u32> = Vec::new();
    for i in (0..a.len()).rev() {
        for bit in (0..INT_CELL_WIDTH).rev() {
            shift_left_one(&mut rem, (a[i] >> bit) & 1);
            trim(&mut rem);
            if cmp_mag(&rem, b) != Ordering::Less {
                rem = sub_mag(&rem, b);
                quotient[i] |= 1 << bit;
            }
        }
    }
    trim(&mut quotient);
    (quotient, rem)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(text: &str) -> LongInt {
        LongInt::parse(text).unwrap()
    }

    #[test]
    fn cell_width_is_31_bits() {
        assert_eq!(INT_CELL_WIDTH, 31);
        assert_eq!(MAX_INT_CELL, 0x7fff_ffff);
    }

    #[test]
    fn cell_boundaries_round_trip_through_text() {
        for value in [
            MAX_INT_CELL as i64,
            MAX_INT_CELL as i64 + 1,
            -(MAX_INT_CELL as i64) - 1,
        ] {
            let n = LongInt::from_i64(value);
            assert_eq!(big(&n.to_string()), n);
            assert_eq!(n.to_i64(), Some(value));
        }
        assert_eq!(LongInt::from_i64(MAX_INT_CELL as i64 + 1).cells(), &[0, 1]);
    }

    #[test]
    fn zero_has_no_cells() {
        let z = big("1000").sub(&big("1000"));
        assert!(z.is_zero());
        assert!(!z.is_negative());
        assert_eq!(z.to_string(), "0");
    }

    #[test]
    fn factorial_30() {
        let mut acc = LongInt::from_i64(1);
        for i in 1..=30 {
            acc = acc.mul(&LongInt::from_i64(i));
        }
        assert_eq!(acc.to_string(), "265252859812191058636308480000000");
    }

    #[test]
    fn division_matches_small_arithmetic() {
        let a = big("-123456789012345678901234567890");
        let b = big("987654321987");
        let (q, r) = a.div_rem(&b).unwrap();
        assert_eq!(q.mul(&b).add(&r), a);
        assert!(r.is_negative());
        let m = a.modulo(&b).unwrap();
        assert!(!m.is_negative());
        assert_eq!(m.cmp_value(&b), Ordering::Less);
    }

    #[test]
    fn division_by_zero_is_none() {
        assert!(big("5").div_rem(&LongInt::zero()).is_none());
    }

    #[test]
    fn power_of_two() {
        let two = LongInt::from_i64(2);
        assert_eq!(two.pow(100).to_string(), "1267650600228229401496703205376");
    }

    #[test]
    fn ordering_respects_sign() {
        assert_eq!(big("-5").cmp_value(&big("3")), Ordering::Less);
        assert_eq!(big("-5").cmp_value(&big("-7")), Ordering::Greater);
        assert_eq!(
            big("99999999999999999999").cmp_value(&big("100000000000000000000")),
            Ordering::Less
        );
    }

    #[test]
    fn rejects_non_digits() {
        assert!(LongInt::parse("12a").is_none());
        assert!(LongInt::parse("-").is_none());
    }
}
