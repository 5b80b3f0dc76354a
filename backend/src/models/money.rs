//! Monetary units
//!
//! CRITICAL: all value amounts are unsigned integers in the smallest unit of
//! the asset (wei-like). Rates are basis points. No floating point anywhere in
//! the money path.

/// Amount of native value or collateral, in the smallest unit
pub type Amount = u128;

/// Rate in basis points (10_000 = 100%)
pub type Bps = u32;

/// Basis points in one whole
pub const BPS_DENOMINATOR: Amount = 10_000;

/// Apply a basis-point rate to an amount, rounding down
///
/// Splits the amount into whole and fractional parts of the denominator so
/// that `amount * bps` is never formed directly.
///
/// # Example
/// ```
/// use p2p_lending_core_rs::models::money::apply_bps;
///
/// assert_eq!(apply_bps(6_000_000, 100), 60_000); // 1%
/// assert_eq!(apply_bps(99, 5_000), 49);          // rounds down
/// ```
pub fn apply_bps(amount: Amount, bps: Bps) -> Amount {
    let bps = Amount::from(bps);
    let whole = amount / BPS_DENOMINATOR;
    let fraction = amount % BPS_DENOMINATOR;
    whole
        .saturating_mul(bps)
        .saturating_add(fraction * bps / BPS_DENOMINATOR)
}

/// [`apply_bps`] that returns `None` instead of saturating
///
/// ```
/// use p2p_lending_core_rs::models::money::checked_apply_bps;
///
/// assert_eq!(checked_apply_bps(6_000_000, 100), Some(60_000));
/// assert_eq!(checked_apply_bps(u128::MAX, 20_000), None);
/// ```
pub fn checked_apply_bps(amount: Amount, bps: Bps) -> Option<Amount> {
    let bps = Amount::from(bps);
    let whole = amount / BPS_DENOMINATOR;
    let fraction = amount % BPS_DENOMINATOR;
    whole
        .checked_mul(bps)?
        .checked_add(fraction * bps / BPS_DENOMINATOR)
}

/// `floor(amount * numerator / denominator)` without intermediate overflow
/// for `numerator <= denominator`
///
/// Returns 0 when `denominator` is 0.
pub fn pro_rata(amount: Amount, numerator: Amount, denominator: Amount) -> Amount {
    if denominator == 0 {
        return 0;
    }
    match amount.checked_mul(numerator) {
        Some(product) => product / denominator,
        None => mul_div_wide(amount, numerator, denominator),
    }
}

const LOW_64: u128 = u64::MAX as u128;

/// `floor(a * b / d)` through a 256-bit intermediate product
///
/// The quotient must fit in 128 bits.
fn mul_div_wide(a: u128, b: u128, d: u128) -> u128 {
    let (a_hi, a_lo) = (a >> 64, a & LOW_64);
    let (b_hi, b_lo) = (b >> 64, b & LOW_64);
    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    let mid = (ll >> 64) + (lh & LOW_64) + (hl & LOW_64);
    let lo = (ll & LOW_64) | (mid << 64);
    let hi = hh + (lh >> 64) + (hl >> 64) + (mid >> 64);

    // shift-subtract long division
    let mut remainder: u128 = 0;
    let mut quotient: u128 = 0;
    for bit in (0..256u32).rev() {
        let next = if bit >= 128 {
            (hi >> (bit - 128)) & 1
        } else {
            (lo >> bit) & 1
        };
        let carry = remainder >> 127;
        remainder = (remainder << 1) | next;
        quotient <<= 1;
        if carry == 1 || remainder >= d {
            remainder = remainder.wrapping_sub(d);
            quotient |= 1;
        }
    }
    quotient
}
