use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
///
/// All throughput arithmetic (items or m³ per minute, ratios) runs in this
/// type so that identical saves produce bit-identical results.
pub type Fixed64 = I32F32;

/// Convert an f64 to Fixed64, returning `None` for NaN, infinities and
/// values outside the representable range.
#[inline]
pub fn f64_to_fixed64(v: f64) -> Option<Fixed64> {
    Fixed64::checked_from_num(v)
}

/// Convert Fixed64 to f64. Use only for display and summaries.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}

/// Ratio `num / den`, or zero when the divisor is not positive.
#[inline]
pub fn ratio(num: Fixed64, den: Fixed64) -> Fixed64 {
    if den <= Fixed64::ZERO {
        return Fixed64::ZERO;
    }
    num.checked_div(den).unwrap_or(Fixed64::MAX)
}

/// Saturating sum of an iterator of Fixed64 values.
pub fn sum<I: IntoIterator<Item = Fixed64>>(values: I) -> Fixed64 {
    values
        .into_iter()
        .fold(Fixed64::ZERO, |acc, v| acc.saturating_add(v))
}
