//! Raw token amount arithmetic
//!
//! All on-chain amounts are carried as 256-bit unsigned integers in the
//! token's smallest unit, with the decimal count carried alongside. Decimal
//! strings only exist at the edges (signals, logs, user-facing messages);
//! everything in between stays raw. Percentage math goes through basis
//! points with a full-width multiply so no intermediate overflows.

use primitive_types::{U256, U512};

use crate::error::{Error, Result};

/// Basis points in one whole (100%)
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Convert a non-negative decimal string (e.g. "1000.25") to a raw amount
/// with the given number of decimals. More fractional digits than the token
/// carries is an error, not a silent truncation.
pub fn to_raw(value: &str, decimals: u8) -> Result<U256> {
    let value = value.trim();
    if value.is_empty() || value.starts_with('-') || value.starts_with('+') {
        return Err(Error::InvalidSignalFormat(format!(
            "not a non-negative decimal: '{}'",
            value
        )));
    }

    let (int_part, frac_part) = match value.split_once('.') {
        Some((i, f)) => (i, f),
        None => (value, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return Err(Error::InvalidSignalFormat("empty amount".into()));
    }
    if !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(Error::InvalidSignalFormat(format!(
            "non-digit in amount: '{}'",
            value
        )));
    }
    if frac_part.len() > decimals as usize {
        return Err(Error::InvalidSignalFormat(format!(
            "'{}' has more than {} decimal places",
            value, decimals
        )));
    }

    let int_part = if int_part.is_empty() { "0" } else { int_part };
    let mut raw = U256::from_dec_str(int_part)
        .map_err(|e| Error::InvalidSignalFormat(format!("amount '{}': {}", value, e)))?;

    raw = raw
        .checked_mul(pow10(decimals))
        .ok_or_else(|| Error::InvalidSignalFormat(format!("amount '{}' overflows", value)))?;

    if !frac_part.is_empty() {
        let scale = pow10(decimals - frac_part.len() as u8);
        let frac = U256::from_dec_str(frac_part)
            .map_err(|e| Error::InvalidSignalFormat(format!("amount '{}': {}", value, e)))?;
        raw = raw
            .checked_add(frac * scale)
            .ok_or_else(|| Error::InvalidSignalFormat(format!("amount '{}' overflows", value)))?;
    }

    Ok(raw)
}

/// Format a raw amount back into a canonical decimal string. Trailing
/// fractional zeros are trimmed ("1.50" -> "1.5", "2.00" -> "2").
pub fn format_raw(raw: U256, decimals: u8) -> String {
    if decimals == 0 {
        return raw.to_string();
    }
    let divisor = pow10(decimals);
    let int = raw / divisor;
    let frac = raw % divisor;
    if frac.is_zero() {
        return int.to_string();
    }
    let mut frac = frac.to_string();
    while frac.len() < decimals as usize {
        frac.insert(0, '0');
    }
    let frac = frac.trim_end_matches('0');
    format!("{}.{}", int, frac)
}

/// `raw * bps / 10_000`, truncating toward zero, without intermediate
/// overflow even at U256::MAX
pub fn apply_bps(raw: U256, bps: u64) -> U256 {
    let wide: U512 = raw.full_mul(U256::from(bps));
    let out = wide / U512::from(BPS_DENOMINATOR);
    // Quotient of (x * bps) / 10_000 with bps <= 10_000 always fits
    U256::try_from(out).unwrap_or(U256::MAX)
}

/// Percentage (whole percent, 0..=100) as basis points
pub fn pct_to_bps(pct: u32) -> u64 {
    pct as u64 * 100
}

/// Lossy conversion for display and USD-threshold comparisons only;
/// never used for on-chain arithmetic
pub fn to_f64_lossy(raw: U256, decimals: u8) -> f64 {
    // 2^128 token units is beyond any real balance; saturate rather than panic
    let scaled = raw.checked_div(pow10(decimals)).unwrap_or(U256::MAX);
    if scaled > U256::from(u128::MAX) {
        return f64::MAX;
    }
    let int = scaled.as_u128() as f64;
    let frac_raw = raw % pow10(decimals);
    let frac = frac_raw.as_u128() as f64 / 10f64.powi(decimals as i32);
    int + frac
}

fn pow10(exp: u8) -> U256 {
    U256::from(10u8).pow(U256::from(exp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_raw_basic() {
        assert_eq!(to_raw("1000.00", 6).unwrap(), U256::from(1_000_000_000u64));
        assert_eq!(to_raw("0.000001", 6).unwrap(), U256::from(1u64));
        assert_eq!(to_raw("1", 18).unwrap(), U256::from(10u64).pow(18.into()));
        assert_eq!(to_raw("0", 6).unwrap(), U256::zero());
        assert_eq!(to_raw(".5", 2).unwrap(), U256::from(50u64));
    }

    #[test]
    fn test_to_raw_rejects_garbage() {
        assert!(to_raw("-1", 6).is_err());
        assert!(to_raw("1.2345678", 6).is_err()); // too many decimals
        assert!(to_raw("abc", 6).is_err());
        assert!(to_raw("", 6).is_err());
        assert!(to_raw("1.2.3", 6).is_err());
    }

    #[test]
    fn test_format_raw() {
        assert_eq!(format_raw(U256::from(1_000_000_000u64), 6), "1000");
        assert_eq!(format_raw(U256::from(1_500_000u64), 6), "1.5");
        assert_eq!(format_raw(U256::from(1u64), 6), "0.000001");
        assert_eq!(format_raw(U256::zero(), 6), "0");
        assert_eq!(format_raw(U256::from(42u64), 0), "42");
    }

    // parse(format(toRaw(x, d), d), d) == toRaw(x, d)
    #[test]
    fn test_round_trip() {
        for (value, decimals) in [
            ("1000.00", 6u8),
            ("0.000001", 6),
            ("123456789.123456", 6),
            ("0.001", 18),
            ("7", 0),
            ("99999999999999999999.999999999999999999", 18),
        ] {
            let raw = to_raw(value, decimals).unwrap();
            let formatted = format_raw(raw, decimals);
            assert_eq!(to_raw(&formatted, decimals).unwrap(), raw, "{}", value);
        }
    }

    #[test]
    fn test_apply_bps() {
        // 20% of 1000 USDC
        let balance = U256::from(1_000_000_000u64);
        assert_eq!(apply_bps(balance, pct_to_bps(20)), U256::from(200_000_000u64));
        // truncation toward zero
        assert_eq!(apply_bps(U256::from(3u64), 5_000), U256::from(1u64));
        // no overflow at the top of the range
        assert_eq!(apply_bps(U256::MAX, BPS_DENOMINATOR), U256::MAX);
        assert_eq!(apply_bps(U256::zero(), 10_000), U256::zero());
    }

    #[test]
    fn test_to_f64_lossy() {
        let raw = U256::from(1_500_000u64);
        assert!((to_f64_lossy(raw, 6) - 1.5).abs() < 1e-9);
        assert!((to_f64_lossy(U256::from(5_000u64), 6) - 0.005).abs() < 1e-9);
    }
}
