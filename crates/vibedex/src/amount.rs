use crate::errors::VibeError;
use alloy::primitives::U256;

/// Parse a user-entered decimal string (e.g. `"1.5"`) into base units.
///
/// Pure integer arithmetic; no floats anywhere near amounts.
pub fn parse_decimal_to_base(s: &str, decimals: u8) -> Result<U256, VibeError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(VibeError::InvalidAmount("empty amount".to_owned()));
    }
    if s.starts_with('-') || s.starts_with('+') {
        return Err(VibeError::InvalidAmount(format!(
            "amount must be an unsigned decimal: {s}"
        )));
    }

    let (whole, frac) = match s.split_once('.') {
        Some((a, b)) => (a, b),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(VibeError::InvalidAmount("empty amount".to_owned()));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(VibeError::InvalidAmount(format!("not a number: {s}")));
    }
    if frac.len() > decimals as usize {
        return Err(VibeError::InvalidAmount(format!(
            "too many decimal places for token (decimals={decimals})"
        )));
    }

    let whole_v = if whole.is_empty() {
        U256::ZERO
    } else {
        whole
            .parse::<U256>()
            .map_err(|e| VibeError::InvalidAmount(format!("parse whole part: {e}")))?
    };

    let mut frac_s = frac.to_owned();
    while frac_s.len() < decimals as usize {
        frac_s.push('0');
    }
    let frac_v = if frac_s.is_empty() {
        U256::ZERO
    } else {
        frac_s
            .parse::<U256>()
            .map_err(|e| VibeError::InvalidAmount(format!("parse fractional part: {e}")))?
    };

    let scale = U256::from(10_u64)
        .checked_pow(U256::from(u64::from(decimals)))
        .ok_or_else(|| VibeError::InvalidAmount("decimals too large".to_owned()))?;

    whole_v
        .checked_mul(scale)
        .and_then(|x| x.checked_add(frac_v))
        .ok_or_else(|| VibeError::InvalidAmount("amount overflow".to_owned()))
}

/// Like [`parse_decimal_to_base`] but additionally rejects zero.
///
/// Swap inputs must be strictly positive before any network call is made.
pub fn parse_positive_to_base(s: &str, decimals: u8) -> Result<U256, VibeError> {
    let v = parse_decimal_to_base(s, decimals)?;
    if v.is_zero() {
        return Err(VibeError::InvalidAmount(
            "amount must be greater than zero".to_owned(),
        ));
    }
    Ok(v)
}

/// Format a base-unit amount as a decimal string without using floats.
///
/// Examples: base=1500000 decimals=6 => "1.5"; base=1 decimals=6 => "0.000001".
pub fn format_base_to_decimal(base: U256, decimals: u8) -> String {
    if decimals == 0 {
        return base.to_string();
    }
    let scale = U256::from(10_u64).pow(U256::from(u64::from(decimals)));
    let whole = base / scale;
    let frac = base % scale;
    if frac.is_zero() {
        return whole.to_string();
    }
    let mut frac_s = format!("{frac}");
    while frac_s.len() < decimals as usize {
        frac_s.insert(0, '0');
    }
    while frac_s.ends_with('0') {
        frac_s.pop();
    }
    format!("{whole}.{frac_s}")
}
