// 💰 Money helpers - rounding and lenient amount parsing

/// Round to 2 decimal places (half away from zero)
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

const CURRENCY_TOKENS: &[&str] = &["INR", "USD", "EUR", "GBP", "RS.", "RS", "₹", "$", "€", "£"];

/// Parse a human-written amount
///
/// Accepts "1,234.50", "₹ 99", "Rs. 45.00", "$12", "12.5 USD", "-3.20", "(3.20)"
/// and rejects anything that doesn't reduce to a finite number.
pub fn parse_amount(raw: &str) -> Result<f64, String> {
    let mut s = raw.trim().to_uppercase();
    if s.is_empty() {
        return Err("Empty amount".to_string());
    }

    let mut negative = false;
    if s.starts_with('(') && s.ends_with(')') {
        negative = true;
        s = s[1..s.len() - 1].to_string();
    }

    // Strip currency tokens wherever they appear (prefix or suffix)
    for token in CURRENCY_TOKENS {
        s = s.replace(token, "");
    }

    let mut cleaned: String = s
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .collect();

    if let Some(rest) = cleaned.strip_prefix('-') {
        negative = !negative;
        cleaned = rest.to_string();
    } else if let Some(rest) = cleaned.strip_suffix('-') {
        negative = !negative;
        cleaned = rest.to_string();
    }

    if cleaned.is_empty() {
        return Err(format!("Not a number: {raw:?}"));
    }

    let value: f64 = cleaned
        .parse()
        .map_err(|_| format!("Not a number: {raw:?}"))?;

    if !value.is_finite() {
        return Err(format!("Not a finite number: {raw:?}"));
    }

    Ok(if negative { -value } else { value })
}
