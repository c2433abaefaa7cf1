//! Kubernetes resource quantities
//!
//! Parses the quantity grammar (`500m`, `1.5Gi`, `2e3`) into an exact amount
//! of nano-units, so that spellings the API server canonicalizes (`1000m` and
//! `1`, `1024Mi` and `1Gi`) compare equal.

const NANO: i128 = 1_000_000_000;

/// A parsed quantity, in nano-units
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParsedQuantity(i128);

impl ParsedQuantity {
    /// Parse a quantity string; `None` if it is not valid quantity syntax
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (negative, body) = match raw.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, raw.strip_prefix('+').unwrap_or(raw)),
        };

        let number_len = body
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(body.len());
        let (number, suffix) = body.split_at(number_len);
        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return None;
        }
        if !frac_part.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }

        let mantissa: i128 = format!("{int_part}{frac_part}").parse().ok()?;
        let mut scale_down = u32::try_from(frac_part.len()).ok()?;

        let value = match exponent(suffix) {
            Some(exp) if exp >= 0 => {
                let factor = 10i128.checked_pow(exp.unsigned_abs())?;
                mantissa.checked_mul(NANO)?.checked_mul(factor)?
            }
            Some(exp) => {
                scale_down = scale_down.checked_add(exp.unsigned_abs())?;
                mantissa.checked_mul(NANO)?
            }
            None => mantissa.checked_mul(suffix_nanos(suffix)?)?,
        };

        let divisor = 10i128.checked_pow(scale_down)?;
        // sub-nano remainders round up
        let nanos = (value + divisor - 1) / divisor;
        Some(Self(if negative { -nanos } else { nanos }))
    }

    pub fn nanos(&self) -> i128 {
        self.0
    }
}

/// Decimal exponent form (`e3`, `E-2`); a bare `E` is the exa suffix
fn exponent(suffix: &str) -> Option<i32> {
    let digits = suffix.strip_prefix(['e', 'E'])?;
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

fn suffix_nanos(suffix: &str) -> Option<i128> {
    let decimal = |power: u32| NANO * 10i128.pow(power);
    let binary = |shift: u32| NANO << shift;
    Some(match suffix {
        "n" => 1,
        "u" => 1_000,
        "m" => 1_000_000,
        "" => NANO,
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        "Ki" => binary(10),
        "Mi" => binary(20),
        "Gi" => binary(30),
        "Ti" => binary(40),
        "Pi" => binary(50),
        "Ei" => binary(60),
        _ => return None,
    })
}

/// Whether two quantity strings denote the same amount
pub fn quantities_equal(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (ParsedQuantity::parse(a), ParsedQuantity::parse(b)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_spellings_are_equal() {
        assert!(quantities_equal("1000m", "1"));
        assert!(quantities_equal("1024Mi", "1Gi"));
        assert!(quantities_equal("0.5", "500m"));
        assert!(quantities_equal("1e3", "1k"));
        assert!(quantities_equal("1.5Gi", "1536Mi"));
        assert!(!quantities_equal("1", "1Ki"));
        assert!(!quantities_equal("100m", "1"));
    }

    #[test]
    fn test_parse() {
        assert_eq!(ParsedQuantity::parse("250m").unwrap().nanos(), 250_000_000);
        assert_eq!(ParsedQuantity::parse("1Ki").unwrap().nanos(), 1024 * NANO);
        assert_eq!(ParsedQuantity::parse("2E").unwrap().nanos(), 2 * NANO * 10i128.pow(18));
        assert_eq!(ParsedQuantity::parse("-1").unwrap().nanos(), -NANO);
        assert_eq!(ParsedQuantity::parse("1.5n").unwrap().nanos(), 2);
        assert!(ParsedQuantity::parse("").is_none());
        assert!(ParsedQuantity::parse("abc").is_none());
        assert!(ParsedQuantity::parse("1.2.3").is_none());
        assert!(ParsedQuantity::parse("12Xi").is_none());
    }
}
