use core::fmt::Write;

/// Render nibbles as one hex digit each.
pub fn nibble_string(nibbles: &[u8]) -> String {
    nibbles.iter().fold(String::with_capacity(nibbles.len()), |mut s, n| {
        let _ = write!(s, "{:x}", n & 0xf);
        s
    })
}

/// Split bytes into nibbles, high nibble first.
pub fn to_nibbles(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().flat_map(|b| [b >> 4, b & 0xf]).collect()
}

/// Parse an integer the way C's `%i` conversion does: optional sign, then `0x` hex, leading `0`
/// octal or plain decimal.
pub fn parse_int(token: &str) -> Option<i64> {
    let (negative, digits) = match token.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, token.strip_prefix('+').unwrap_or(token)),
    };
    let value = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()?
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8).ok()?
    } else {
        digits.parse::<i64>().ok()?
    };
    Some(if negative { -value } else { value })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c_integer_syntax() {
        assert_eq!(parse_int("12"), Some(12));
        assert_eq!(parse_int("0x1f"), Some(31));
        assert_eq!(parse_int("017"), Some(15));
        assert_eq!(parse_int("0"), Some(0));
        assert_eq!(parse_int("-3"), Some(-3));
        assert_eq!(parse_int("cmd"), None);
        assert_eq!(parse_int("09"), None);
    }

    #[test]
    fn nibble_helpers() {
        assert_eq!(to_nibbles(&[0xa5, 0x0f]), vec![0xa, 0x5, 0x0, 0xf]);
        assert_eq!(nibble_string(&[0xa, 0x5, 0x1f]), "a5f");
    }
}
