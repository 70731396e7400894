/// Reduce a subscriber number to its national significant digits.
///
/// Spaces, dashes and parentheses are dropped, then a `+62`/`62` country
/// prefix and a single trunk `0` are stripped, so `0812-3456 789`,
/// `+62 812 3456 789` and `628123456789` all map to `8123456789`.
pub fn normalize_phone(phone: &str) -> String {
    let cleaned: String = phone
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
        .collect();

    let national = cleaned
        .strip_prefix("+62")
        .or_else(|| cleaned.strip_prefix("62"))
        .unwrap_or(&cleaned);

    national.strip_prefix('0').unwrap_or(national).to_string()
}

/// The `62…` form the vendor expects on purchase requests
pub fn phone_with_country_code(phone: &str) -> String {
    format!("62{}", normalize_phone(phone))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_phone() {
        assert_eq!(normalize_phone("08123456789"), "8123456789");
        assert_eq!(normalize_phone("+62 812-3456-789"), "8123456789");
        assert_eq!(normalize_phone("628123456789"), "8123456789");
        assert_eq!(normalize_phone("(0812) 3456 789"), "8123456789");
        assert_eq!(normalize_phone("8123456789"), "8123456789");
    }

    #[test]
    fn test_phone_with_country_code() {
        assert_eq!(phone_with_country_code("0812 3456 789"), "628123456789");
        assert_eq!(phone_with_country_code("+628123456789"), "628123456789");
    }
}
