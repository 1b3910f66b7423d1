// src/validator.rs - Centralized validation and sanitization
use lazy_static::lazy_static;
use regex::Regex;
use validator::ValidationError;

lazy_static! {
    static ref RUT_REGEX: Regex = Regex::new(r"^(\d{1,2}\.?\d{3}\.?\d{3}|\d{7,8})-?[\dkK]$").unwrap();
    static ref PHONE_REGEX: Regex = Regex::new(r"^\+?[0-9][0-9 ()-]{7,18}$").unwrap();
    static ref HTML_TAG_REGEX: Regex = Regex::new(r"<[^>]*>").unwrap();
}

// ==================== FIELD VALIDATORS ====================

pub struct FieldValidator;

impl FieldValidator {
    /// Chilean RUT: body digits plus a modulo-11 check digit (`0-9` or `K`).
    pub fn rut(value: &str) -> Result<(), String> {
        let trimmed = value.trim();
        if !RUT_REGEX.is_match(trimmed) {
            return Err("Invalid RUT format (expected: 12345678-5)".to_string());
        }

        let (body, check) = split_rut(trimmed);
        let expected = rut_check_digit(&body);
        if expected != check {
            return Err("Invalid RUT (check digit mismatch)".to_string());
        }

        Ok(())
    }

    pub fn phone(value: &str) -> Result<(), String> {
        let digits = value.chars().filter(|c| c.is_ascii_digit()).count();
        if !PHONE_REGEX.is_match(value.trim()) || !(8..=15).contains(&digits) {
            return Err("Invalid phone number".to_string());
        }
        Ok(())
    }
}

fn split_rut(value: &str) -> (String, char) {
    let clean: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let mut chars = clean.chars();
    let check = chars.next_back().unwrap_or('0');
    (chars.collect(), check)
}

pub fn rut_check_digit(body: &str) -> char {
    let mut sum = 0u32;
    let mut factor = 2u32;
    for digit in body.chars().rev().filter_map(|c| c.to_digit(10)) {
        sum += digit * factor;
        factor = if factor == 7 { 2 } else { factor + 1 };
    }
    match 11 - (sum % 11) {
        11 => '0',
        10 => 'K',
        d => char::from_digit(d, 10).unwrap_or('0'),
    }
}

/// Canonical storage form: `12345678-5`, no dots, uppercase K.
pub fn normalize_rut(value: &str) -> String {
    let (body, check) = split_rut(value);
    format!("{}-{}", body.trim_start_matches('0'), check)
}

// ==================== DERIVE HOOKS ====================

pub fn validate_rut(value: &str) -> Result<(), ValidationError> {
    FieldValidator::rut(value).map_err(|msg| {
        let mut error = ValidationError::new("invalid_rut");
        error.message = Some(msg.into());
        error
    })
}

pub fn validate_phone(value: &str) -> Result<(), ValidationError> {
    FieldValidator::phone(value).map_err(|msg| {
        let mut error = ValidationError::new("invalid_phone");
        error.message = Some(msg.into());
        error
    })
}

/// Builds a validator hook rejecting anything outside `allowed`.
pub fn one_of(value: &str, allowed: &[&str], code: &'static str) -> Result<(), ValidationError> {
    if allowed.contains(&value) {
        Ok(())
    } else {
        let mut error = ValidationError::new(code);
        error.message = Some(format!("Must be one of: {}", allowed.join(", ")).into());
        Err(error)
    }
}

// ==================== SANITIZATION ====================

/// Cleans user supplied strings before validation runs.
pub trait Sanitize {
    fn sanitize(&mut self);
}

pub fn sanitize_text(value: &str) -> String {
    let without_tags = HTML_TAG_REGEX.replace_all(value, "");
    without_tags
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn sanitize_string(value: &mut String) {
    *value = sanitize_text(value);
}

/// Empty strings collapse to `None` so optional columns stay NULL.
pub fn sanitize_option(value: &mut Option<String>) {
    if let Some(inner) = value.take() {
        let clean = sanitize_text(&inner);
        if !clean.is_empty() {
            *value = Some(clean);
        }
    }
}

/// Implements [`Sanitize`] for a request struct from its string fields.
#[macro_export]
macro_rules! impl_sanitize {
    ($ty:ty { $($field:ident),* $(,)? } optional { $($opt:ident),* $(,)? }) => {
        impl $crate::validator::Sanitize for $ty {
            fn sanitize(&mut self) {
                $( $crate::validator::sanitize_string(&mut self.$field); )*
                $( $crate::validator::sanitize_option(&mut self.$opt); )*
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rut_check_digit() {
        assert_eq!(rut_check_digit("12345678"), '5');
        assert_eq!(rut_check_digit("11111111"), '1');
        assert_eq!(rut_check_digit("10000013"), 'K');
    }

    #[test]
    fn test_rut_formats() {
        assert!(FieldValidator::rut("12345678-5").is_ok());
        assert!(FieldValidator::rut("12.345.678-5").is_ok());
        assert!(FieldValidator::rut("123456785").is_ok());
        assert!(FieldValidator::rut("10000013-k").is_ok());
        assert!(FieldValidator::rut("12345678-9").is_err());
        assert!(FieldValidator::rut("abc").is_err());
        assert!(FieldValidator::rut("").is_err());
    }

    #[test]
    fn test_normalize_rut() {
        assert_eq!(normalize_rut("12.345.678-5"), "12345678-5");
        assert_eq!(normalize_rut("10000013-k"), "10000013-K");
        assert_eq!(normalize_rut("123456785"), "12345678-5");
    }

    #[test]
    fn test_phone() {
        assert!(FieldValidator::phone("+56 9 1234 5678").is_ok());
        assert!(FieldValidator::phone("912345678").is_ok());
        assert!(FieldValidator::phone("12345").is_err());
        assert!(FieldValidator::phone("call me").is_err());
    }

    #[test]
    fn test_sanitize_text() {
        assert_eq!(sanitize_text("  Juan <script>alert(1)</script>Pérez "), "Juan alert(1)Pérez");
        assert_eq!(sanitize_text("line\u{0007}one\nline two"), "lineone\nline two");
    }

    #[test]
    fn test_sanitize_option_collapses_blank() {
        let mut value = Some("   ".to_string());
        sanitize_option(&mut value);
        assert_eq!(value, None);

        let mut value = Some(" <b>ok</b> ".to_string());
        sanitize_option(&mut value);
        assert_eq!(value.as_deref(), Some("ok"));
    }

    #[test]
    fn test_one_of() {
        assert!(one_of("alta", &["baja", "media", "alta"], "invalid_priority").is_ok());
        let err = one_of("urgente", &["baja", "media", "alta"], "invalid_priority").unwrap_err();
        assert_eq!(err.code, "invalid_priority");
    }
}
