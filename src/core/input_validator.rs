//! Input validation for request bodies and query strings.
//!
//! Walks a JSON document and refuses oversized strings, oversized arrays and
//! content matching one of the configured blocked patterns. Object keys are
//! checked like any other string.

use log::error;
use regex::{Regex, RegexBuilder};
use serde_json::Value;
use thiserror::Error;
use crate::models::InputConfig;

/// Why a request's input was refused
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InputError {
    #[error("String length exceeds maximum of {0} characters")]
    StringTooLong(usize),
    #[error("Array length exceeds maximum of {0} items")]
    ArrayTooLong(usize),
    #[error("Input contains potentially dangerous content")]
    BlockedContent,
}

pub struct InputValidator {
    config: InputConfig,
    blocked: Vec<Regex>,
}

impl InputValidator {
    pub fn new(config: InputConfig) -> Self {
        let blocked = config
            .blocked_patterns
            .iter()
            .filter_map(|pattern| match RegexBuilder::new(pattern).case_insensitive(true).build() {
                Ok(regex) => Some(regex),
                Err(e) => {
                    error!("Invalid blocked input pattern {}: {}", pattern, e);
                    None
                }
            })
            .collect();
        Self { config, blocked }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn validate_str(&self, input: &str) -> Result<(), InputError> {
        if input.chars().count() > self.config.max_string_length {
            return Err(InputError::StringTooLong(self.config.max_string_length));
        }
        if self.blocked.iter().any(|pattern| pattern.is_match(input)) {
            return Err(InputError::BlockedContent);
        }
        Ok(())
    }

    /// Check every string and array in `value`
    pub fn validate(&self, value: &Value) -> Result<(), InputError> {
        match value {
            Value::String(s) => self.validate_str(s),
            Value::Array(items) => {
                if items.len() > self.config.max_array_length {
                    return Err(InputError::ArrayTooLong(self.config.max_array_length));
                }
                items.iter().try_for_each(|item| self.validate(item))
            }
            Value::Object(map) => map.iter().try_for_each(|(key, value)| {
                self.validate_str(key)?;
                self.validate(value)
            }),
            Value::Null | Value::Bool(_) | Value::Number(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> InputValidator {
        InputValidator::new(InputConfig::default())
    }

    #[test]
    fn test_clean_input_passes() {
        let body = json!({
            "title": "Shared bike racks",
            "tags": ["transport", "city"],
            "votes": 12,
            "draft": false,
            "meta": { "category": null }
        });
        assert_eq!(validator().validate(&body), Ok(()));
    }

    #[test]
    fn test_blocked_patterns() {
        let validator = validator();
        for content in [
            "<SCRIPT>alert(1)</script>",
            "JavaScript:void(0)",
            "<img src=x onerror=alert(1)>",
            "data:text/html;base64,PHN2Zz4=",
            "vbscript:msgbox",
        ] {
            assert_eq!(validator.validate(&json!({ "content": content })), Err(InputError::BlockedContent), "{}", content);
        }
        assert_eq!(validator.validate(&json!({ "onclick =": "x" })), Err(InputError::BlockedContent));
    }

    #[test]
    fn test_length_limits() {
        let validator = validator();
        assert_eq!(validator.validate(&json!("é".repeat(5000))), Ok(()));
        assert_eq!(validator.validate(&json!({ "bio": "a".repeat(5001) })), Err(InputError::StringTooLong(5000)));

        let items: Vec<u32> = (0..51).collect();
        assert_eq!(validator.validate(&json!({ "ids": items })), Err(InputError::ArrayTooLong(50)));
        assert_eq!(
            InputError::ArrayTooLong(50).to_string(),
            "Array length exceeds maximum of 50 items"
        );
    }

    #[test]
    fn test_nested_values_are_checked() {
        let body = json!({ "idea": { "links": [{ "href": "javascript:alert(1)" }] } });
        assert_eq!(validator().validate(&body), Err(InputError::BlockedContent));
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let validator = InputValidator::new(InputConfig {
            blocked_patterns: vec!["(".to_string(), "vbscript:".to_string()],
            ..InputConfig::default()
        });
        assert_eq!(validator.validate(&json!("vbscript:x")), Err(InputError::BlockedContent));
        assert_eq!(validator.validate(&json!("(")), Ok(()));
    }
}
