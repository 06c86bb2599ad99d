//! Environment variable parsing shared by the stage configs.

use thiserror::Error;

/// A required environment variable is missing or blank.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("required environment variable {name} is not set")]
pub struct MissingEnv {
    pub name: String,
}

/// Read a required variable, trimmed.
///
/// # Errors
///
/// Returns [`MissingEnv`] when the variable is unset or blank.
pub fn env_required(name: &str) -> Result<String, MissingEnv> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        _ => Err(MissingEnv {
            name: name.to_string(),
        }),
    }
}

/// Read an optional variable, trimmed; `None` when unset or blank.
#[must_use]
pub fn env_opt(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(v) => {
            let t = v.trim();
            if t.is_empty() { None } else { Some(t.to_string()) }
        }
        Err(_) => None,
    }
}

/// Read a boolean toggle. Accepts `1/true/yes/y/on` (case-insensitive);
/// anything else, including unset, yields `default`.
#[must_use]
pub fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "y" | "on"
        ),
        Err(_) => default,
    }
}

/// Read an integer; unset, blank, or unparseable yields `default`.
#[must_use]
pub fn env_int(name: &str, default: i64) -> i64 {
    env_opt(name)
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Process env is shared across the test binary; each test uses its own
    // variable name to stay independent.

    #[test]
    fn required_rejects_blank() {
        unsafe { std::env::set_var("KENSHIN_TEST_REQ_BLANK", "   ") };
        assert!(env_required("KENSHIN_TEST_REQ_BLANK").is_err());
        unsafe { std::env::set_var("KENSHIN_TEST_REQ_OK", " v ") };
        assert_eq!(env_required("KENSHIN_TEST_REQ_OK").unwrap(), "v");
    }

    #[test]
    fn bool_accepts_common_spellings() {
        for v in ["1", "true", "YES", "y", "On"] {
            unsafe { std::env::set_var("KENSHIN_TEST_BOOL", v) };
            assert!(env_bool("KENSHIN_TEST_BOOL", false), "value {v}");
        }
        unsafe { std::env::set_var("KENSHIN_TEST_BOOL", "off") };
        assert!(!env_bool("KENSHIN_TEST_BOOL", true));
        assert!(env_bool("KENSHIN_TEST_BOOL_UNSET", true));
    }

    #[test]
    fn int_falls_back_on_garbage() {
        unsafe { std::env::set_var("KENSHIN_TEST_INT", "12x") };
        assert_eq!(env_int("KENSHIN_TEST_INT", 7), 7);
        unsafe { std::env::set_var("KENSHIN_TEST_INT", " 42 ") };
        assert_eq!(env_int("KENSHIN_TEST_INT", 7), 42);
    }
}
