//! `RDTMON_*` environment variable lookup
//!
//! Keys are given without the prefix: `env_get("RMID_POLICY", ..)` reads
//! `RDTMON_RMID_POLICY`.
//!
//! ```ignore
//! use rdtmon_core::env::{env_get, env_get_bool};
//!
//! let rmids: u32 = env_get("MAX_RMIDS", 64);
//! let reset = env_get_bool("RESET_ON_CSWITCH", false);
//! ```

use std::str::FromStr;

/// Prefix shared by every rdtmon variable
pub const ENV_PREFIX: &str = "RDTMON_";

/// Full variable name for a key
#[inline]
pub fn env_key(key: &str) -> String {
    format!("{}{}", ENV_PREFIX, key)
}

/// Variable parsed as `T`, or `default` when unset or unparsable
#[inline]
pub fn env_get<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    env_get_opt(key).unwrap_or(default)
}

/// Variable parsed as `T`, `None` when unset or unparsable
#[inline]
pub fn env_get_opt<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    std::env::var(env_key(key))
        .ok()
        .and_then(|v| v.trim().parse().ok())
}

/// Variable parsed with a custom parser (enums with names)
pub fn env_get_with<T>(key: &str, default: T, parse: impl Fn(&str) -> Option<T>) -> T {
    std::env::var(env_key(key))
        .ok()
        .and_then(|v| parse(&v))
        .unwrap_or(default)
}

/// Boolean variable: "1", "true", "yes", "on" are true, "0", "false",
/// "no", "off" are false, anything else keeps `default`
#[inline]
pub fn env_get_bool(key: &str, default: bool) -> bool {
    env_get_with(key, default, |v| match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_key() {
        assert_eq!(env_key("LOG_LEVEL"), "RDTMON_LOG_LEVEL");
    }

    #[test]
    fn test_unset_returns_default() {
        let val: u32 = env_get("__TEST_UNSET_12345__", 42);
        assert_eq!(val, 42);
        assert!(env_get_bool("__TEST_UNSET_12345__", true));
        assert!(env_get_opt::<u32>("__TEST_UNSET_12345__").is_none());
    }

    #[test]
    fn test_set_values() {
        std::env::set_var("RDTMON___TEST_NUM__", " 123 ");
        assert_eq!(env_get::<u32>("__TEST_NUM__", 0), 123);
        std::env::remove_var("RDTMON___TEST_NUM__");

        std::env::set_var("RDTMON___TEST_BAD__", "not_a_number");
        assert_eq!(env_get::<u32>("__TEST_BAD__", 99), 99);
        std::env::remove_var("RDTMON___TEST_BAD__");
    }

    #[test]
    fn test_bool_variants() {
        for (raw, expected) in [("1", true), ("YES", true), ("off", false), ("0", false)] {
            std::env::set_var("RDTMON___TEST_BOOL__", raw);
            assert_eq!(env_get_bool("__TEST_BOOL__", !expected), expected);
        }
        std::env::set_var("RDTMON___TEST_BOOL__", "garbage");
        assert!(env_get_bool("__TEST_BOOL__", true));
        std::env::remove_var("RDTMON___TEST_BOOL__");
    }

    #[test]
    fn test_custom_parser() {
        std::env::set_var("RDTMON___TEST_ENUM__", "b");
        let v = env_get_with("__TEST_ENUM__", 0u8, |s| match s {
            "a" => Some(1),
            "b" => Some(2),
            _ => None,
        });
        assert_eq!(v, 2);
        std::env::remove_var("RDTMON___TEST_ENUM__");
    }
}
