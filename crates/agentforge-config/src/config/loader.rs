//! Centralized environment variable loading.
//!
//! Keeps the primary/alias fallback chain in one place so business code never
//! repeats an `or_else` chain itself.

use std::env;

/// Load the current directory's `.env` into the process environment (does
/// not override variables that are already set).
pub fn load_dotenv() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let path = env::current_dir()
            .map(|d| d.join(".env"))
            .unwrap_or_else(|_| std::path::PathBuf::from(".env"));
        if let Ok(content) = std::fs::read_to_string(&path) {
            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some(eq_pos) = line.find('=') {
                    let key = line[..eq_pos].trim();
                    let mut value = line[eq_pos + 1..].trim();
                    // Strip inline comment (# not inside quotes)
                    if let Some(hash_pos) = value.find('#') {
                        let before_hash = value[..hash_pos].trim_end();
                        if !before_hash.contains('"') && !before_hash.contains('\'') {
                            value = before_hash;
                        }
                    }
                    if (value.starts_with('"') && value.ends_with('"'))
                        || (value.starts_with('\'') && value.ends_with('\''))
                    {
                        value = &value[1..value.len() - 1];
                    }
                    if !key.is_empty() && env::var(key).is_err() {
                        #[allow(unsafe_code)]
                        unsafe {
                            env::set_var(key, value);
                        }
                    }
                }
            }
        }
    });
}

/// Log a one-time warning when `alias` supplied a value that `primary` didn't
/// (SPEC_FULL.md §6 EXPANSION: "a one-time startup warning is logged when a
/// deprecated name is in use without its replacement"). Keyed per alias name
/// so each deprecated variable warns exactly once per process, not once per
/// call site.
fn warn_deprecated_alias_once(alias: &str, primary: &str) {
    use std::collections::HashSet;
    use std::sync::{Mutex, OnceLock};
    static WARNED: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
    let warned = WARNED.get_or_init(|| Mutex::new(HashSet::new()));
    let mut warned = warned.lock().expect("warned-alias lock is never held across a panic");
    if warned.insert(alias.to_string()) {
        tracing::warn!(
            deprecated_var = alias,
            recommended_var = primary,
            "{alias} is deprecated; set {primary} instead"
        );
    }
}

/// Read `primary`, falling back through `aliases` in order, else `default()`.
/// Warns once if the value came from an alias.
pub fn env_or<F>(primary: &str, aliases: &[&str], default: F) -> String
where
    F: FnOnce() -> String,
{
    if let Ok(v) = env::var(primary) {
        if !v.is_empty() {
            return v;
        }
    }
    for alias in aliases {
        if let Ok(v) = env::var(alias) {
            if !v.is_empty() {
                warn_deprecated_alias_once(alias, primary);
                return v;
            }
        }
    }
    default()
}

/// Read `primary`/`aliases` as `env_or` does, returning `None` if neither is
/// set (empty values count as unset).
pub fn env_optional(primary: &str, aliases: &[&str]) -> Option<String> {
    if let Ok(v) = env::var(primary) {
        let v = v.trim().to_string();
        if !v.is_empty() {
            return Some(v);
        }
    }
    for alias in aliases {
        if let Ok(v) = env::var(alias) {
            let v = v.trim().to_string();
            if !v.is_empty() {
                warn_deprecated_alias_once(alias, primary);
                return Some(v);
            }
        }
    }
    None
}

/// Parse a boolean env var: `1`/`true`/`yes` (case-insensitive, or anything
/// not in the false set) is true; `0`/`false`/`no`/`off` is false.
pub fn env_bool(primary: &str, aliases: &[&str], default: bool) -> bool {
    let mut found = env::var(primary).ok();
    if found.is_none() {
        for alias in aliases {
            if let Ok(v) = env::var(alias) {
                warn_deprecated_alias_once(alias, primary);
                found = Some(v);
                break;
            }
        }
    }
    match found.as_deref() {
        Some(s) => !matches!(
            s.trim().to_lowercase().as_str(),
            "0" | "false" | "no" | "off"
        ),
        None => default,
    }
}

/// Parse an integer env var, falling back to `default` on absence or a parse failure.
pub fn env_u64(primary: &str, aliases: &[&str], default: u64) -> u64 {
    let mut found = env::var(primary).ok();
    if found.is_none() {
        for alias in aliases {
            if let Ok(v) = env::var(alias) {
                warn_deprecated_alias_once(alias, primary);
                found = Some(v);
                break;
            }
        }
    }
    found
        .and_then(|s| s.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    struct EnvGuard(&'static str);
    impl Drop for EnvGuard {
        fn drop(&mut self) {
            #[allow(unsafe_code)]
            unsafe {
                env::remove_var(self.0);
            }
        }
    }
    fn set(key: &'static str, value: &str) -> EnvGuard {
        #[allow(unsafe_code)]
        unsafe {
            env::set_var(key, value);
        }
        EnvGuard(key)
    }

    #[test]
    fn env_or_prefers_primary_over_alias() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _primary = set("LOADER_TEST_OR_PRIMARY", "primary-value");
        let _alias = set("LOADER_TEST_OR_ALIAS", "alias-value");
        let v = env_or("LOADER_TEST_OR_PRIMARY", &["LOADER_TEST_OR_ALIAS"], || "default".to_string());
        assert_eq!(v, "primary-value");
    }

    #[test]
    fn env_or_falls_back_to_alias_then_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        #[allow(unsafe_code)]
        unsafe {
            env::remove_var("LOADER_TEST_FALLBACK_PRIMARY");
            env::remove_var("LOADER_TEST_FALLBACK_ALIAS");
        }
        assert_eq!(
            env_or("LOADER_TEST_FALLBACK_PRIMARY", &["LOADER_TEST_FALLBACK_ALIAS"], || "default".to_string()),
            "default"
        );

        let _alias = set("LOADER_TEST_FALLBACK_ALIAS", "alias-value");
        assert_eq!(
            env_or("LOADER_TEST_FALLBACK_PRIMARY", &["LOADER_TEST_FALLBACK_ALIAS"], || "default".to_string()),
            "alias-value"
        );
    }

    #[test]
    fn env_bool_parses_falsey_strings() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _g = set("LOADER_TEST_BOOL", "off");
        assert!(!env_bool("LOADER_TEST_BOOL", &[], true));
    }

    #[test]
    fn env_u64_falls_back_on_unparsable_value() {
        let _lock = ENV_LOCK.lock().unwrap();
        let _g = set("LOADER_TEST_U64", "not-a-number");
        assert_eq!(env_u64("LOADER_TEST_U64", &[], 42), 42);
    }

    #[test]
    fn deprecated_alias_warns_only_once() {
        let _lock = ENV_LOCK.lock().unwrap();
        #[allow(unsafe_code)]
        unsafe {
            env::remove_var("LOADER_TEST_WARN_ONCE_PRIMARY");
        }
        let _alias = set("LOADER_TEST_WARN_ONCE_ALIAS", "v");
        // Exercised twice; the `Once`-style dedup is only directly observable
        // via tracing output, so this just checks the value still resolves
        // correctly on repeated calls.
        assert_eq!(env_or("LOADER_TEST_WARN_ONCE_PRIMARY", &["LOADER_TEST_WARN_ONCE_ALIAS"], || "default".to_string()), "v");
        assert_eq!(env_or("LOADER_TEST_WARN_ONCE_PRIMARY", &["LOADER_TEST_WARN_ONCE_ALIAS"], || "default".to_string()), "v");
    }
}
