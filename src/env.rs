//! Settings read from environment variables.

use std::path::PathBuf;

/// Directory to load workload templates from instead of the embedded ones.
pub const TEMPLATE_DIR_VAR: &str = "LOOPSPEC_TEMPLATE_DIR";

/// Flag which selects fused translation mode by default.
pub const FUSED_VAR: &str = "LOOPSPEC_FUSED";

/// Interpret a string value such as "1" or "no" as a boolean.
///
/// Returns `None` if the value is not recognized.
pub fn str_as_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

/// Return whether a feature flag controlled by an environment variable is
/// enabled.
///
/// Unset variables and unrecognized values yield `default`.
pub fn env_flag(name: &str, default: bool) -> bool {
    let Ok(value) = std::env::var(name) else {
        return default;
    };
    str_as_bool(&value).unwrap_or_else(|| {
        log::warn!("unrecognized boolean value \"{}\" for {}", value, name);
        default
    })
}

/// Return the template directory set via `LOOPSPEC_TEMPLATE_DIR`, if any.
///
/// An empty value is treated as unset.
pub fn template_dir() -> Option<PathBuf> {
    std::env::var_os(TEMPLATE_DIR_VAR)
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
}

/// Return whether `LOOPSPEC_FUSED` selects fused mode.
pub fn fused_by_default() -> bool {
    env_flag(FUSED_VAR, false)
}
