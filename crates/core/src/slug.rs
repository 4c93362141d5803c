//! URL slug normalization.

/// Lower-cases `name`, keeps ASCII alphanumerics and joins every other run of
/// characters with a single `-`.
///
/// Returns an empty string when nothing usable remains.
#[must_use]
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    out
}

/// Appends a numeric suffix to a base slug: `intro` → `intro-2`.
#[must_use]
pub fn with_suffix(base: &str, n: u32) -> String {
    format!("{base}-{n}")
}
