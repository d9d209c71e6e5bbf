//! Storage key derivation
//!
//! Keys are `{owner_id}/{filename}` so two users uploading the same filename
//! never touch each other's object or catalog row.

use uuid::Uuid;

/// Longest filename kept after sanitizing
pub const MAX_FILENAME_LEN: usize = 128;

/// Reduce a client-supplied filename to a safe single path segment.
///
/// Keeps the last path component, maps every run of characters outside
/// `[A-Za-z0-9._-]` to one `_`, strips leading dots and underscores and
/// truncates. Returns `None` when nothing usable is left.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let last = raw.rsplit(['/', '\\']).next().unwrap_or(raw);

    let mut cleaned = String::with_capacity(last.len());
    let mut in_run = false;
    for c in last.trim().chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            cleaned.push(c);
            in_run = false;
        } else if !in_run {
            cleaned.push('_');
            in_run = true;
        }
    }

    let cleaned = cleaned.trim_start_matches(['.', '_']);
    let cleaned: String = cleaned.chars().take(MAX_FILENAME_LEN).collect();

    if cleaned.is_empty() { None } else { Some(cleaned) }
}

/// Prefix shared by every key owned by `owner_id`
pub fn owner_prefix(owner_id: Uuid) -> String {
    format!("{}/", owner_id)
}

/// Storage key for an already sanitized filename
pub fn storage_key(owner_id: Uuid, filename: &str) -> String {
    format!("{}{}", owner_prefix(owner_id), filename)
}
