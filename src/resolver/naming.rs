//! Naming cascade: deriving a usable file name when metadata is missing.
//!
//! Derivations are tried in a fixed order; the first non-empty,
//! non-placeholder result wins and a failed template is silently skipped.
//! The cascade never errors — the worst case is the host+timestamp last
//! resort, which always produces something.

use tracing::debug;

/// Encoded-byte budget for a resolved name, extension included.
pub const MAX_NAME_BYTES: usize = 200;

/// Longest extension (with dot) still treated as an extension when
/// truncating; anything longer is part of the stem.
const MAX_EXTENSION_BYTES: usize = 12;

/// Inputs to the naming cascade for one item or playlist entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NameSource<'a> {
    /// Primary title.
    pub title: Option<&'a str>,
    /// Alternate title.
    pub alt_title: Option<&'a str>,
    /// Uploader / channel name.
    pub uploader: Option<&'a str>,
    /// Backend-unique id.
    pub id: Option<&'a str>,
    /// Sequential position for playlist entries (1-based).
    pub index: Option<usize>,
    /// Source host for the last-resort name.
    pub host: Option<&'a str>,
    /// Timestamp for the last-resort name. Captured by the caller so the
    /// cascade itself stays deterministic for a given source.
    pub timestamp: u64,
}

/// Returns true for values that cannot serve as a display name.
#[must_use]
pub fn is_placeholder(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("na")
        || trimmed.eq_ignore_ascii_case("n/a")
        || trimmed.eq_ignore_ascii_case("none")
        || trimmed.eq_ignore_ascii_case("videoplayback")
}

/// Resolves a display name from the cascade:
/// full/alternate title → `{uploader}_{id}` → id-based → host+timestamp.
///
/// Deterministic for a given source, so resolving twice yields the same
/// string.
#[must_use]
pub fn resolve_display_name(source: &NameSource<'_>) -> String {
    let templates: [fn(&NameSource<'_>) -> Option<String>; 4] = [
        from_titles,
        from_uploader_id,
        from_id,
        |s| Some(last_resort(s)),
    ];
    for template in templates {
        match template(source) {
            Some(name) if !name.is_empty() => return name,
            Some(_) | None => {
                // Templating failures are swallowed; the next derivation is
                // tried.
                debug!("naming template produced no usable name; falling through");
            }
        }
    }
    last_resort(source)
}

fn from_titles(source: &NameSource<'_>) -> Option<String> {
    for candidate in [source.title, source.alt_title] {
        if let Some(value) = candidate {
            if !is_placeholder(value) {
                let cleaned = sanitize_component(value);
                if !cleaned.is_empty() {
                    return Some(cleaned);
                }
            }
        }
    }
    None
}

fn from_uploader_id(source: &NameSource<'_>) -> Option<String> {
    let uploader = source.uploader.filter(|v| !is_placeholder(v))?;
    let id = source.id.filter(|v| !is_placeholder(v))?;
    let uploader = sanitize_component(uploader);
    let id = sanitize_component(id);
    if uploader.is_empty() || id.is_empty() {
        return None;
    }
    Some(format!("{uploader}_{id}"))
}

fn from_id(source: &NameSource<'_>) -> Option<String> {
    let id = source.id.filter(|v| !is_placeholder(v))?;
    let id = sanitize_component(id);
    if id.is_empty() {
        return None;
    }
    Some(match source.index {
        Some(index) => format!("{index:03}_{id}"),
        None => id,
    })
}

/// Host+timestamp last resort; always yields a non-empty name.
fn last_resort(source: &NameSource<'_>) -> String {
    let host = source
        .host
        .map(|h| sanitize_component(&h.replace('.', "-")))
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "media".to_string());
    format!("{host}_{}", source.timestamp)
}

/// Maps filesystem-hostile characters to `_`, collapsing runs and trimming
/// leading/trailing separators.
#[must_use]
pub fn sanitize_component(value: &str) -> String {
    let mut out = String::new();
    let mut prev_sep = false;
    for ch in value.chars() {
        let mapped = match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\'' => '_',
            c if c.is_whitespace() || c.is_control() => '_',
            c if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') => c,
            _ => '_',
        };
        if mapped == '_' {
            if !prev_sep {
                out.push('_');
                prev_sep = true;
            }
        } else {
            out.push(mapped);
            prev_sep = false;
        }
    }
    out.trim_matches('_').to_string()
}

/// Splits `name` into (stem, extension-with-dot). The extension is empty when
/// absent or implausibly long.
#[must_use]
pub fn split_extension(name: &str) -> (&str, &str) {
    if let Some(dot) = name.rfind('.') {
        let ext = &name[dot..];
        if ext.len() > 1 && ext.len() <= MAX_EXTENSION_BYTES && dot > 0 {
            return (&name[..dot], ext);
        }
    }
    (name, "")
}

/// Truncates `name` to at most [`MAX_NAME_BYTES`] encoded bytes, keeping the
/// extension intact and cutting only the stem, on a char boundary.
#[must_use]
pub fn truncate_name(name: &str) -> String {
    if name.len() <= MAX_NAME_BYTES {
        return name.to_string();
    }
    let (stem, ext) = split_extension(name);
    let budget = MAX_NAME_BYTES.saturating_sub(ext.len());
    let mut cut = budget.min(stem.len());
    while cut > 0 && !stem.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}{}", &stem[..cut], ext)
}
