//! Stable source identity keys
//!
//! Platform device ids are not stable across OS versions or reboots, so a
//! source is identified by its kind plus a normalized form of its label. The
//! key is the join between re-enumerations and the stream name declared to
//! the hub, so the algorithm must not drift.

use super::source::MediaKind;

/// Locale variants of the "default device" prefix some platforms put in
/// front of the default microphone's label.
const DEFAULT_AUDIO_PREFIXES: &[&str] = &[
    "default",
    "standard",
    "par défaut",
    "predeterminado",
    "predefinito",
    "padrão",
    "по умолчанию",
    "既定",
    "默认",
    "預設",
    "기본값",
];

/// Characters that may separate the default prefix from the real label
const PREFIX_SEPARATORS: &[char] = &['-', '–', '—', ':', '：'];

/// Derive the identity key for a device of `kind` labelled `label`.
///
/// `identity_key(MediaKind::Video, "Cam1")` is `"video-cam1"`. Audio labels
/// have a leading default-device prefix removed first, so the default
/// microphone keeps its key when the user changes the system default.
pub fn identity_key(kind: MediaKind, label: &str) -> String {
    let normalized = normalize_label(kind, label);
    let slug = slugify(normalized);
    if slug.is_empty() {
        format!("{}-device", kind)
    } else {
        format!("{}-{}", kind, slug)
    }
}

/// Trim a label and, for audio, strip the default-device prefix.
pub fn normalize_label(kind: MediaKind, label: &str) -> &str {
    let label = label.trim();
    if kind != MediaKind::Audio {
        return label;
    }

    for prefix in DEFAULT_AUDIO_PREFIXES {
        if let Some(rest) = strip_prefix_ignore_case(label, prefix) {
            if !rest.starts_with(|c: char| c.is_whitespace() || PREFIX_SEPARATORS.contains(&c)) {
                continue;
            }
            let rest = rest.trim_start_matches(|c: char| {
                c.is_whitespace() || PREFIX_SEPARATORS.contains(&c)
            });
            if !rest.is_empty() {
                return rest;
            }
        }
    }

    label
}

/// Lowercase, keep alphanumerics, collapse every other run into one `-`.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_dash = false;

    for c in s.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }

    out
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let mut chars = s.char_indices();
    for p in prefix.chars() {
        let (_, c) = chars.next()?;
        if !c.to_lowercase().eq(p.to_lowercase()) {
            return None;
        }
    }
    let idx = chars.next().map(|(i, _)| i).unwrap_or(s.len());
    Some(&s[idx..])
}
