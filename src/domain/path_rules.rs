//! Naming rules for paths, tags, and filenames

use std::path::{Path, PathBuf};

/// Extensions longer than this are dropped from upload destinations.
pub const MAX_EXTENSION_LEN: usize = 16;

/// Escape character used in every LIKE pattern the registry builds.
pub const LIKE_ESCAPE: char = '\\';

/// Escape `%`, `_` and the escape character itself for use in LIKE patterns.
pub fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if c == '%' || c == '_' || c == LIKE_ESCAPE {
            out.push(LIKE_ESCAPE);
        }
        out.push(c);
    }
    out
}

/// LIKE pattern matching everything under a directory prefix.
pub fn like_prefix_pattern(prefix: &Path) -> String {
    let mut base = prefix.to_string_lossy().to_string();
    if !base.ends_with(std::path::MAIN_SEPARATOR) {
        base.push(std::path::MAIN_SEPARATOR);
    }
    format!("{}%", escape_like(&base))
}

/// Trim, lowercase and dedupe tags, preserving first-seen order. Empty
/// entries are dropped.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for tag in tags {
        let t = tag.as_ref().trim().to_lowercase();
        if !t.is_empty() && seen.insert(t.clone()) {
            out.push(t);
        }
    }
    out
}

/// Derive a reference name and automatic tags from a discovered path.
///
/// The name is the file stem; the tags are the root tag, the optional model
/// category, and every intermediate directory between the base and the file,
/// lowercased.
pub fn name_and_tags_from_path(
    abs_path: &Path,
    base: &Path,
    root_tag: &str,
    category: Option<&str>,
) -> (String, Vec<String>) {
    let name = abs_path
        .file_stem()
        .or_else(|| abs_path.file_name())
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "unnamed".to_string());

    let mut tags = vec![root_tag.to_string()];
    if let Some(category) = category {
        tags.push(category.to_string());
    }
    if let Ok(rel) = abs_path.strip_prefix(base) {
        if let Some(parent) = rel.parent() {
            for component in parent.components() {
                tags.push(component.as_os_str().to_string_lossy().to_string());
            }
        }
    }
    (name, normalize_tags(tags))
}

/// Path of a file relative to its base directory, used as the `filename`
/// metadata key. Falls back to the bare file name for foreign paths.
pub fn relative_filename(abs_path: &Path, bases: &[PathBuf]) -> Option<String> {
    for base in bases {
        if let Ok(rel) = abs_path.strip_prefix(base) {
            return Some(rel.to_string_lossy().to_string());
        }
    }
    abs_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
}

/// Extension (with leading dot) taken from a client-supplied filename,
/// dropped entirely when longer than [`MAX_EXTENSION_LEN`].
pub fn capped_extension(client_filename: &str) -> String {
    let name = Path::new(client_filename.trim())
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    match name.rfind('.') {
        Some(idx) if idx > 0 => {
            let ext = &name[idx..];
            if ext.len() > 1 && ext.len() <= MAX_EXTENSION_LEN {
                ext.to_string()
            } else {
                String::new()
            }
        }
        _ => String::new(),
    }
}

/// Pick a display name: the trimmed base name of the preferred input, or the
/// fallback when nothing usable remains.
pub fn sanitize_name(preferred: Option<&str>, fallback: &str) -> String {
    let candidate = preferred.map(str::trim).unwrap_or_default();
    let base = Path::new(candidate)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if base.is_empty() {
        fallback.to_string()
    } else {
        base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn like_escaping_covers_wildcards() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn tags_normalize_and_dedupe() {
        assert_eq!(
            normalize_tags(["Models", " loras ", "models", ""]),
            vec!["models".to_string(), "loras".to_string()]
        );
    }

    #[test]
    fn name_and_tags_for_model_path() {
        let (name, tags) = name_and_tags_from_path(
            Path::new("/m/loras/sdxl/detail.safetensors"),
            Path::new("/m/loras"),
            "models",
            Some("loras"),
        );
        assert_eq!(name, "detail");
        assert_eq!(tags, vec!["models", "loras", "sdxl"]);
    }

    #[test]
    fn name_and_tags_for_output_path() {
        let (name, tags) = name_and_tags_from_path(
            Path::new("/out/renders/final.png"),
            Path::new("/out"),
            "output",
            None,
        );
        assert_eq!(name, "final");
        assert_eq!(tags, vec!["output", "renders"]);
    }

    #[test]
    fn relative_filename_prefers_matching_base() {
        let bases = vec![PathBuf::from("/m/loras")];
        assert_eq!(
            relative_filename(Path::new("/m/loras/sdxl/a.bin"), &bases),
            Some("sdxl/a.bin".to_string())
        );
        assert_eq!(
            relative_filename(Path::new("/elsewhere/b.bin"), &bases),
            Some("b.bin".to_string())
        );
    }

    #[test]
    fn extension_is_capped() {
        assert_eq!(capped_extension("model.safetensors"), ".safetensors");
        assert_eq!(capped_extension("weird.aaaaaaaaaaaaaaaaaaaaaaa"), "");
        assert_eq!(capped_extension("noext"), "");
        assert_eq!(capped_extension(".hidden"), "");
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize_name(Some("  dir/evil.bin "), "fb"), "evil.bin");
        assert_eq!(sanitize_name(Some("   "), "fb"), "fb");
        assert_eq!(sanitize_name(None, "fb"), "fb");
    }
}
