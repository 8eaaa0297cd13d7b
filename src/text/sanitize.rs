//! Filename and identifier sanitization.

/// Maximum length of a sanitized path component, in characters.
const MAX_COMPONENT_LEN: usize = 100;

/// Sanitize a podcast or episode name into a safe path component.
///
/// Keeps alphanumerics, dashes and underscores; whitespace and every other
/// character collapse to a single underscore. The result is truncated to
/// [`MAX_COMPONENT_LEN`] characters and never empty.
pub fn sanitize_component(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for ch in name.chars() {
        if ch.is_alphanumeric() || ch == '-' {
            out.push(ch);
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.chars().count() > MAX_COMPONENT_LEN {
        out = out.chars().take(MAX_COMPONENT_LEN).collect();
    }
    if out.is_empty() {
        out.push_str("untitled");
    }
    out
}

/// Lowercase slug for theme node ids: alphanumeric runs joined by `_`.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            out.push('_');
            last_was_sep = true;
        }
    }
    while out.ends_with('_') {
        out.pop();
    }
    if out.is_empty() {
        out.push_str("theme");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn component_strips_punctuation() {
        assert_eq!(sanitize_component("My Podcast: Ep. #42!"), "My_Podcast_Ep_42");
        assert_eq!(sanitize_component("///"), "untitled");
        assert_eq!(sanitize_component("clean-name"), "clean-name");
    }

    #[test]
    fn component_truncates() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_component(&long).chars().count(), 100);
    }

    #[test]
    fn slug_lowercases() {
        assert_eq!(slug("AI & Society"), "ai_society");
        assert_eq!(slug("  Trust  "), "trust");
        assert_eq!(slug("!!"), "theme");
    }
}
