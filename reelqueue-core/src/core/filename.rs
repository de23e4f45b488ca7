use regex::Regex;
use std::sync::LazyLock;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::models::source::SourceRef;

static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());
static UNDERSCORE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").unwrap());

pub const MAX_TITLE_LENGTH: usize = 50;

/// Reduces free text to `[A-Za-z0-9_]`, folding accents to their base letter.
pub fn sanitize_for_filename(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect();

    let name = WS_RE.replace_all(folded.trim(), "_");
    let name = UNDERSCORE_RE.replace_all(&name, "_");
    let name = name.trim_matches('_');

    let capped: String = name.chars().take(MAX_TITLE_LENGTH).collect();
    capped.trim_end_matches('_').to_string()
}

/// `<platform>_<views>_<title>.mp4`, stable for a given item.
pub fn compute_filename(source: &SourceRef) -> String {
    compute_filename_with_ext(source, "mp4")
}

pub fn compute_filename_with_ext(source: &SourceRef, ext: &str) -> String {
    let mut title = sanitize_for_filename(&source.title);
    if title.is_empty() {
        title = sanitize_for_filename(&source.id);
    }
    format!(
        "{}_{}_{}.{}",
        source.platform.prefix(),
        source.views,
        title,
        ext
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::source::Platform;

    fn item(title: &str, views: u64) -> SourceRef {
        let mut s = SourceRef::youtube("vid42", title);
        s.views = views;
        s
    }

    #[test]
    fn sanitize_strips_accents() {
        assert_eq!(sanitize_for_filename("Desafio Impossível"), "Desafio_Impossivel");
    }

    #[test]
    fn sanitize_removes_punctuation() {
        assert_eq!(sanitize_for_filename("Best of 2024! (HD) | part #2"), "Best_of_2024_HD_part_2");
    }

    #[test]
    fn sanitize_collapses_whitespace() {
        assert_eq!(sanitize_for_filename("  hello \t\n  world  "), "hello_world");
    }

    #[test]
    fn sanitize_caps_length_without_trailing_underscore() {
        let title = format!("{} tail", "a".repeat(49));
        let result = sanitize_for_filename(&title);
        assert_eq!(result.len(), 49);
        assert!(!result.ends_with('_'));
    }

    #[test]
    fn sanitize_drops_emoji_and_cjk() {
        assert_eq!(sanitize_for_filename("🔥 drop 日本 mix 🔥"), "drop_mix");
    }

    #[test]
    fn filename_has_prefix_views_and_title() {
        assert_eq!(
            compute_filename(&item("Desafio Impossível", 1_500_000)),
            "yt_1500000_Desafio_Impossivel.mp4"
        );
    }

    #[test]
    fn filename_is_deterministic() {
        let source = item("Same: title?", 7);
        assert_eq!(compute_filename(&source), compute_filename(&source));
    }

    #[test]
    fn filename_falls_back_to_id_for_empty_title() {
        assert_eq!(compute_filename(&item("!!!", 3)), "yt_3_vid42.mp4");
    }

    #[test]
    fn filename_uses_platform_prefix_and_ext() {
        let mut source = item("clip", 10);
        source.platform = Platform::TikTok;
        assert_eq!(compute_filename_with_ext(&source, "mp3"), "tt_10_clip.mp3");
    }
}
