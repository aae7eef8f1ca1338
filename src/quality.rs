use crate::category::MediaKind;
use crate::newznab::AttributeMap;

/// Audio quality tokens Lidarr recognizes, in match-precedence order.
/// Longer tokens sit before their prefixes so DSD64 is never reported as DSD.
pub const AUDIO_QUALITIES: &[&str] = &[
    "DSD256", "DSD128", "DSD64", "DSD", "FLAC", "ALAC", "MP3", "AAC", "OGG", "OPUS", "WMA",
    "WAV", "AIFF", "M4B", "24-BIT", "16-BIT", "24BIT", "16BIT", "V0", "V2", "320", "256",
    "192", "128", "LOSSLESS", "LOSSY", "WEB", "CD", "VINYL",
];

/// Book format tokens Readarr recognizes, in match-precedence order.
pub const BOOK_FORMATS: &[&str] = &[
    "EPUB", "MOBI", "AZW3", "AZW", "PDF", "CBR", "CBZ", "FB2", "LIT", "LRF", "PDB", "DJVU",
    "DOCX", "DOC", "RTF", "TXT", "M4B",
];

/// First audio quality token found in `text`, canonical casing.
pub fn find_audio_quality(text: &str) -> Option<&'static str> {
    find_token(text, AUDIO_QUALITIES)
}

/// First book format token found in `text`, canonical casing.
pub fn find_book_format(text: &str) -> Option<&'static str> {
    find_token(text, BOOK_FORMATS)
}

/// Infers the format token for an item.
///
/// Precedence: the `audio` attribute when it carries a recognized token, then
/// a scan of the original title, then (best-effort only) a category default.
/// Without best-effort an undetermined quality stays `None` and is omitted
/// from the synthesized title rather than guessed.
pub fn detect(
    attrs: &AttributeMap,
    original_title: &str,
    kind: MediaKind,
    best_effort: bool,
) -> Option<&'static str> {
    let vocabulary = match kind {
        MediaKind::Music | MediaKind::Audiobook => AUDIO_QUALITIES,
        MediaKind::Book => BOOK_FORMATS,
        MediaKind::Other => return None,
    };

    if let Some(quality) = attrs.get("audio").and_then(|value| find_token(value, vocabulary)) {
        return Some(quality);
    }
    if let Some(quality) = find_token(original_title, vocabulary) {
        return Some(quality);
    }

    if best_effort {
        return match kind {
            MediaKind::Book => Some("EPUB"),
            MediaKind::Audiobook => Some("M4B"),
            MediaKind::Music | MediaKind::Other => None,
        };
    }

    None
}

/// Scans `text` for the first vocabulary entry present as a whole token,
/// case-insensitive. Vocabulary order decides ties, not position in `text`.
fn find_token(text: &str, vocabulary: &[&'static str]) -> Option<&'static str> {
    if text.is_empty() {
        return None;
    }
    let upper = text.to_uppercase();
    vocabulary
        .iter()
        .copied()
        .find(|token| contains_word(&upper, token))
}

/// Whole-token containment: the match may not be flanked by alphanumerics or
/// underscores, so FLAC never matches inside FLACCID and 320 never matches
/// inside a size field.
fn contains_word(haystack: &str, needle: &str) -> bool {
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(needle) {
        let start = from + offset;
        let end = start + needle.len();
        let before_ok = haystack[..start]
            .chars()
            .next_back()
            .is_none_or(|ch| !is_word_char(ch));
        let after_ok = haystack[end..].chars().next().is_none_or(|ch| !is_word_char(ch));
        if before_ok && after_ok {
            return true;
        }
        from = end;
    }
    false
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}
