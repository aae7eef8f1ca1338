use std::collections::BTreeSet;
use std::fmt;

use crate::newznab::AttributeMap;
use crate::quality;

/// Media kind a release was classified as. `Other` is the safe terminal
/// result when nothing matches; classification never fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Music,
    Book,
    Audiobook,
    Other,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MediaKind::Music => "music",
            MediaKind::Book => "book",
            MediaKind::Audiobook => "audiobook",
            MediaKind::Other => "other",
        };
        f.write_str(label)
    }
}

/// Classification result: the kind plus the raw newznab code that produced
/// it, kept around for logging. Heuristic matches carry no code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Category {
    pub kind: MediaKind,
    pub code: Option<u32>,
}

impl Category {
    fn from_code(kind: MediaKind, code: u32) -> Self {
        Self {
            kind,
            code: Some(code),
        }
    }

    fn heuristic(kind: MediaKind) -> Self {
        Self { kind, code: None }
    }
}

const AUDIOBOOK_CODE: u32 = 3030;
const MUSIC_RANGE: std::ops::RangeInclusive<u32> = 3000..=3999;
const BOOK_RANGE: std::ops::RangeInclusive<u32> = 7000..=7999;

/// Classifies an item from its category codes, falling back to attribute
/// heuristics when no numeric code is present.
///
/// Code precedence: 3030 is audiobook and wins over the broader music range
/// it sits inside; then 7000-7999 is book and 3000-3999 is music. Items
/// cross-listed in both ranges resolve as books.
pub fn classify(
    categories: &BTreeSet<String>,
    attrs: &AttributeMap,
    original_title: &str,
) -> Category {
    let codes: BTreeSet<u32> = categories
        .iter()
        .filter_map(|value| value.trim().parse::<u32>().ok())
        .collect();

    if codes.contains(&AUDIOBOOK_CODE) {
        return Category::from_code(MediaKind::Audiobook, AUDIOBOOK_CODE);
    }
    if let Some(code) = codes.iter().copied().find(|code| BOOK_RANGE.contains(code)) {
        return Category::from_code(MediaKind::Book, code);
    }
    if let Some(code) = codes.iter().copied().find(|code| MUSIC_RANGE.contains(code)) {
        return Category::from_code(MediaKind::Music, code);
    }

    if codes.is_empty() {
        if attrs.get("booktitle").is_some() || attrs.get("author").is_some() {
            return Category::heuristic(MediaKind::Book);
        }

        let has_audio_hint = attrs
            .get("audio")
            .and_then(quality::find_audio_quality)
            .or_else(|| quality::find_audio_quality(original_title))
            .is_some();
        if attrs.get("album").is_some() && attrs.get("track").is_some() && has_audio_hint {
            return Category::heuristic(MediaKind::Music);
        }
    }

    Category::heuristic(MediaKind::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cats(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn audiobook_code_wins_over_music_range() {
        let category = classify(&cats(&["3000", "3030"]), &AttributeMap::default(), "");
        assert_eq!(category.kind, MediaKind::Audiobook);
        assert_eq!(category.code, Some(3030));
    }

    #[test]
    fn music_and_book_ranges() {
        assert_eq!(
            classify(&cats(&["3010"]), &AttributeMap::default(), "").kind,
            MediaKind::Music
        );
        assert_eq!(
            classify(&cats(&["7020"]), &AttributeMap::default(), "").kind,
            MediaKind::Book
        );
        assert_eq!(
            classify(&cats(&["2000"]), &AttributeMap::default(), "").kind,
            MediaKind::Other
        );
    }

    #[test]
    fn book_code_wins_over_music_code() {
        let attrs = AttributeMap::from([
            ("author", "A"),
            ("booktitle", "B"),
            ("artist", "C"),
            ("album", "D"),
        ]);
        let category = classify(&cats(&["3010", "7020"]), &attrs, "");
        assert_eq!(category.kind, MediaKind::Book);
        assert_eq!(category.code, Some(7020));
    }

    #[test]
    fn carries_raw_code_for_logging() {
        let category = classify(&cats(&["7040"]), &AttributeMap::default(), "");
        assert_eq!(category.code, Some(7040));
    }

    #[test]
    fn heuristic_book_when_no_numeric_code() {
        let attrs = AttributeMap::from([("author", "Max Mustermann")]);
        let category = classify(&cats(&[]), &attrs, "whatever");
        assert_eq!(category.kind, MediaKind::Book);
        assert_eq!(category.code, None);
    }

    #[test]
    fn heuristic_music_needs_album_track_and_format_hint() {
        let attrs = AttributeMap::from([("album", "Cybercast"), ("track", "Episode 19")]);
        assert_eq!(classify(&cats(&[]), &attrs, "no hint here").kind, MediaKind::Other);
        assert_eq!(
            classify(&cats(&[]), &attrs, "Something FLAC rip").kind,
            MediaKind::Music
        );
    }

    #[test]
    fn heuristics_do_not_override_explicit_codes() {
        let attrs = AttributeMap::from([("author", "Somebody")]);
        assert_eq!(classify(&cats(&["3010"]), &attrs, "").kind, MediaKind::Music);
    }

    #[test]
    fn non_numeric_categories_fall_back_to_other() {
        let category = classify(&cats(&["Audio/Music"]), &AttributeMap::default(), "");
        assert_eq!(category.kind, MediaKind::Other);
        assert_eq!(category.code, None);
    }
}
