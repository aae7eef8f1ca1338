use crate::category::MediaKind;
use crate::newznab::AttributeMap;

/// Synthesizes a replacement title for a classified item, or `None` when the
/// available attributes are too thin to improve on the original.
///
/// Templates per kind (absent segments are dropped, never left blank):
///   music      {artist}-{album}-{track}-{quality}-{year}
///   book       {author} - {title} ({year}) {quality}
///   audiobook  {author} - {title} {track} ({year})
///
/// Strict mode requires artist+album (music) or author+title (book and
/// audiobook). Best-effort proceeds with whatever exists, but a missing
/// discriminating field (artist/author) still skips: a title made only of a
/// quality or year token would be worse than the original.
pub fn synthesize(
    kind: MediaKind,
    attrs: &AttributeMap,
    original_title: &str,
    quality: Option<&'static str>,
    best_effort: bool,
) -> Option<String> {
    match kind {
        MediaKind::Music => build_music_title(attrs, original_title, quality, best_effort),
        MediaKind::Book => build_book_title(attrs, original_title, quality, best_effort),
        MediaKind::Audiobook => build_audiobook_title(attrs, original_title, best_effort),
        MediaKind::Other => None,
    }
}

/// Lidarr parses hyphen-delimited titles, so every segment must be free of
/// bare hyphens before it is joined with `-`.
fn build_music_title(
    attrs: &AttributeMap,
    original_title: &str,
    quality: Option<&'static str>,
    best_effort: bool,
) -> Option<String> {
    let artist = attrs.get("artist").map(music_field).unwrap_or_default();
    let album = attrs.get("album").map(music_field).unwrap_or_default();

    if artist.is_empty() {
        return None;
    }
    if !best_effort && album.is_empty() {
        return None;
    }

    let mut parts = vec![artist];
    if !album.is_empty() {
        parts.push(album);
    }
    if let Some(track) = attrs.get("track") {
        let track = music_field(track);
        if !track.is_empty() {
            parts.push(track);
        }
    }
    if let Some(quality) = quality {
        parts.push(quality.to_string());
    }
    if let Some(year) = resolve_year(attrs, original_title) {
        parts.push(year);
    }

    Some(parts.join("-"))
}

fn build_book_title(
    attrs: &AttributeMap,
    original_title: &str,
    quality: Option<&'static str>,
    best_effort: bool,
) -> Option<String> {
    let author = author_field(attrs);
    let book_title = book_title_field(attrs);

    if author.is_empty() {
        return None;
    }
    if !best_effort && book_title.is_empty() {
        return None;
    }

    let mut result = author;
    if !book_title.is_empty() {
        result = format!("{result} - {book_title}");
    }
    if let Some(year) = resolve_year(attrs, original_title) {
        result = format!("{result} ({year})");
    }
    if let Some(quality) = quality {
        result = format!("{result} {quality}");
    }

    Some(result)
}

fn build_audiobook_title(
    attrs: &AttributeMap,
    original_title: &str,
    best_effort: bool,
) -> Option<String> {
    let author = author_field(attrs);
    let mut title = book_title_field(attrs);

    if author.is_empty() {
        return None;
    }
    if !best_effort && title.is_empty() {
        return None;
    }

    if let Some(track) = attrs.get("track") {
        let track = sanitize_field(track);
        // Only append the track when it adds information.
        if !track.is_empty() && !title.to_lowercase().contains(&track.to_lowercase()) {
            title = if title.is_empty() {
                track
            } else {
                format!("{title} {track}")
            };
        }
    }

    let mut result = author;
    if !title.is_empty() {
        result = format!("{result} - {title}");
    }
    if let Some(year) = resolve_year(attrs, original_title) {
        result = format!("{result} ({year})");
    }

    Some(result)
}

fn author_field(attrs: &AttributeMap) -> String {
    attrs
        .get("author")
        .or_else(|| attrs.get("artist"))
        .map(sanitize_field)
        .unwrap_or_default()
}

/// `booktitle` is preferred over `title`; it is what Readarr's parser keys
/// on. `album` is a last resort for indexers that file books under audio.
fn book_title_field(attrs: &AttributeMap) -> String {
    attrs
        .get("booktitle")
        .or_else(|| attrs.get("title"))
        .or_else(|| attrs.get("album"))
        .map(sanitize_field)
        .unwrap_or_default()
}

fn music_field(value: &str) -> String {
    safe_hyphen_field(&sanitize_field(value))
}

fn resolve_year(attrs: &AttributeMap, original_title: &str) -> Option<String> {
    if let Some(year) = attrs.get("year") {
        let year = year.trim();
        if !year.is_empty() {
            return Some(year.to_string());
        }
    }
    year_from_title(original_title)
}

/// Normalizes whitespace and breaks hyphens/dashes joining word characters
/// ("Street-Legal" -> "Street Legal", "AC-DC" -> "AC DC") so *arr parsers
/// that split on `-` do not cut a field in half.
pub fn sanitize_field(value: &str) -> String {
    let collapsed = collapse_whitespace(value);
    let chars: Vec<char> = collapsed.chars().collect();

    let mut out = String::with_capacity(collapsed.len());
    for (i, &ch) in chars.iter().enumerate() {
        let between_words = matches!(ch, '-' | '\u{2013}' | '\u{2014}')
            && i > 0
            && is_word_char(chars[i - 1])
            && chars.get(i + 1).copied().is_some_and(is_word_char);
        out.push(if between_words { ' ' } else { ch });
    }

    collapse_whitespace(&out)
}

/// Makes a field safe for the hyphen-delimited music template by replacing
/// spaced hyphens with a colon separator.
pub fn safe_hyphen_field(value: &str) -> String {
    value.replace(" - ", ": ")
}

/// First `19xx`/`20xx` token in `text` that stands alone as a word.
pub fn year_from_title(text: &str) -> Option<String> {
    let chars: Vec<char> = text.chars().collect();
    for start in 0..chars.len() {
        let candidate = &chars[start..];
        if candidate.len() < 4 {
            break;
        }
        if !candidate[..4].iter().all(|ch| ch.is_ascii_digit()) {
            continue;
        }
        let prefix: String = candidate[..2].iter().collect();
        if prefix != "19" && prefix != "20" {
            continue;
        }
        let before_ok = start == 0 || !is_word_char(chars[start - 1]);
        let after_ok = candidate.get(4).copied().is_none_or(|ch| !is_word_char(ch));
        if before_ok && after_ok {
            return Some(candidate[..4].iter().collect());
        }
    }
    None
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}
