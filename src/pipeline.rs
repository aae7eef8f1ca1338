use std::ops::Range;

use quick_xml::events::{BytesEnd, BytesRef, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use thiserror::Error;
use tracing::{debug, info};

use crate::config::RewriteConfig;
use crate::item::{self, ItemOutcome};
use crate::newznab::{self, ORIGINAL_TITLE_ATTR};

/// Result of running a response body through the rewrite pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RewriteOutcome {
    /// At least one title changed; forward this document instead.
    Rewritten(Vec<u8>),
    /// Not a rewritable newznab document, or nothing changed; forward the
    /// original bytes verbatim.
    Unchanged,
}

#[derive(Debug, Error)]
enum PipelineError {
    #[error("invalid XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("failed to serialize document: {0}")]
    Io(#[from] std::io::Error),
    #[error("unterminated <item> element")]
    TruncatedItem,
}

/// Rewrites every `<item>` title in a newznab RSS document.
///
/// Parse failures are not errors here: anything that does not parse as an
/// RSS channel with items comes back `Unchanged` and the caller relays the
/// original body byte-for-byte. Untouched items round-trip through the
/// writer without reformatting.
pub fn rewrite_response(body: &[u8], config: &RewriteConfig) -> RewriteOutcome {
    match try_rewrite(body, config) {
        Ok(Some(document)) => RewriteOutcome::Rewritten(document),
        Ok(None) => RewriteOutcome::Unchanged,
        Err(err) => {
            debug!(error = %err, "body is not a rewritable document; passing through");
            RewriteOutcome::Unchanged
        }
    }
}

fn try_rewrite(body: &[u8], config: &RewriteConfig) -> Result<Option<Vec<u8>>, PipelineError> {
    let mut reader = Reader::from_reader(body);
    let mut writer = Writer::new(Vec::with_capacity(body.len()));

    let mut saw_root = false;
    let mut saw_channel = false;
    let mut total_items = 0usize;
    let mut rewritten = 0usize;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(start) if !saw_root => {
                if start.name().as_ref() != b"rss" {
                    debug!("root element is not <rss>; not a newznab response");
                    return Ok(None);
                }
                saw_root = true;
                writer.write_event(Event::Start(start))?;
            }
            Event::Start(start) if saw_channel && start.name().as_ref() == b"item" => {
                total_items += 1;
                let children = collect_item_children(&mut reader)?;
                if write_item(&mut writer, start, children, config)? {
                    rewritten += 1;
                }
            }
            Event::Start(start) => {
                if start.name().as_ref() == b"channel" {
                    saw_channel = true;
                }
                writer.write_event(Event::Start(start))?;
            }
            event => writer.write_event(event)?,
        }
    }

    if !saw_channel || total_items == 0 {
        debug!("no <channel> items found; not a newznab response");
        return Ok(None);
    }
    if rewritten == 0 {
        debug!(items = total_items, "no titles needed rewriting");
        return Ok(None);
    }

    info!(rewritten, items = total_items, "rewrote titles in newznab response");
    Ok(Some(writer.into_inner()))
}

/// Buffers the child events of one `<item>`, up to but excluding the
/// matching `</item>`. The reader itself rejects mismatched end tags.
fn collect_item_children<'a>(
    reader: &mut Reader<&'a [u8]>,
) -> Result<Vec<Event<'a>>, PipelineError> {
    let mut events = Vec::new();
    let mut depth = 0usize;

    loop {
        let event = reader.read_event()?;
        match &event {
            Event::Eof => return Err(PipelineError::TruncatedItem),
            Event::Start(_) => depth += 1,
            Event::End(_) => {
                if depth == 0 {
                    return Ok(events);
                }
                depth -= 1;
            }
            _ => {}
        }
        events.push(event);
    }
}

/// Re-emits one item, substituting the title text when the rewriter produced
/// a replacement and appending the `original_title` debug attribute when
/// configured. Returns whether the item was rewritten.
fn write_item(
    writer: &mut Writer<Vec<u8>>,
    start: BytesStart<'_>,
    children: Vec<Event<'_>>,
    config: &RewriteConfig,
) -> Result<bool, PipelineError> {
    let analysis = analyze_item(&children);

    let replacement = match analysis.title.as_deref() {
        Some(original) if !original.is_empty() => {
            let attrs = newznab::extract_attributes(&children);
            let categories = newznab::item_categories(&children);
            match item::rewrite_item(original, &attrs, &categories, config) {
                ItemOutcome::Replaced { title, kind } => {
                    info!(kind = %kind, from = original, to = %title, "title rewritten");
                    Some((title, original.to_string()))
                }
                ItemOutcome::Skipped(reason) => {
                    debug!(title = original, %reason, "item left untouched");
                    None
                }
            }
        }
        _ => None,
    };

    writer.write_event(Event::Start(start))?;

    match &replacement {
        None => {
            for event in children {
                writer.write_event(event)?;
            }
        }
        Some((new_title, original_title)) => {
            let span = analysis.title_span.clone().unwrap_or_default();
            for (index, event) in children.into_iter().enumerate() {
                if span.contains(&index) {
                    if index == span.start {
                        writer.write_event(Event::Text(BytesText::new(new_title)))?;
                    }
                    continue;
                }
                writer.write_event(event)?;
            }
            if span.is_empty() {
                // <title></title> carried no content events to replace.
                writer.write_event(Event::Text(BytesText::new(new_title)))?;
            }
            if config.debug_attrs {
                let mut attr = BytesStart::new(format!("{}:attr", analysis.attr_prefix));
                attr.push_attribute(("name", ORIGINAL_TITLE_ATTR));
                attr.push_attribute(("value", original_title.as_str()));
                writer.write_event(Event::Empty(attr))?;
            }
        }
    }

    writer.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(replacement.is_some())
}

struct ItemAnalysis {
    /// Decoded original title, if the item has a usable one.
    title: Option<String>,
    /// Index range of the title's content events within the children.
    title_span: Option<Range<usize>>,
    /// Prefix to mint the debug attribute with, matching the document.
    attr_prefix: String,
}

fn analyze_item(children: &[Event<'_>]) -> ItemAnalysis {
    let mut depth = 0usize;
    let mut in_title = false;
    let mut title_seen = false;
    let mut title_usable = true;
    let mut title_buf = String::new();
    let mut span_start = None;
    let mut span_end = None;
    let mut attr_prefix: Option<String> = None;

    for (index, event) in children.iter().enumerate() {
        match event {
            Event::Start(e) => {
                if depth == 0 {
                    if !title_seen && e.name().as_ref() == b"title" {
                        in_title = true;
                        title_seen = true;
                        span_start = Some(index + 1);
                    }
                    if attr_prefix.is_none() {
                        attr_prefix = newznab::attr_prefix(e.name().as_ref()).map(str::to_string);
                    }
                } else if in_title {
                    // Markup nested inside <title> cannot be replaced safely.
                    title_usable = false;
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if in_title && depth == 0 {
                    in_title = false;
                    span_end = Some(index);
                }
            }
            Event::Empty(e) if depth == 0 => {
                if attr_prefix.is_none() {
                    attr_prefix = newznab::attr_prefix(e.name().as_ref()).map(str::to_string);
                }
            }
            Event::Text(text) if in_title && depth == 1 => match text.decode() {
                Ok(decoded) => title_buf.push_str(&decoded),
                Err(_) => title_usable = false,
            },
            Event::CData(data) if in_title && depth == 1 => {
                title_buf.push_str(&String::from_utf8_lossy(data));
            }
            Event::GeneralRef(reference) if in_title && depth == 1 => {
                title_buf.push_str(&resolve_reference(reference));
            }
            _ => {}
        }
    }

    let title_span = match (span_start, span_end) {
        (Some(start), Some(end)) if title_usable => Some(start..end),
        _ => None,
    };
    let title = (title_usable && title_seen && !title_buf.is_empty()).then_some(title_buf);

    ItemAnalysis {
        title,
        title_span,
        attr_prefix: attr_prefix.unwrap_or_else(|| "newznab".to_string()),
    }
}

/// Decodes a general entity reference in title content. Unknown entities are
/// reproduced literally so the comparison with a resynthesized title stays
/// honest.
fn resolve_reference(reference: &BytesRef<'_>) -> String {
    let name: &[u8] = reference;
    match name {
        b"amp" => "&".to_string(),
        b"lt" => "<".to_string(),
        b"gt" => ">".to_string(),
        b"quot" => "\"".to_string(),
        b"apos" => "'".to_string(),
        [b'#', digits @ ..] => {
            let decoded = match digits {
                [b'x' | b'X', hex @ ..] => std::str::from_utf8(hex)
                    .ok()
                    .and_then(|value| u32::from_str_radix(value, 16).ok()),
                _ => std::str::from_utf8(digits)
                    .ok()
                    .and_then(|value| value.parse::<u32>().ok()),
            };
            match decoded.and_then(char::from_u32) {
                Some(ch) => ch.to_string(),
                None => format!("&{};", String::from_utf8_lossy(name)),
            }
        }
        _ => format!("&{};", String::from_utf8_lossy(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RewriteConfig {
        RewriteConfig {
            music: true,
            books: true,
            audiobooks: true,
            best_effort: true,
            debug_attrs: false,
        }
    }

    const MUSIC_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:atom="http://www.w3.org/2005/Atom" xmlns:newznab="http://www.newznab.com/DTD/2010/feeds/attributes/">
  <channel>
    <title>Test Indexer</title>
    <item>
      <title>Beispiel-Firma GmbH-Cybercast-Folge 19: Securing an Austrian Silicon Fab-FLAC-2017</title>
      <guid>https://indexer.example.com/details/798d4debe1360a81ca03e4d54419ddfb</guid>
      <category>3000</category>
      <newznab:attr name="category" value="3000"/>
      <newznab:attr name="size" value="316887082"/>
      <newznab:attr name="album" value="Cybercast"/>
      <newznab:attr name="artist" value="Tatjana Schaumberger"/>
      <newznab:attr name="publisher" value="Beispiel-Firma GmbH"/>
      <newznab:attr name="track" value="Folge 19: Securing an Austrian Silicon Fab"/>
    </item>
  </channel>
</rss>"#;

    const MULTI_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:newznab="http://www.newznab.com/DTD/2010/feeds/attributes/">
  <channel>
    <title>Test Indexer</title>
    <item>
      <title>Bad-Title-Music-FLAC-2020</title>
      <category>3000</category>
      <newznab:attr name="category" value="3000"/>
      <newznab:attr name="artist" value="Die Toten Hosen"/>
      <newznab:attr name="album" value="Alles ohne Strom"/>
    </item>
    <item>
      <title>No attrs here just a normal title</title>
      <category>3000</category>
    </item>
    <item>
      <title>Some-Publisher-BookTitle-EPUB</title>
      <category>7020</category>
      <newznab:attr name="category" value="7020"/>
      <newznab:attr name="author" value="Friedrich Dürrenmatt"/>
      <newznab:attr name="booktitle" value="Der Besuch der alten Dame"/>
      <newznab:attr name="year" value="1956"/>
    </item>
  </channel>
</rss>"#;

    fn rewritten(body: &str, config: &RewriteConfig) -> String {
        match rewrite_response(body.as_bytes(), config) {
            RewriteOutcome::Rewritten(bytes) => String::from_utf8(bytes).unwrap(),
            RewriteOutcome::Unchanged => panic!("expected a rewrite"),
        }
    }

    fn item_titles(document: &str) -> Vec<String> {
        let mut reader = Reader::from_str(document);
        let mut titles = Vec::new();
        let mut path: Vec<String> = Vec::new();
        let mut buffer = String::new();
        loop {
            let in_item_title = path.ends_with(&["item".to_string(), "title".to_string()]);
            match reader.read_event().unwrap() {
                Event::Eof => break,
                Event::Start(e) => {
                    path.push(String::from_utf8_lossy(e.name().as_ref()).to_string())
                }
                Event::End(_) => {
                    if in_item_title {
                        titles.push(std::mem::take(&mut buffer));
                    }
                    path.pop();
                }
                Event::Text(t) if in_item_title => buffer.push_str(&t.decode().unwrap()),
                Event::CData(c) if in_item_title => {
                    buffer.push_str(&String::from_utf8_lossy(&c))
                }
                Event::GeneralRef(r) if in_item_title => buffer.push_str(&resolve_reference(&r)),
                _ => {}
            }
        }
        titles
    }

    #[test]
    fn music_item_title_is_replaced() {
        let output = rewritten(MUSIC_XML, &config());
        let titles = item_titles(&output);
        assert_eq!(
            titles,
            vec![
                "Tatjana Schaumberger-Cybercast-Folge 19: Securing an Austrian Silicon Fab-FLAC-2017"
            ]
        );
        assert!(!output.contains("Beispiel-Firma GmbH-Cybercast"));
    }

    #[test]
    fn attributes_survive_the_rewrite_untouched() {
        let output = rewritten(MUSIC_XML, &config());
        assert_eq!(output.matches("newznab:attr").count(), MUSIC_XML.matches("newznab:attr").count());
        assert!(output.contains(r#"<newznab:attr name="size" value="316887082"/>"#));
        assert!(output.contains(r#"<newznab:attr name="publisher" value="Beispiel-Firma GmbH"/>"#));
        assert!(output.contains("xmlns:newznab=\"http://www.newznab.com/DTD/2010/feeds/attributes/\""));
    }

    #[test]
    fn mixed_document_rewrites_only_eligible_items() {
        let output = rewritten(MULTI_XML, &config());
        let titles = item_titles(&output);
        assert_eq!(titles.len(), 3);
        assert_eq!(titles[0], "Die Toten Hosen-Alles ohne Strom-FLAC-2020");
        assert_eq!(titles[1], "No attrs here just a normal title");
        assert_eq!(
            titles[2],
            "Friedrich Dürrenmatt - Der Besuch der alten Dame (1956) EPUB"
        );
    }

    #[test]
    fn non_xml_body_passes_through() {
        let body = br#"{"error": "rate limited"}"#;
        assert_eq!(rewrite_response(body, &config()), RewriteOutcome::Unchanged);
    }

    #[test]
    fn xml_without_channel_passes_through() {
        let body = b"<?xml version=\"1.0\"?><caps><server title=\"x\"/></caps>";
        assert_eq!(rewrite_response(body, &config()), RewriteOutcome::Unchanged);
    }

    #[test]
    fn truncated_document_passes_through() {
        let body = b"<rss><channel><item><title>Broken";
        assert_eq!(rewrite_response(body, &config()), RewriteOutcome::Unchanged);
    }

    #[test]
    fn disabled_toggles_leave_the_document_unchanged() {
        let off = RewriteConfig {
            music: false,
            books: false,
            audiobooks: false,
            ..config()
        };
        assert_eq!(
            rewrite_response(MULTI_XML.as_bytes(), &off),
            RewriteOutcome::Unchanged
        );
    }

    #[test]
    fn debug_attrs_appends_exactly_one_original_title() {
        let dbg = RewriteConfig {
            debug_attrs: true,
            ..config()
        };
        let output = rewritten(MUSIC_XML, &dbg);
        assert_eq!(output.matches(r#"name="original_title""#).count(), 1);
        assert!(output.contains(
            r#"<newznab:attr name="original_title" value="Beispiel-Firma GmbH-Cybercast-Folge 19: Securing an Austrian Silicon Fab-FLAC-2017"/>"#
        ));
        assert_eq!(
            output.matches("newznab:attr").count(),
            MUSIC_XML.matches("newznab:attr").count() + 1
        );
    }

    #[test]
    fn rewriting_twice_is_idempotent() {
        let first = rewritten(MUSIC_XML, &config());
        // The second pass synthesizes the same title and reports no change.
        assert_eq!(
            rewrite_response(first.as_bytes(), &config()),
            RewriteOutcome::Unchanged
        );
    }

    #[test]
    fn entities_in_titles_are_decoded_for_synthesis() {
        let body = r#"<rss xmlns:newznab="x"><channel><item>
          <title>Broken &amp; Bad FLAC</title>
          <newznab:attr name="category" value="3000"/>
          <newznab:attr name="artist" value="Band &amp; Co"/>
          <newznab:attr name="album" value="Album"/>
        </item></channel></rss>"#;
        let output = rewritten(body, &config());
        let titles = item_titles(&output);
        assert_eq!(titles, vec!["Band & Co-Album-FLAC"]);
    }

    #[test]
    fn torznab_prefixed_attrs_are_honoured() {
        let body = r#"<rss xmlns:torznab="x"><channel><item>
          <title>Broken</title>
          <torznab:attr name="category" value="7000"/>
          <torznab:attr name="author" value="A"/>
          <torznab:attr name="booktitle" value="B"/>
        </item></channel></rss>"#;
        let dbg = RewriteConfig {
            debug_attrs: true,
            ..config()
        };
        let output = rewritten(body, &dbg);
        assert!(output.contains(r#"<torznab:attr name="original_title" value="Broken"/>"#));
    }
}
