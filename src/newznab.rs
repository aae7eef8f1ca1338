use std::collections::{BTreeSet, HashMap};

use quick_xml::events::{BytesStart, Event};

/// Attribute appended to an item when `DEBUG_ATTRS` is enabled.
pub const ORIGINAL_TITLE_ATTR: &str = "original_title";

/// Per-item `newznab:attr` name/value mapping.
///
/// Names are kept case-sensitive as received and duplicates are resolved
/// last-seen-wins. Absent attributes simply have no key; an empty value is
/// treated as absent. The map is built fresh for every item and discarded
/// once the item has been rewritten.
#[derive(Debug, Clone, Default)]
pub struct AttributeMap(HashMap<String, String>);

impl AttributeMap {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn insert(&mut self, name: String, value: String) {
        self.0.insert(name, value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for AttributeMap {
    fn from(pairs: [(&str, &str); N]) -> Self {
        let mut map = AttributeMap::default();
        for (name, value) in pairs {
            map.insert(name.to_string(), value.to_string());
        }
        map
    }
}

pub fn is_attr_element(name: &[u8]) -> bool {
    name == b"newznab:attr" || name == b"torznab:attr"
}

/// Prefix of an attr element qname (`newznab` or `torznab`).
pub fn attr_prefix(name: &[u8]) -> Option<&str> {
    match name {
        b"newznab:attr" => Some("newznab"),
        b"torznab:attr" => Some("torznab"),
        _ => None,
    }
}

/// Extracts the AttributeMap from the buffered child events of one `<item>`.
///
/// Only direct children are considered, mirroring how indexers emit the
/// elements. A node missing its `name` or `value` attribute is skipped on its
/// own; it never aborts extraction of the remaining attributes.
pub fn extract_attributes(events: &[Event<'_>]) -> AttributeMap {
    let mut attrs = AttributeMap::default();
    let mut depth = 0usize;

    for event in events {
        match event {
            Event::Start(e) => {
                if depth == 0 && is_attr_element(e.name().as_ref()) {
                    collect_attr_node(e, &mut attrs);
                }
                depth += 1;
            }
            Event::End(_) => depth = depth.saturating_sub(1),
            Event::Empty(e) if depth == 0 => {
                if is_attr_element(e.name().as_ref()) {
                    collect_attr_node(e, &mut attrs);
                }
            }
            _ => {}
        }
    }

    attrs
}

fn collect_attr_node(element: &BytesStart<'_>, attrs: &mut AttributeMap) {
    let mut name = None;
    let mut value = None;

    for attr in element.attributes().flatten() {
        let Ok(text) = attr.unescape_value() else {
            continue;
        };
        match attr.key.as_ref() {
            b"name" => name = Some(text.trim().to_string()),
            b"value" => value = Some(text.trim().to_string()),
            _ => {}
        }
    }

    match (name, value) {
        (Some(name), Some(value)) if !name.is_empty() && !value.is_empty() => {
            attrs.insert(name, value);
        }
        // Malformed node; skip it and keep going.
        _ => {}
    }
}

/// Collects every category value carried by an item, from both
/// `newznab:attr name="category"` nodes and plain `<category>` elements.
pub fn item_categories(events: &[Event<'_>]) -> BTreeSet<String> {
    let mut categories = BTreeSet::new();
    let mut depth = 0usize;
    let mut in_category = false;

    for event in events {
        match event {
            Event::Start(e) => {
                if depth == 0 {
                    in_category = e.name().as_ref() == b"category";
                    if is_attr_element(e.name().as_ref()) {
                        collect_category_attr(e, &mut categories);
                    }
                }
                depth += 1;
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    in_category = false;
                }
            }
            Event::Empty(e) if depth == 0 => {
                if is_attr_element(e.name().as_ref()) {
                    collect_category_attr(e, &mut categories);
                }
            }
            Event::Text(text) if depth == 1 && in_category => {
                if let Ok(value) = text.decode() {
                    let value = value.trim();
                    if !value.is_empty() {
                        categories.insert(value.to_string());
                    }
                }
            }
            _ => {}
        }
    }

    categories
}

fn collect_category_attr(element: &BytesStart<'_>, categories: &mut BTreeSet<String>) {
    let mut is_category = false;
    let mut value = None;

    for attr in element.attributes().flatten() {
        let Ok(text) = attr.unescape_value() else {
            continue;
        };
        match attr.key.as_ref() {
            b"name" => is_category = text.trim().eq_ignore_ascii_case("category"),
            b"value" => value = Some(text.trim().to_string()),
            _ => {}
        }
    }

    if is_category && let Some(value) = value && !value.is_empty() {
        categories.insert(value);
    }
}
