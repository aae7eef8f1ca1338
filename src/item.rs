use std::collections::BTreeSet;
use std::fmt;

use tracing::debug;

use crate::category::{self, MediaKind};
use crate::config::RewriteConfig;
use crate::newznab::AttributeMap;
use crate::{quality, title};

/// Result of running one item through the rewriter. Skips are terminal and
/// leave the original title untouched; only `Replaced` changes the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Replaced { title: String, kind: MediaKind },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The item carries no newznab attributes to rewrite from.
    NoAttributes,
    /// The category's rewrite toggle is disabled.
    ToggleDisabled(MediaKind),
    /// The item classified as a category this proxy does not rewrite.
    UnmatchedCategory,
    /// Synthesis failed under the configured required fields.
    MissingFields(MediaKind),
    /// Synthesis produced the title the item already has.
    Unchanged(MediaKind),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoAttributes => write!(f, "no newznab attributes"),
            SkipReason::ToggleDisabled(kind) => write!(f, "{kind} rewriting disabled"),
            SkipReason::UnmatchedCategory => write!(f, "category not rewritable"),
            SkipReason::MissingFields(kind) => write!(f, "missing required {kind} fields"),
            SkipReason::Unchanged(kind) => write!(f, "{kind} title already parseable"),
        }
    }
}

/// Runs the per-item state machine: classify, gate on the category toggle,
/// detect quality, synthesize. Pure function of its inputs; an item is
/// processed at most once per response.
pub fn rewrite_item(
    original_title: &str,
    attrs: &AttributeMap,
    categories: &BTreeSet<String>,
    config: &RewriteConfig,
) -> ItemOutcome {
    if attrs.is_empty() {
        return ItemOutcome::Skipped(SkipReason::NoAttributes);
    }

    let category = category::classify(categories, attrs, original_title);
    debug!(
        kind = %category.kind,
        code = category.code,
        title = original_title,
        "classified item"
    );

    let enabled = match category.kind {
        MediaKind::Music => config.music,
        MediaKind::Book => config.books,
        MediaKind::Audiobook => config.audiobooks,
        MediaKind::Other => return ItemOutcome::Skipped(SkipReason::UnmatchedCategory),
    };
    if !enabled {
        return ItemOutcome::Skipped(SkipReason::ToggleDisabled(category.kind));
    }

    let quality = quality::detect(attrs, original_title, category.kind, config.best_effort);

    match title::synthesize(
        category.kind,
        attrs,
        original_title,
        quality,
        config.best_effort,
    ) {
        Some(new_title) if new_title != original_title => ItemOutcome::Replaced {
            title: new_title,
            kind: category.kind,
        },
        Some(_) => ItemOutcome::Skipped(SkipReason::Unchanged(category.kind)),
        None => ItemOutcome::Skipped(SkipReason::MissingFields(category.kind)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cats(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn config() -> RewriteConfig {
        RewriteConfig {
            music: true,
            books: true,
            audiobooks: true,
            best_effort: true,
            debug_attrs: false,
        }
    }

    #[test]
    fn music_item_is_rewritten_end_to_end() {
        let attrs = AttributeMap::from([
            ("artist", "Tatjana Schaumberger"),
            ("album", "Cybercast"),
            ("track", "Episode 19: Securing an Austrian Silicon Fab"),
            ("year", "2017"),
        ]);
        let outcome = rewrite_item(
            "Beispiel-Firma GmbH-Cybercast-FLAC-2017",
            &attrs,
            &cats(&["3010"]),
            &config(),
        );
        assert_eq!(
            outcome,
            ItemOutcome::Replaced {
                title: "Tatjana Schaumberger-Cybercast-Episode 19: Securing an Austrian Silicon Fab-FLAC-2017".to_string(),
                kind: MediaKind::Music,
            }
        );
    }

    #[test]
    fn disabled_toggle_skips_without_touching_the_title() {
        let attrs = AttributeMap::from([("artist", "A"), ("album", "B")]);
        let outcome = rewrite_item(
            "orig",
            &attrs,
            &cats(&["3000"]),
            &RewriteConfig {
                music: false,
                ..config()
            },
        );
        assert_eq!(
            outcome,
            ItemOutcome::Skipped(SkipReason::ToggleDisabled(MediaKind::Music))
        );
    }

    #[test]
    fn strict_mode_skips_on_missing_required_field() {
        let attrs = AttributeMap::from([("artist", "X")]);
        let outcome = rewrite_item(
            "Original stays",
            &attrs,
            &cats(&["3000"]),
            &RewriteConfig {
                best_effort: false,
                ..config()
            },
        );
        assert_eq!(
            outcome,
            ItemOutcome::Skipped(SkipReason::MissingFields(MediaKind::Music))
        );
    }

    #[test]
    fn items_without_attributes_are_skipped() {
        let outcome = rewrite_item(
            "No attrs here just a normal title",
            &AttributeMap::default(),
            &cats(&["3000"]),
            &config(),
        );
        assert_eq!(outcome, ItemOutcome::Skipped(SkipReason::NoAttributes));
    }

    #[test]
    fn code_3030_takes_the_audiobook_path() {
        let attrs = AttributeMap::from([
            ("artist", "Anna Schmidt"),
            ("album", "Das große Abenteuer"),
        ]);
        let outcome = rewrite_item("Bad", &attrs, &cats(&["3030"]), &config());
        let ItemOutcome::Replaced { title, kind } = outcome else {
            panic!("expected a rewrite");
        };
        assert_eq!(kind, MediaKind::Audiobook);
        assert_eq!(title, "Anna Schmidt - Das große Abenteuer");
    }

    #[test]
    fn synthesis_matching_the_original_reports_unchanged() {
        let attrs = AttributeMap::from([("artist", "A"), ("album", "B"), ("year", "2020")]);
        let outcome = rewrite_item("A-B-2020", &attrs, &cats(&["3000"]), &config());
        assert_eq!(
            outcome,
            ItemOutcome::Skipped(SkipReason::Unchanged(MediaKind::Music))
        );
    }
}
