//! Language tags and the translation boundary.
//!
//! The server is configured with a set of `ll_CC` locales. Clients address
//! them with language tags: the full five-character `ll_CC` form, or the
//! two-character short form when it is unambiguous across the configured
//! set. Message translation itself belongs to an external catalog behind
//! the [`Translator`] trait; the locale travels as a per-call argument.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::results::ResultEntry;

/// Split a configured locale (`"fr_FR"` or `"fr_FR.UTF-8"`) into
/// `(language, territory)`.
pub fn parse_locale(locale: &str) -> Option<(String, String)> {
    let base = locale.split('.').next().unwrap_or(locale);
    let (lang, territory) = base.split_once('_')?;
    if lang.len() != 2 || territory.len() != 2 {
        return None;
    }
    if !lang.bytes().all(|b| b.is_ascii_lowercase()) {
        return None;
    }
    if !territory.bytes().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    Some((lang.to_string(), territory.to_string()))
}

/// All tags clients may use against the configured locales.
///
/// Full `ll_CC` tags are always present; a short `ll` tag is included only
/// when exactly one configured locale carries that language.
pub fn language_tags(locales: &[String]) -> Vec<String> {
    let mut by_lang: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for locale in locales {
        if let Some((lang, territory)) = parse_locale(locale) {
            by_lang
                .entry(lang.clone())
                .or_default()
                .push(format!("{lang}_{territory}"));
        }
    }

    let mut tags = Vec::new();
    for (lang, mut fulls) in by_lang {
        fulls.sort();
        fulls.dedup();
        if fulls.len() == 1 {
            tags.push(lang);
        }
        tags.extend(fulls);
    }
    tags.sort();
    tags.dedup();
    tags
}

/// Resolve a client language tag to a configured `ll_CC` locale.
///
/// Accepts the two-character short form (when unambiguous) and the
/// five-character full form.
pub fn resolve_tag(tag: &str, locales: &[String]) -> Option<String> {
    let mut matches: Vec<String> = Vec::new();
    for locale in locales {
        if let Some((lang, territory)) = parse_locale(locale) {
            let full = format!("{lang}_{territory}");
            let hit = match tag.len() {
                2 => lang == tag,
                5 => full == tag,
                _ => false,
            };
            if hit && !matches.contains(&full) {
                matches.push(full);
            }
        }
    }
    match matches.as_slice() {
        [single] => Some(single.clone()),
        _ => None,
    }
}

/// The boundary to the external message catalog.
///
/// The locale is a per-call argument; implementations must not mutate
/// process-wide state. Returning `None` means the catalog has no entry and
/// the caller falls back to the untranslated source form.
pub trait Translator: Send + Sync {
    /// Translate one result entry into `locale`.
    fn message(&self, entry: &ResultEntry, locale: &str) -> Option<String>;

    /// Translate a validation message into `locale`.
    ///
    /// The default keeps the source form, which is also the documented
    /// fallback when the requested language is itself invalid.
    fn validation_message(&self, source: &str, _locale: &str) -> String {
        source.to_string()
    }
}

/// Catalog-less translator: renders the entry tag with its arguments.
///
/// Used when no external catalog is wired in, and as the fallback form for
/// entries the catalog does not know.
pub struct FallbackCatalog;

impl FallbackCatalog {
    fn render_args(args: &Map<String, Value>) -> String {
        let mut parts: Vec<String> = args
            .iter()
            .map(|(k, v)| match v {
                Value::String(s) => format!("{k}={s}"),
                other => format!("{k}={other}"),
            })
            .collect();
        parts.sort();
        parts.join(", ")
    }
}

impl Translator for FallbackCatalog {
    fn message(&self, entry: &ResultEntry, _locale: &str) -> Option<String> {
        if entry.args.is_empty() {
            Some(entry.tag.clone())
        } else {
            Some(format!("{} ({})", entry.tag, Self::render_args(&entry.args)))
        }
    }
}
