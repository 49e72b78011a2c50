//! Collaborators the engine calls out to: translation, URL reversing and
//! fragment caching.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;
use regex::Regex;

use crate::error::{Error, Result};
use crate::value::Value;

// ============================================================================
// Translation
// ============================================================================

pub trait Translator: Send + Sync + fmt::Debug {
    fn activate(&self, language: &str);

    fn deactivate(&self);

    fn get_language(&self) -> Option<String>;

    /// Available languages as `(code, name)` pairs.
    fn get_languages(&self) -> Vec<(String, String)>;

    fn ugettext(&self, message: &str) -> String;

    fn pgettext(&self, context: &str, message: &str) -> String;

    fn ungettext(&self, singular: &str, plural: &str, count: i64) -> String;

    fn npgettext(&self, context: &str, singular: &str, plural: &str, count: i64) -> String;
}

/// Returns messages untranslated, choosing plurals by the English rule.
#[derive(Debug, Default)]
pub struct NullTranslator {
    language: Mutex<Option<String>>,
}

impl Translator for NullTranslator {
    fn activate(&self, language: &str) {
        *self.language.lock() = Some(language.to_string());
    }

    fn deactivate(&self) {
        *self.language.lock() = None;
    }

    fn get_language(&self) -> Option<String> {
        self.language.lock().clone()
    }

    fn get_languages(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    fn ugettext(&self, message: &str) -> String {
        message.to_string()
    }

    fn pgettext(&self, _context: &str, message: &str) -> String {
        message.to_string()
    }

    fn ungettext(&self, singular: &str, plural: &str, count: i64) -> String {
        if count == 1 { singular } else { plural }.to_string()
    }

    fn npgettext(&self, _context: &str, singular: &str, plural: &str, count: i64) -> String {
        self.ungettext(singular, plural, count)
    }
}

/// Looks messages up in per-language catalogs, falling back to the
/// message itself.
#[derive(Debug, Default)]
pub struct CatalogTranslator {
    languages: Vec<(String, String)>,
    messages: HashMap<String, HashMap<String, String>>,
    language: Mutex<Option<String>>,
}

impl CatalogTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_language(mut self, code: impl Into<String>, name: impl Into<String>) -> Self {
        self.languages.push((code.into(), name.into()));
        self
    }

    pub fn with_message(
        mut self,
        language: &str,
        message: impl Into<String>,
        translation: impl Into<String>,
    ) -> Self {
        self.messages
            .entry(language.to_string())
            .or_default()
            .insert(message.into(), translation.into());
        self
    }
}

impl Translator for CatalogTranslator {
    fn activate(&self, language: &str) {
        *self.language.lock() = Some(language.to_string());
    }

    fn deactivate(&self) {
        *self.language.lock() = None;
    }

    fn get_language(&self) -> Option<String> {
        self.language.lock().clone()
    }

    fn get_languages(&self) -> Vec<(String, String)> {
        self.languages.clone()
    }

    fn ugettext(&self, message: &str) -> String {
        let language = self.language.lock();
        language
            .as_deref()
            .and_then(|lang| self.messages.get(lang))
            .and_then(|catalog| catalog.get(message))
            .cloned()
            .unwrap_or_else(|| message.to_string())
    }

    fn pgettext(&self, _context: &str, message: &str) -> String {
        self.ugettext(message)
    }

    fn ungettext(&self, singular: &str, plural: &str, count: i64) -> String {
        self.ugettext(if count == 1 { singular } else { plural })
    }

    fn npgettext(&self, _context: &str, singular: &str, plural: &str, count: i64) -> String {
        self.ungettext(singular, plural, count)
    }
}

// ============================================================================
// URL reversing
// ============================================================================

pub trait UrlResolver: Send + Sync + fmt::Debug {
    /// Build the URL for `view`, or fail with [`Error::NoReverseMatch`].
    fn reverse(
        &self,
        view: &str,
        args: &[Value],
        kwargs: &IndexMap<String, Value>,
        current_app: Option<&str>,
    ) -> Result<String>;
}

static GROUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\((?:\?P<(?P<name>[^>]+)>)?[^)]+\)").expect("group pattern is valid")
});

/// Reverses URLs from regex-style patterns such as
/// `^/article/(?P<id>\d+)/$`, filling each group from the arguments.
#[derive(Debug, Clone, Default)]
pub struct PatternResolver {
    rules: Vec<(String, String)>,
}

impl PatternResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, pattern: impl Into<String>, view: impl Into<String>) -> Self {
        self.rules.push((pattern.into(), view.into()));
        self
    }

    fn populate(pattern: &str, values: &[String]) -> String {
        let body = pattern.trim_start_matches('^').trim_end_matches('$');
        let mut values = values.iter();
        let populated = GROUP_RE.replace_all(body, |_: &regex::Captures<'_>| {
            values.next().cloned().unwrap_or_default()
        });
        iri_to_uri(&populated)
    }
}

impl UrlResolver for PatternResolver {
    fn reverse(
        &self,
        view: &str,
        args: &[Value],
        kwargs: &IndexMap<String, Value>,
        _current_app: Option<&str>,
    ) -> Result<String> {
        for (pattern, _) in self.rules.iter().filter(|(_, name)| name == view) {
            let groups: Vec<Option<String>> = GROUP_RE
                .captures_iter(pattern)
                .map(|caps| caps.name("name").map(|m| m.as_str().to_string()))
                .collect();

            let all_named = groups
                .iter()
                .all(|name| name.as_ref().is_some_and(|n| kwargs.contains_key(n)));
            if !kwargs.is_empty() && kwargs.len() == groups.len() && all_named {
                let values: Vec<String> = groups
                    .iter()
                    .flatten()
                    .map(|name| kwargs.get(name).map(Value::to_string).unwrap_or_default())
                    .collect();
                return Ok(Self::populate(pattern, &values));
            }
            if kwargs.is_empty() && args.len() == groups.len() {
                let values: Vec<String> = args.iter().map(Value::to_string).collect();
                return Ok(Self::populate(pattern, &values));
            }
        }

        Err(no_reverse_match(view, args, kwargs))
    }
}

pub(crate) fn no_reverse_match(view: &str, args: &[Value], kwargs: &IndexMap<String, Value>) -> Error {
    let args: Vec<String> = args.iter().map(Value::to_string).collect();
    let kwargs: Vec<String> = kwargs.iter().map(|(k, v)| format!("{k}={v}")).collect();
    Error::NoReverseMatch(format!(
        "Reverse for '{view}' with arguments '{}' and keyword arguments '{}' not found.",
        args.join(", "),
        kwargs.join(", ")
    ))
}

/// Percent-encode everything except the characters that are legal in a URI.
pub(crate) fn iri_to_uri(iri: &str) -> String {
    quote(iri, "/#%[]=:;$&()+,!?*@'~")
}

/// Percent-encode `text`, leaving ASCII alphanumerics, `_.-` and `safe`.
pub(crate) fn quote(text: &str, safe: &str) -> String {
    let mut quoted = String::with_capacity(text.len());
    for byte in text.bytes() {
        let c = char::from(byte);
        if byte.is_ascii_alphanumeric() || "_.-".contains(c) || (byte.is_ascii() && safe.contains(c))
        {
            quoted.push(c);
        } else {
            quoted.push_str(&format!("%{byte:02X}"));
        }
    }
    quoted
}

// ============================================================================
// Fragment cache
// ============================================================================

pub trait CacheBackend: Send + Sync + fmt::Debug {
    fn get(&self, key: &str) -> Option<String>;

    /// Store `value` for `timeout`; `None` keeps it until evicted.
    fn set(&self, key: &str, value: String, timeout: Option<Duration>);
}

/// An in-process cache whose entries expire after their timeout.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, Some(expires))) if *expires <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    fn set(&self, key: &str, value: String, timeout: Option<Duration>) {
        let expires = timeout.map(|t| Instant::now() + t);
        self.entries.lock().insert(key.to_string(), (value, expires));
    }
}

/// Never stores anything.
#[derive(Debug, Default)]
pub struct DummyCache;

impl CacheBackend for DummyCache {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn set(&self, _key: &str, _value: String, _timeout: Option<Duration>) {}
}
