//! The engine: settings, libraries, loaders and collaborators in one place.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value as JsonValue;

use crate::context::{Context, Frame};
use crate::error::{Error, Result};
use crate::library::{Libraries, Library};
use crate::loader::{FilesystemLoader, Loader, Origin};
use crate::providers::{CacheBackend, MemoryCache, NullTranslator, Translator, UrlResolver};
use crate::settings::Settings;
use crate::template::Template;
use crate::value::Value;

/// Compiles and renders templates.
///
/// # Example
///
/// ```rust
/// use quire::{Engine, MemoryLoader};
/// use serde_json::json;
///
/// let engine = Engine::default().with_loader(
///     MemoryLoader::new()
///         .with("base.html", "<h1>{% block title %}{% endblock %}</h1>")
///         .with("page.html", "{% extends 'base.html' %}{% block title %}{{ t }}{% endblock %}"),
/// );
/// let html = engine.render_to_string("page.html", json!({"t": "Hi"})).unwrap();
/// assert_eq!(html, "<h1>Hi</h1>");
/// ```
pub struct Engine {
    settings: Settings,
    libraries: Libraries,
    /// Built from `TEMPLATE_DIRS`; searched before the other loaders.
    dirs_loader: Option<FilesystemLoader>,
    loaders: Vec<Box<dyn Loader>>,
    translator: Arc<dyn Translator>,
    url_resolver: Option<Arc<dyn UrlResolver>>,
    cache: Arc<dyn CacheBackend>,
    templates: Mutex<HashMap<String, Arc<Template>>>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("settings", &self.settings)
            .field("loaders", &self.loaders)
            .finish_non_exhaustive()
    }
}

fn dirs_loader(settings: &Settings) -> Option<FilesystemLoader> {
    (!settings.template_dirs.is_empty())
        .then(|| FilesystemLoader::new(settings.template_dirs.iter().cloned()))
}

impl Engine {
    pub fn new(settings: Settings) -> Self {
        Self {
            dirs_loader: dirs_loader(&settings),
            settings,
            libraries: Libraries::default(),
            loaders: Vec::new(),
            translator: Arc::new(NullTranslator::default()),
            url_resolver: None,
            cache: Arc::new(MemoryCache::new()),
            templates: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_loader(mut self, loader: impl Loader + 'static) -> Self {
        self.loaders.push(Box::new(loader));
        self
    }

    /// Make a library available to `{% load name %}`.
    pub fn with_library(mut self, name: impl Into<String>, library: Library) -> Self {
        self.libraries.insert(name, library);
        self
    }

    /// Add a library whose tags and filters every template sees.
    pub fn with_builtins(mut self, library: Library) -> Self {
        self.libraries.add_builtin(library);
        self
    }

    pub fn with_translator(mut self, translator: impl Translator + 'static) -> Self {
        self.translator = Arc::new(translator);
        self
    }

    pub fn with_url_resolver(mut self, resolver: impl UrlResolver + 'static) -> Self {
        self.url_resolver = Some(Arc::new(resolver));
        self
    }

    pub fn with_cache(mut self, cache: impl CacheBackend + 'static) -> Self {
        self.cache = Arc::new(cache);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Change one setting by key. Compiled templates are discarded.
    pub fn set_setting(&mut self, key: &str, value: JsonValue) -> Result<()> {
        self.settings.set(key, value)?;
        self.dirs_loader = dirs_loader(&self.settings);
        self.templates.lock().clear();
        for loader in &self.loaders {
            loader.reset();
        }
        Ok(())
    }

    pub fn libraries(&self) -> &Libraries {
        &self.libraries
    }

    pub fn translator(&self) -> &dyn Translator {
        self.translator.as_ref()
    }

    pub fn url_resolver(&self) -> Option<&dyn UrlResolver> {
        self.url_resolver.as_deref()
    }

    pub fn cache(&self) -> &dyn CacheBackend {
        self.cache.as_ref()
    }

    /// A fresh context for `data`, carrying the engine's locale defaults.
    pub fn context(&self, data: JsonValue) -> Result<Context> {
        let mut ctx = Context::from_json(data)?;
        ctx.use_l10n = Some(self.settings.use_l10n);
        ctx.use_tz = Some(self.settings.use_tz);
        Ok(ctx)
    }

    /// Compile a template from source text.
    pub fn from_string(&self, source: &str) -> Result<Template> {
        Template::compile(self, source, None, None, Vec::new())
    }

    /// Find and compile a template by name.
    pub fn get_template(&self, name: &str) -> Result<Arc<Template>> {
        self.get_template_nested(name, &[])
    }

    /// Load a template on behalf of templates already being compiled.
    pub(crate) fn get_template_nested(&self, name: &str, chain: &[String]) -> Result<Arc<Template>> {
        if chain.iter().any(|seen| seen == name) {
            return Err(Error::syntax(format!("Circular include detected: {name}")));
        }
        if self.settings.template_cache {
            if let Some(template) = self.templates.lock().get(name) {
                log::debug!("compiled template cache hit: {name}");
                return Ok(Arc::clone(template));
            }
        }

        let (source, origin) = self.find_template_source(name)?;
        let origin = self.settings.template_debug.then_some(origin);
        let mut chain = chain.to_vec();
        chain.push(name.to_string());
        let template = Arc::new(Template::compile(self, &source, Some(name), origin, chain)?);

        if self.settings.template_cache {
            self.templates
                .lock()
                .insert(name.to_string(), Arc::clone(&template));
        }
        Ok(template)
    }

    fn find_template_source(&self, name: &str) -> Result<(String, Origin)> {
        let loaders = self
            .dirs_loader
            .iter()
            .map(|loader| loader as &dyn Loader)
            .chain(self.loaders.iter().map(|loader| loader.as_ref()));
        for loader in loaders {
            match loader.load_template_source(name, None) {
                Ok((source, display_name)) => {
                    log::debug!("loaded template {name} from {display_name}");
                    return Ok((source, Origin::new(display_name, Some(loader.name()))));
                }
                Err(Error::TemplateDoesNotExist(reason)) => {
                    log::debug!("{} loader has no template {name}: {reason}", loader.name());
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::TemplateDoesNotExist(name.to_string()))
    }

    /// The first of `names` that exists.
    pub fn select_template(&self, names: &[&str]) -> Result<Arc<Template>> {
        if names.is_empty() {
            return Err(Error::TemplateDoesNotExist(
                "No template names provided".to_string(),
            ));
        }
        let mut missing = Vec::new();
        for name in names {
            match self.get_template(name) {
                Ok(template) => return Ok(template),
                Err(Error::TemplateDoesNotExist(_)) => missing.push(*name),
                Err(e) => return Err(e),
            }
        }
        Err(Error::TemplateDoesNotExist(missing.join(", ")))
    }

    pub fn render_to_string(&self, name: &str, data: JsonValue) -> Result<String> {
        let template = self.get_template(name)?;
        let mut ctx = self.context(data)?;
        template.render(self, &mut ctx)
    }

    /// Render with `data` pushed onto an existing context for the
    /// duration of the render.
    pub fn render_to_string_in(
        &self,
        name: &str,
        data: JsonValue,
        ctx: &mut Context,
    ) -> Result<String> {
        let template = self.get_template(name)?;
        let frame: Frame = match Value::from_json(data) {
            Value::Map(map) => map.as_ref().clone(),
            Value::None => Frame::new(),
            other => return Err(Error::InvalidContext(other.type_name())),
        };
        ctx.update(frame);
        let result = template.render(self, ctx);
        ctx.pop()?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn engine() -> Engine {
        Engine::default().with_loader(
            MemoryLoader::new()
                .with("hello", "Hello {{ name }}")
                .with("loop_a", "{% include 'loop_b' %}")
                .with("loop_b", "{% include 'loop_a' %}"),
        )
    }

    #[test]
    fn test_render_to_string() {
        let out = engine()
            .render_to_string("hello", json!({"name": "<b>"}))
            .unwrap();
        assert_eq!(out, "Hello &lt;b&gt;");
    }

    #[test]
    fn test_render_to_string_in_restores_stack() {
        let engine = engine();
        let mut ctx = Context::from_json(json!({"name": "outer"})).unwrap();
        let out = engine
            .render_to_string_in("hello", json!({"name": "inner"}), &mut ctx)
            .unwrap();
        assert_eq!(out, "Hello inner");
        assert_eq!(ctx.depth(), 1);
        assert_eq!(ctx.get("name"), Some(&Value::from("outer")));
    }

    #[test]
    fn test_select_template() {
        let engine = engine();
        assert_eq!(engine.select_template(&["nope", "hello"]).unwrap().name(), "hello");
        let err = engine.select_template(&["a", "b"]).unwrap_err();
        assert_eq!(err.to_string(), "a, b");
        let err = engine.select_template(&[]).unwrap_err();
        assert_eq!(err.to_string(), "No template names provided");
    }

    #[test]
    fn test_circular_include_is_rejected() {
        let mut engine = engine();
        engine.set_setting("TEMPLATE_DEBUG", json!(true)).unwrap();
        let err = engine.get_template("loop_a").unwrap_err();
        assert_eq!(err.to_string(), "Circular include detected: loop_a");
    }

    #[test]
    fn test_compiled_templates_are_cached_when_enabled() {
        let mut engine = engine();
        let first = engine.get_template("hello").unwrap();
        assert!(!Arc::ptr_eq(&first, &engine.get_template("hello").unwrap()));

        engine.set_setting("TEMPLATE_CACHE", json!(true)).unwrap();
        let first = engine.get_template("hello").unwrap();
        assert!(Arc::ptr_eq(&first, &engine.get_template("hello").unwrap()));
    }

    #[test]
    fn test_origin_recorded_in_debug() {
        let mut engine = engine();
        assert!(engine.get_template("hello").unwrap().origin().is_none());
        engine.set_setting("TEMPLATE_DEBUG", json!(true)).unwrap();
        let template = engine.get_template("hello").unwrap();
        let origin = template.origin().unwrap();
        assert_eq!(origin.loader_name.as_deref(), Some("memory"));
    }

    #[test]
    fn test_unknown_setting() {
        let mut engine = engine();
        let err = engine.set_setting("NOPE", json!(1)).unwrap_err();
        assert_eq!(err.to_string(), "Unable to set an unknown setting 'NOPE'.");
    }
}
