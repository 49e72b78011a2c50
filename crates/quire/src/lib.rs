//! Quire - a Django-flavoured text template engine
//!
//! Templates are compiled once into a node tree and rendered against a
//! stack-scoped [`Context`]. The engine provides:
//! - `{{ var|filter:arg }}` expressions with dotted lookups
//! - Block tags from pluggable tag libraries, loadable with `{% load %}`
//! - Template inheritance through `{% extends %}` and `{% block %}`
//! - HTML autoescaping with safe-string tracking
//!
//! # Example
//!
//! ```rust
//! use serde_json::json;
//!
//! let result = quire::render(
//!     "Hello, {{ name|capfirst }}!{% for n in nums %} {{ n }}{% endfor %}",
//!     json!({"name": "world", "nums": [1, 2]}),
//! ).unwrap();
//!
//! assert_eq!(result, "Hello, World! 1 2");
//! ```
//!
//! Named templates come from a [`Loader`] installed on an [`Engine`]:
//!
//! ```rust
//! use quire::{Engine, MemoryLoader};
//! use serde_json::json;
//!
//! let loader = MemoryLoader::new()
//!     .with("base.html", "<h1>{% block title %}Site{% endblock %}</h1>")
//!     .with("page.html", "{% extends 'base.html' %}{% block title %}{{ block.super }}: {{ page }}{% endblock %}");
//! let engine = Engine::default().with_loader(loader);
//!
//! let html = engine.render_to_string("page.html", json!({"page": "About"})).unwrap();
//! assert_eq!(html, "<h1>Site: About</h1>");
//! ```

pub mod context;
pub mod engine;
pub mod error;
pub mod filter_expr;
pub mod filters;
pub mod html_escape;
pub mod library;
pub mod loader;
pub mod node;
pub mod parser;
pub mod providers;
pub mod render;
pub mod settings;
pub mod smartif;
pub mod tags;
pub mod template;
pub mod value;
pub mod variable;

pub use context::{Context, Frame};
pub use engine::Engine;
pub use error::{CallError, Error, Result, TemplateFailure};
pub use library::{helpers, Filter, Library};
pub use loader::{CachedLoader, FilesystemLoader, Loader, MemoryLoader, Origin};
pub use providers::{
    CacheBackend, CatalogTranslator, DummyCache, MemoryCache, NullTranslator, PatternResolver,
    Translator, UrlResolver,
};
pub use quire_syntax::SyntaxError;
pub use settings::Settings;
pub use template::Template;
pub use value::{Callable, Function, Object, Safety, Value};

/// Convenience function: compile and render in one call with a default
/// [`Engine`]
///
/// # Example
///
/// ```rust
/// use serde_json::json;
///
/// let result = quire::render("{{ a|add:b }}", json!({"a": 1, "b": 2})).unwrap();
/// assert_eq!(result, "3");
/// ```
pub fn render(source: &str, data: serde_json::Value) -> Result<String> {
    let engine = Engine::default();
    let template = engine.from_string(source)?;
    let mut ctx = engine.context(data)?;
    template.render(&engine, &mut ctx)
}
