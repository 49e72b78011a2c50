//! Translation, URL reversing and fragment caching through the engine's
//! collaborators.

use pretty_assertions::assert_eq;
use quire::{CatalogTranslator, DummyCache, Engine, Error, PatternResolver, Result};
use serde_json::json;

fn render(engine: &Engine, source: &str, data: serde_json::Value) -> Result<String> {
    let template = engine.from_string(source)?;
    let mut ctx = engine.context(data)?;
    template.render(engine, &mut ctx)
}

fn german() -> Engine {
    let translator = CatalogTranslator::new()
        .with_language("de", "Deutsch")
        .with_language("en", "English")
        .with_message("de", "Page", "Seite")
        .with_message("de", "%(n)s apple", "%(n)s Apfel")
        .with_message("de", "%(n)s apples", "%(n)s Äpfel")
        .with_message("de", "Hello %(name)s, you have 100%% of %(n)s", "Hallo %(name)s, du hast 100%% von %(n)s");
    let engine = Engine::default().with_translator(translator);
    engine.translator().activate("de");
    engine
}

// ============================================================================
// i18n
// ============================================================================

mod i18n {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn trans_and_translated_literals_share_the_catalog() {
        let engine = german();
        assert_eq!(
            render(&engine, "{% load i18n %}{% trans \"Page\" %}|{{ _(\"Page\") }}|{{ _('Page')|upper }}", json!({})).unwrap(),
            "Seite|Seite|SEITE"
        );
    }

    #[test]
    fn blocktrans_plural_follows_the_counter() {
        let engine = german();
        let source = "{% load i18n %}{% blocktrans count n=items|length %}{{ n }} apple{% plural %}{{ n }} apples{% endblocktrans %}";
        assert_eq!(render(&engine, source, json!({"items": [1]})).unwrap(), "1 Apfel");
        assert_eq!(render(&engine, source, json!({"items": [1, 2, 3]})).unwrap(), "3 Äpfel");
    }

    #[test]
    fn blocktrans_escapes_interpolated_values() {
        let engine = german();
        let source = "{% load i18n %}{% blocktrans with n=count %}Hello {{ name }}, you have 100% of {{ n }}{% endblocktrans %}";
        assert_eq!(
            render(&engine, source, json!({"name": "<Ann>", "count": 3})).unwrap(),
            "Hallo &lt;Ann&gt;, du hast 100% von 3"
        );
    }

    #[test]
    fn deactivated_translator_returns_source_messages() {
        let engine = german();
        engine.translator().deactivate();
        assert_eq!(
            render(&engine, "{% load i18n %}{% trans 'Page' %} {% blocktrans count n=2 %}{{ n }} apple{% plural %}{{ n }} apples{% endblocktrans %}", json!({})).unwrap(),
            "Page 2 apples"
        );
    }

    #[test]
    fn i18n_tags_need_load() {
        let err = render(&german(), "{% trans 'Page' %}", json!({})).unwrap_err();
        assert!(err.to_string().starts_with("Invalid block tag: 'trans'"), "{err}");
    }

    #[test]
    fn available_languages() {
        let engine = german();
        assert_eq!(
            render(
                &engine,
                "{% load i18n %}{% get_available_languages as langs %}{% for code, name in langs %}{{ code }}:{{ name }} {% endfor %}",
                json!({})
            )
            .unwrap(),
            "de:Deutsch en:English "
        );
    }
}

// ============================================================================
// URL reversing
// ============================================================================

mod urls {
    use super::*;
    use pretty_assertions::assert_eq;

    fn engine() -> Engine {
        Engine::default().with_url_resolver(
            PatternResolver::new()
                .route(r"^/article/(?P<id>\d+)/$", "article")
                .route(r"^/archive/(\d+)/(\d+)/$", "archive"),
        )
    }

    #[test]
    fn keyword_and_positional_arguments() {
        let engine = engine();
        assert_eq!(
            render(&engine, "{% url article id=a.id %}", json!({"a": {"id": 7}})).unwrap(),
            "/article/7/"
        );
        assert_eq!(
            render(&engine, "{% url archive 2012 5 %}", json!({})).unwrap(),
            "/archive/2012/5/"
        );
    }

    #[test]
    fn future_url_resolves_the_view_name() {
        let engine = engine();
        assert_eq!(
            render(
                &engine,
                "{% load url from future %}{% url view a.id %}|{% url 'article' a.id %}",
                json!({"view": "article", "a": {"id": 7}})
            )
            .unwrap(),
            "/article/7/|/article/7/"
        );
    }

    #[test]
    fn unmatched_arguments_fail_unless_bound() {
        let engine = engine();
        let err = render(&engine, "{% url archive 2012 %}", json!({})).unwrap_err();
        assert!(matches!(err, Error::NoReverseMatch(_)), "{err:?}");
        assert_eq!(
            err.to_string(),
            "Reverse for 'archive' with arguments '2012' and keyword arguments '' not found."
        );
        assert_eq!(
            render(&engine, "{% url archive 2012 as link %}({{ link }})", json!({})).unwrap(),
            "()"
        );
    }
}

// ============================================================================
// Fragment cache
// ============================================================================

mod fragment_cache {
    use super::*;
    use pretty_assertions::assert_eq;

    const SIDEBAR: &str =
        "{% load cache %}{% cache 300 sidebar user.name %}{{ counter }}{% endcache %}";

    #[test]
    fn fragments_are_reused_per_vary_value() {
        let engine = Engine::default();
        let user = |name: &str, counter: i64| json!({"user": {"name": name}, "counter": counter});
        assert_eq!(render(&engine, SIDEBAR, user("ann", 1)).unwrap(), "1");
        assert_eq!(render(&engine, SIDEBAR, user("ann", 2)).unwrap(), "1");
        assert_eq!(render(&engine, SIDEBAR, user("bo", 3)).unwrap(), "3");
    }

    #[test]
    fn fragments_are_shared_between_templates() {
        let engine = Engine::default();
        let data = json!({"user": {"name": "ann"}, "counter": 1});
        assert_eq!(render(&engine, SIDEBAR, data).unwrap(), "1");
        let other = "{% load cache %}<{% cache 60 sidebar user.name %}fresh{% endcache %}>";
        assert_eq!(
            render(&engine, other, json!({"user": {"name": "ann"}})).unwrap(),
            "<1>"
        );
    }

    #[test]
    fn dummy_cache_never_stores() {
        let engine = Engine::default().with_cache(DummyCache);
        let data = |counter: i64| json!({"user": {"name": "ann"}, "counter": counter});
        assert_eq!(render(&engine, SIDEBAR, data(1)).unwrap(), "1");
        assert_eq!(render(&engine, SIDEBAR, data(2)).unwrap(), "2");
    }
}
