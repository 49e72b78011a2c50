//! Host objects and custom tag libraries plugged into the engine.

use pretty_assertions::assert_eq;
use quire::{
    helpers, CallError, Context, Engine, Error, Filter, Function, Library, Object, Result,
    TemplateFailure, Value,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("access denied")]
struct Denied {
    silent: bool,
}

impl TemplateFailure for Denied {
    fn is_silent(&self) -> bool {
        self.silent
    }
}

#[derive(Debug)]
struct User {
    name: String,
    admin: bool,
    roles: Vec<&'static str>,
}

impl Object for User {
    fn get_attr(&self, name: &str) -> std::result::Result<Option<Value>, Box<dyn TemplateFailure>> {
        Ok(match name {
            "name" => Some(Value::from(self.name.as_str())),
            "is_admin" => Some(Value::from(self.admin)),
            "greeting" => {
                let name = self.name.clone();
                Some(Value::function(move || Ok(Value::from(format!("Hi {name}")))))
            }
            "delete" => Some(Value::callable(
                Function::new(|| Ok(Value::from("deleted"))).alters_data(),
            )),
            "render_row" => Some(Value::function(|| Err(CallError::MissingArguments))),
            "secret" => return Err(Box::new(Denied { silent: true })),
            "private" => return Err(Box::new(Denied { silent: false })),
            _ => None,
        })
    }

    fn iterate(&self) -> Option<Vec<Value>> {
        Some(self.roles.iter().map(|role| Value::from(*role)).collect())
    }

    fn display(&self) -> String {
        self.name.clone()
    }
}

fn ann() -> Value {
    Value::object(User {
        name: "Ann".to_string(),
        admin: true,
        roles: vec!["editor", "<root>"],
    })
}

fn render_with_user(engine: &Engine, source: &str) -> Result<String> {
    let template = engine.from_string(source)?;
    let mut ctx = Context::new();
    ctx.set("user", ann());
    template.render(engine, &mut ctx)
}

// ============================================================================
// Host objects
// ============================================================================

mod host_objects {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn attributes_and_methods() {
        let engine = Engine::default();
        assert_eq!(
            render_with_user(
                &engine,
                "{{ user }}|{{ user.name }}|{{ user.greeting }}|{% if user.is_admin %}admin{% endif %}"
            )
            .unwrap(),
            "Ann|Ann|Hi Ann|admin"
        );
    }

    #[test]
    fn iteration_and_membership() {
        let engine = Engine::default();
        assert_eq!(
            render_with_user(
                &engine,
                "{% for r in user %}{{ r }};{% endfor %}{% if 'editor' in user %}!{% endif %}"
            )
            .unwrap(),
            "editor;&lt;root&gt;;!"
        );
    }

    #[test]
    fn uncallable_methods_render_the_invalid_string() {
        let mut engine = Engine::default();
        engine
            .set_setting("TEMPLATE_STRING_IF_INVALID", json!("?"))
            .unwrap();
        assert_eq!(
            render_with_user(&engine, "[{{ user.delete }}][{{ user.render_row }}][{{ user.secret }}]")
                .unwrap(),
            "[?][?][?]"
        );
    }

    #[test]
    fn loud_failures_propagate() {
        let err = render_with_user(&Engine::default(), "{{ user.private }}").unwrap_err();
        assert!(matches!(err, Error::Raised(_)), "{err:?}");
        assert_eq!(err.to_string(), "access denied");
    }

    #[test]
    fn missing_attribute_is_empty() {
        assert_eq!(
            render_with_user(&Engine::default(), "[{{ user.nope }}]").unwrap(),
            "[]"
        );
    }
}

// ============================================================================
// Custom libraries
// ============================================================================

mod custom_libraries {
    use super::*;
    use pretty_assertions::assert_eq;

    fn site_library() -> Library {
        let mut lib = Library::new();
        lib.simple_tag("greet", &["who", "punct"], 1, true, |args, kwargs, ctx| {
            let punct = args
                .get(1)
                .or_else(|| kwargs.get("punct"))
                .map_or_else(|| "!".to_string(), Value::to_string);
            let site = ctx
                .and_then(|ctx| ctx.get("site"))
                .map(Value::to_string)
                .unwrap_or_default();
            Ok(Value::from(format!("hi {}{punct} ({site})", args[0])))
        })
        .filter(
            Filter::new("repeat", |value, args, _| {
                let times = args[0].as_i64().unwrap_or(1).max(0) as usize;
                Ok(Value::from(value.to_string().repeat(times)))
            })
            .args(1, 0)
            .safe(),
        );
        helpers::naive_if_tag(&mut lib, "ifpositive", |values| {
            values
                .first()
                .and_then(Value::as_f64)
                .is_some_and(|n| n > 0.0)
        });
        lib
    }

    fn render(engine: &Engine, source: &str, data: serde_json::Value) -> Result<String> {
        let template = engine.from_string(source)?;
        let mut ctx = engine.context(data)?;
        template.render(engine, &mut ctx)
    }

    #[test]
    fn builtins_extension_is_always_available() {
        let engine = Engine::default().with_builtins(site_library());
        assert_eq!(
            render(
                &engine,
                "{% greet 'Ann' %} {% greet '<Bo>' punct='?' %} {{ 'ab'|repeat:2 }}",
                json!({"site": "S"})
            )
            .unwrap(),
            "hi Ann! (S) hi &lt;Bo&gt;? (S) abab"
        );
    }

    #[test]
    fn naive_if_tag_with_else() {
        let engine = Engine::default().with_builtins(site_library());
        let source = "{% ifpositive n %}+{% else %}-{% endifpositive %}";
        assert_eq!(render(&engine, source, json!({"n": 3})).unwrap(), "+");
        assert_eq!(render(&engine, source, json!({"n": -1})).unwrap(), "-");
        assert_eq!(render(&engine, source, json!({})).unwrap(), "-");
    }

    #[test]
    fn named_library_needs_load() {
        let engine = Engine::default().with_library("site", site_library());
        assert!(render(&engine, "{% greet 'x' %}", json!({})).is_err());
        assert_eq!(
            render(&engine, "{% load greet from site %}{% greet 'x' %}", json!({})).unwrap(),
            "hi x! ()"
        );
    }

    #[test]
    fn simple_tag_argument_errors() {
        let engine = Engine::default().with_builtins(site_library());
        let err = render(&engine, "{% greet %}", json!({})).unwrap_err();
        assert_eq!(
            err.to_string(),
            "'greet' did not receive value(s) for the argument(s): 'who'"
        );
        let err = render(&engine, "{% greet 'a' 'b' 'c' %}", json!({})).unwrap_err();
        assert_eq!(err.to_string(), "'greet' received too many positional arguments");
    }
}
