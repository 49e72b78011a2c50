//! Engine settings.
//!
//! Settings are a plain serde struct so they can be loaded from JSON, and
//! they can also be read and written as a flat key/value registry using
//! the upper-case key names templates have always used.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result, SettingAction};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields, default)]
pub struct Settings {
    pub language_code: String,
    pub use_l10n: bool,
    pub use_i18n: bool,
    pub use_tz: bool,
    pub date_format: String,
    pub datetime_format: String,
    pub short_date_format: String,
    pub short_datetime_format: String,
    /// Cache compiled templates by name.
    pub template_cache: bool,
    /// Record token spans, attach locations to syntax errors and let
    /// include failures propagate.
    pub template_debug: bool,
    /// Rendered in place of variables that fail to resolve. A `%s` in the
    /// string is replaced with the variable's source text.
    pub template_string_if_invalid: String,
    pub template_dirs: Vec<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language_code: "en-us".to_string(),
            use_l10n: false,
            use_i18n: true,
            use_tz: false,
            date_format: "N j, Y".to_string(),
            datetime_format: "N j, Y, P".to_string(),
            short_date_format: "m/d/Y".to_string(),
            short_datetime_format: "m/d/Y P".to_string(),
            template_cache: false,
            template_debug: false,
            template_string_if_invalid: String::new(),
            template_dirs: Vec::new(),
        }
    }
}

impl Settings {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read a setting by its upper-case key.
    pub fn get(&self, key: &str) -> Result<JsonValue> {
        let mut all = serde_json::to_value(self)?;
        all.as_object_mut()
            .and_then(|map| map.remove(key))
            .ok_or_else(|| Error::UnknownSetting {
                action: SettingAction::Get,
                key: key.to_string(),
            })
    }

    /// Write a setting by its upper-case key.
    pub fn set(&mut self, key: &str, value: JsonValue) -> Result<()> {
        let mut all = serde_json::to_value(&*self)?;
        let map = all.as_object_mut().ok_or_else(|| Error::UnknownSetting {
            action: SettingAction::Set,
            key: key.to_string(),
        })?;
        match map.get_mut(key) {
            Some(slot) => *slot = value,
            None => {
                return Err(Error::UnknownSetting {
                    action: SettingAction::Set,
                    key: key.to_string(),
                })
            }
        }
        *self = serde_json::from_value(all)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.get("LANGUAGE_CODE").unwrap(), json!("en-us"));
        assert_eq!(settings.get("TEMPLATE_DEBUG").unwrap(), json!(false));
        assert_eq!(settings.get("USE_L10N").unwrap(), json!(false));
    }

    #[test]
    fn test_set_and_get() {
        let mut settings = Settings::default();
        settings
            .set("TEMPLATE_STRING_IF_INVALID", json!("INVALID"))
            .unwrap();
        assert_eq!(settings.template_string_if_invalid, "INVALID");
        settings.set("TEMPLATE_DIRS", json!(["/tmp/a"])).unwrap();
        assert_eq!(settings.template_dirs, vec![PathBuf::from("/tmp/a")]);
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let mut settings = Settings::default();
        let err = settings.set("NO_SUCH_THING", json!(1)).unwrap_err();
        assert_eq!(err.to_string(), "Unable to set an unknown setting 'NO_SUCH_THING'.");
        let err = settings.get("NO_SUCH_THING").unwrap_err();
        assert_eq!(err.to_string(), "Unable to get an unknown setting 'NO_SUCH_THING'.");
    }

    #[test]
    fn test_wrong_type_is_config_error() {
        let mut settings = Settings::default();
        let err = settings.set("TEMPLATE_DEBUG", json!("yes")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(!settings.template_debug);
    }

    #[test]
    fn test_from_json_str() {
        let settings =
            Settings::from_json_str(r#"{"TEMPLATE_DEBUG": true, "LANGUAGE_CODE": "de"}"#).unwrap();
        assert!(settings.template_debug);
        assert_eq!(settings.language_code, "de");
        assert!(Settings::from_json_str(r#"{"BOGUS": 1}"#).is_err());
    }
}
