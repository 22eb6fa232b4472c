//! Locale-aware notification templates.
//!
//! Templates are plain-text deploy-time assets laid out as
//! `<root>/<language>/<event>.txt` (message body) and
//! `<root>/<language>/<event>.subject.txt` (email subject). A missing
//! locale-specific file falls back to the default locale; loaded templates
//! are cached for the life of the process since the assets never change
//! after deploy.
//!
//! Interpolation replaces `{{token}}` with the stringified variable; an
//! absent variable renders as the empty string; anything else, including
//! malformed `{{` forms, passes through unchanged.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::warn;

/// Fallback locale when a language-specific template is missing.
pub const DEFAULT_LOCALE: &str = "en";

/// Template error type.
#[derive(Error, Debug)]
pub enum TemplateError {
    /// Neither the requested locale nor the default locale has the template.
    #[error("template '{event}' missing for locale '{language}' and default locale")]
    Missing { language: String, event: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using TemplateError.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Loads and caches per-(locale, event) template assets.
pub struct TemplateStore {
    root: PathBuf,
    /// Write-once cache keyed by (requested language, file name).
    cache: RwLock<HashMap<(String, String), Arc<str>>>,
}

impl TemplateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Render the message body for `(language, event)` with the given
    /// variables.
    pub fn render(
        &self,
        language: &str,
        event: &str,
        variables: &Map<String, Value>,
    ) -> TemplateResult<String> {
        let template = self.load(language, event, &format!("{event}.txt"))?;
        Ok(interpolate(&template, variables))
    }

    /// Render the email subject line for `(language, event)`.
    pub fn subject(
        &self,
        language: &str,
        event: &str,
        variables: &Map<String, Value>,
    ) -> TemplateResult<String> {
        let template = self.load(language, event, &format!("{event}.subject.txt"))?;
        Ok(interpolate(&template, variables).trim().to_string())
    }

    fn load(&self, language: &str, event: &str, file_name: &str) -> TemplateResult<Arc<str>> {
        let key = (language.to_string(), file_name.to_string());

        // Fast path: already cached
        if let Some(cached) = self.cache.read().expect("lock poisoned").get(&key) {
            return Ok(cached.clone());
        }

        let text = match self.read_asset(language, file_name) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if language == DEFAULT_LOCALE {
                    return Err(TemplateError::Missing {
                        language: language.to_string(),
                        event: event.to_string(),
                    });
                }
                warn!(language, event, "locale template missing, falling back to default locale");
                match self.read_asset(DEFAULT_LOCALE, file_name) {
                    Ok(text) => text,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        return Err(TemplateError::Missing {
                            language: language.to_string(),
                            event: event.to_string(),
                        });
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(e) => return Err(e.into()),
        };

        let template: Arc<str> = Arc::from(text.as_str());
        let mut cache = self.cache.write().expect("lock poisoned");
        // First writer wins; the assets are immutable so any race loads
        // identical content.
        Ok(cache.entry(key).or_insert(template).clone())
    }

    fn read_asset(&self, language: &str, file_name: &str) -> std::io::Result<String> {
        std::fs::read_to_string(self.root.join(language).join(file_name))
    }
}

/// Replace `{{token}}` occurrences with stringified variables.
pub fn interpolate(template: &str, variables: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        match after.find("}}") {
            Some(end) if is_token(&after[..end]) => {
                if let Some(value) = variables.get(&after[..end]) {
                    out.push_str(&stringify(value));
                }
                rest = &after[end + 2..];
            }
            _ => {
                // No closing braces or not a plain token: pass through
                out.push_str("{{");
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::{tempdir, TempDir};

    fn vars(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    fn template_root() -> TempDir {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("en")).unwrap();
        std::fs::create_dir_all(dir.path().join("de")).unwrap();
        std::fs::write(
            dir.path().join("en/reservation.created.txt"),
            "Hi {{guestName}}, your table for {{partySize}} is confirmed.",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("en/reservation.created.subject.txt"),
            "Reservation confirmed\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("de/reservation.created.txt"),
            "Hallo {{guestName}}, Ihr Tisch ist reserviert.",
        )
        .unwrap();
        dir
    }

    #[test]
    fn renders_with_variables() {
        let root = template_root();
        let store = TemplateStore::new(root.path());

        let text = store
            .render(
                "en",
                "reservation.created",
                &vars(json!({"guestName": "Ana", "partySize": 4})),
            )
            .unwrap();

        assert_eq!(text, "Hi Ana, your table for 4 is confirmed.");
    }

    #[test]
    fn absent_variable_renders_empty() {
        let out = interpolate("Hi {{missing}}", &Map::new());
        assert_eq!(out, "Hi ");
    }

    #[test]
    fn malformed_forms_pass_through() {
        let variables = vars(json!({"a": "x"}));
        assert_eq!(interpolate("{{", &variables), "{{");
        assert_eq!(interpolate("{{}}", &variables), "{{}}");
        assert_eq!(interpolate("{{not closed", &variables), "{{not closed");
        assert_eq!(
            interpolate("{{ spaced }}", &variables),
            "{{ spaced }}"
        );
        assert_eq!(interpolate("plain text", &variables), "plain text");
    }

    #[test]
    fn adjacent_and_repeated_tokens() {
        let variables = vars(json!({"a": "1", "b": "2"}));
        assert_eq!(interpolate("{{a}}{{b}}{{a}}", &variables), "121");
    }

    #[test]
    fn null_variable_renders_empty() {
        let variables = vars(json!({"a": null}));
        assert_eq!(interpolate("[{{a}}]", &variables), "[]");
    }

    #[test]
    fn locale_specific_template_wins() {
        let root = template_root();
        let store = TemplateStore::new(root.path());

        let text = store
            .render("de", "reservation.created", &vars(json!({"guestName": "Jonas"})))
            .unwrap();

        assert_eq!(text, "Hallo Jonas, Ihr Tisch ist reserviert.");
    }

    #[test]
    fn missing_locale_falls_back_to_default() {
        let root = template_root();
        let store = TemplateStore::new(root.path());

        let text = store
            .render(
                "fr",
                "reservation.created",
                &vars(json!({"guestName": "Luc", "partySize": 2})),
            )
            .unwrap();

        assert_eq!(text, "Hi Luc, your table for 2 is confirmed.");
    }

    #[test]
    fn missing_default_template_errors() {
        let root = template_root();
        let store = TemplateStore::new(root.path());

        let err = store
            .render("en", "reservation.unknown", &Map::new())
            .unwrap_err();

        assert!(matches!(err, TemplateError::Missing { .. }));
    }

    #[test]
    fn subject_resolves_with_fallback_and_trims() {
        let root = template_root();
        let store = TemplateStore::new(root.path());

        let subject = store
            .subject("de", "reservation.created", &Map::new())
            .unwrap();

        assert_eq!(subject, "Reservation confirmed");
    }

    #[test]
    fn cache_survives_asset_removal() {
        let root = template_root();
        let store = TemplateStore::new(root.path());

        let first = store
            .render("en", "reservation.created", &vars(json!({"guestName": "Ana"})))
            .unwrap();

        // Template files are static deploy-time assets; once loaded, the
        // cache serves them without touching the filesystem.
        std::fs::remove_file(root.path().join("en/reservation.created.txt")).unwrap();

        let second = store
            .render("en", "reservation.created", &vars(json!({"guestName": "Ana"})))
            .unwrap();

        assert_eq!(first, second);
    }
}
