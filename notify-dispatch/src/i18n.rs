//! Localization of user-facing notification text.
//!
//! Catalogs live in `locales/*.yml` and are compiled in by `rust-i18n`.
//! Arguments use `%{name}` placeholders.

/// Locale used when none is configured.
pub const DEFAULT_LOCALE: &str = "en";

/// Translates message keys into user-facing text.
///
/// Implementations must be pure: the same key, arguments and locale always
/// produce the same string.
pub trait Translator: Send + Sync {
    fn translate(&self, key: &str, args: &[(&str, &str)]) -> String;
}

/// [`Translator`] backed by the compiled `rust-i18n` catalogs.
#[derive(Debug, Clone)]
pub struct I18nTranslator {
    locale: String,
}

impl I18nTranslator {
    pub fn new(locale: impl Into<String>) -> Self {
        Self {
            locale: locale.into(),
        }
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }
}

impl Default for I18nTranslator {
    fn default() -> Self {
        Self::new(DEFAULT_LOCALE)
    }
}

impl Translator for I18nTranslator {
    fn translate(&self, key: &str, args: &[(&str, &str)]) -> String {
        let template = rust_i18n::t!(key, locale = self.locale.as_str());
        interpolate(&template, args)
    }
}

/// Replace every `%{name}` in `template` with the matching argument.
///
/// Placeholders without a matching argument are left untouched.
pub fn interpolate(template: &str, args: &[(&str, &str)]) -> String {
    args.iter().fold(template.to_string(), |acc, (name, value)| {
        acc.replace(&format!("%{{{}}}", name), value)
    })
}

/// Locales with a compiled catalog.
pub fn available_locales() -> Vec<String> {
    rust_i18n::available_locales!()
        .into_iter()
        .map(|l| l.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate() {
        assert_eq!(
            interpolate("Hello %{name}, from %{org}", &[("name", "Ann"), ("org", "ACME")]),
            "Hello Ann, from ACME"
        );
        assert_eq!(interpolate("Hi %{who}", &[]), "Hi %{who}");
    }

    #[test]
    fn test_catalog_lookup() {
        let en = I18nTranslator::new("en");
        assert_eq!(en.translate("NotificationTitle", &[]), "Notification");

        let fr = I18nTranslator::new("fr");
        assert_eq!(
            fr.translate(
                "YouReceiveMailBecauseOfNotification",
                &[("application", "ERP"), ("organization", "ACME")]
            ),
            "Ce message automatique vous est envoyé par ERP (ACME) suite à une notification."
        );
    }

    #[test]
    fn test_catalogs_compiled() {
        let locales = available_locales();
        assert!(locales.iter().any(|l| l == "en"));
        assert!(locales.iter().any(|l| l == "fr"));
    }
}
