// src/models/preferences.rs
use serde::{Deserialize, Serialize};

/// Per-user preferences document. Created with defaults on first
/// sign-in, merged on update, never deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub theme: Theme,
    pub language: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Preferences {
            theme: Theme::Light,
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "dark" => Theme::Dark,
            _ => Theme::Light,
        }
    }
}

/// Partial update. Absent fields leave the stored values unchanged
/// (merge-write semantics, last-write-wins).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferencesPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub theme: Option<Theme>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Preferences {
    /// Merge a patch into this document, returning the merged result.
    pub fn merged(&self, patch: &PreferencesPatch) -> Preferences {
        Preferences {
            theme: patch.theme.unwrap_or(self.theme),
            language: patch
                .language
                .clone()
                .unwrap_or_else(|| self.language.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_light_en() {
        let prefs = Preferences::default();
        assert_eq!(prefs.theme, Theme::Light);
        assert_eq!(prefs.language, "en");
    }

    #[test]
    fn test_theme_patch_leaves_language_unchanged() {
        let prefs = Preferences {
            theme: Theme::Light,
            language: "de".to_string(),
        };
        let patch = PreferencesPatch {
            theme: Some(Theme::Dark),
            language: None,
        };
        let merged = prefs.merged(&patch);
        assert_eq!(merged.theme, Theme::Dark);
        assert_eq!(merged.language, "de");
    }

    #[test]
    fn test_empty_patch_is_identity() {
        let prefs = Preferences::default();
        assert_eq!(prefs.merged(&PreferencesPatch::default()), prefs);
    }

    #[test]
    fn test_patch_serde_skips_absent_fields() {
        let patch: PreferencesPatch = serde_json::from_str(r#"{"theme":"dark"}"#).unwrap();
        assert_eq!(patch.theme, Some(Theme::Dark));
        assert!(patch.language.is_none());
        assert_eq!(serde_json::to_string(&patch).unwrap(), r#"{"theme":"dark"}"#);
    }
}
