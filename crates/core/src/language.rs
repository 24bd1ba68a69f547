//! The two reply languages the assistant can speak.

use serde::{Deserialize, Serialize};

/// Reply language selected from a free-form IETF tag.
///
/// Anything starting with `en` is English; everything else is Ukrainian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Locale {
    #[serde(rename = "uk")]
    Ukrainian,
    #[serde(rename = "en")]
    English,
}

impl Locale {
    pub fn from_tag(tag: &str) -> Self {
        if tag.trim().to_ascii_lowercase().starts_with("en") {
            Locale::English
        } else {
            Locale::Ukrainian
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Locale::Ukrainian => "uk",
            Locale::English => "en",
        }
    }

    /// Pick the string matching this locale.
    pub fn pick<'a>(&self, ukrainian: &'a str, english: &'a str) -> &'a str {
        match self {
            Locale::Ukrainian => ukrainian,
            Locale::English => english,
        }
    }
}
