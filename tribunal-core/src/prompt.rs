//! Prompt construction and model-output cleanup shared by all backends.
//!
//! Every backend receives prompts built here so that candidate translations
//! differ only by model, never by instructions. `clean_output` is applied to
//! every final text regardless of which backend produced it.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Languages a translation can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetLanguage {
    #[serde(rename = "ru")]
    Russian,
    #[serde(rename = "zh")]
    Chinese,
    #[serde(rename = "vi")]
    Vietnamese,
    #[serde(rename = "fr")]
    French,
}

impl TargetLanguage {
    /// Short language code used at the single-shot backend boundary.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Russian => "ru",
            Self::Chinese => "zh",
            Self::Vietnamese => "vi",
            Self::French => "fr",
        }
    }

    /// English display name, used inside prompts and boilerplate prefixes.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Russian => "Russian",
            Self::Chinese => "Chinese",
            Self::Vietnamese => "Vietnamese",
            Self::French => "French",
        }
    }
}

impl fmt::Display for TargetLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for TargetLanguage {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "ru" | "rus" | "russian" => Ok(Self::Russian),
            "zh" | "zh-cn" | "zh-hans" | "chinese" | "mandarin" => Ok(Self::Chinese),
            "vi" | "vie" | "vietnamese" => Ok(Self::Vietnamese),
            "fr" | "fra" | "french" => Ok(Self::French),
            other => Err(format!("unsupported target language: {other}")),
        }
    }
}

/// Builds the prompts for one translation request and cleans model output.
///
/// Pure value type; holds no backend state.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    source_text: String,
    language: TargetLanguage,
}

impl PromptBuilder {
    pub fn new(source_text: impl Into<String>, language: TargetLanguage) -> Self {
        Self {
            source_text: source_text.into(),
            language,
        }
    }

    pub fn language(&self) -> TargetLanguage {
        self.language
    }

    /// System-role instructions for chat-style models.
    pub fn system_prompt(&self) -> String {
        format!(
            "You are a professional translator. Translate the user's English text into {lang}. \
             Rules: keep proper nouns and brand names unchanged; translate into {lang} only; \
             preserve the original formatting, numbers, and punctuation; \
             output only the translation with no commentary.",
            lang = self.language.display_name()
        )
    }

    /// User-role message for chat-style models that also receive
    /// [`system_prompt`](Self::system_prompt) separately.
    pub fn user_prompt(&self) -> String {
        format!(
            "Translate the following text into {}:\n\n{}",
            self.language.display_name(),
            self.source_text
        )
    }

    /// Instructions and source text combined in one block, for single-turn
    /// models with no separate system-role channel.
    pub fn full_prompt(&self) -> String {
        format!("{}\n\n{}", self.system_prompt(), self.user_prompt())
    }

    /// Trim the raw model output and strip one known boilerplate prefix.
    ///
    /// Prefixes are matched case-insensitively against the trimmed string,
    /// checked once (not repeatedly), and the remainder is re-trimmed.
    pub fn clean_output(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        let lang = self.language.display_name();
        let prefixes = [
            "Translation:".to_string(),
            "Here is the translation:".to_string(),
            "The translation is:".to_string(),
            format!("In {lang}:"),
            format!("{lang}:"),
        ];
        for prefix in &prefixes {
            if trimmed.len() >= prefix.len()
                && trimmed.is_char_boundary(prefix.len())
                && trimmed[..prefix.len()].eq_ignore_ascii_case(prefix)
            {
                return trimmed[prefix.len()..].trim().to_string();
            }
        }
        trimmed.to_string()
    }
}
