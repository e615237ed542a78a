//! Supported languages and the localized fallback phrases spoken when a stage
//! cannot produce a proper reply.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Spoken language of the assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    En,
    Uk,
}

impl Language {
    pub fn code(self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Uk => "uk",
        }
    }

    /// Parse a language code, returning `None` for anything unsupported.
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim().to_ascii_lowercase().as_str() {
            "en" | "english" => Some(Language::En),
            "uk" | "ua" | "ukrainian" => Some(Language::Uk),
            _ => None,
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            Language::En => Language::Uk,
            Language::Uk => Language::En,
        }
    }

    /// Pick between an English and a Ukrainian string.
    pub fn pick<'a>(self, en: &'a str, uk: &'a str) -> &'a str {
        match self {
            Language::En => en,
            Language::Uk => uk,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Fallback replies for degraded runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phrase {
    ActionError,
    UnknownAction,
    BadParameters,
    ActionFailed,
    BackendUnreachable,
    BackendTimedOut,
    NotUnderstood,
}

impl Phrase {
    pub fn text(self, language: Language) -> &'static str {
        match self {
            Phrase::ActionError => {
                language.pick("Error executing command.", "Помилка при виконанні команди.")
            }
            Phrase::UnknownAction => {
                language.pick("I don't know how to do that.", "Я не знаю, як це зробити.")
            }
            Phrase::BadParameters => language.pick(
                "I had trouble with the parameters for that command.",
                "У мене виникли проблеми з параметрами цієї команди.",
            ),
            Phrase::ActionFailed => {
                language.pick("Sorry, that command failed.", "Вибачте, команда не виконалась.")
            }
            Phrase::BackendUnreachable => language.pick(
                "Cannot reach the language model. Please make sure it is running.",
                "Не можу з'єднатися з мовною моделлю. Переконайтеся, що вона запущена.",
            ),
            Phrase::BackendTimedOut => language.pick(
                "The language model timed out. It may still be loading.",
                "Запит до мовної моделі перевищив час очікування.",
            ),
            Phrase::NotUnderstood => language.pick(
                "Sorry, I had trouble understanding that.",
                "Вибачте, у мене виникли проблеми з розумінням.",
            ),
        }
    }
}
