//! Action registry: a table from action names to handlers, built once at
//! startup and shared read-only afterwards.
//!
//! `execute` never fails. Unknown names, bad parameters and failing or
//! panicking handlers all come back as an unsuccessful [`ActionOutcome`]
//! carrying localized speech.

mod conversation;

pub use conversation::register_conversation_actions;

use crate::engines::Params;
use crate::i18n::{Language, Phrase};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Result of running one action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub success: bool,
    pub message: String,
    pub data: Option<Value>,
    pub speech_en: Option<String>,
    pub speech_uk: Option<String>,
}

impl ActionOutcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            data: None,
            speech_en: None,
            speech_uk: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            ..Self::ok(message)
        }
    }

    fn failed_with(message: String, phrase: Phrase) -> Self {
        Self::failed(message).with_speech(phrase.text(Language::En), phrase.text(Language::Uk))
    }

    pub fn with_speech(mut self, en: impl Into<String>, uk: impl Into<String>) -> Self {
        self.speech_en = Some(en.into());
        self.speech_uk = Some(uk.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Spoken text for `language`, if the action provided one.
    pub fn speech(&self, language: Language) -> Option<&str> {
        match language {
            Language::En => self.speech_en.as_deref(),
            Language::Uk => self.speech_uk.as_deref(),
        }
        .filter(|text| !text.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Str,
    Int,
    Float,
    Bool,
}

impl ParamType {
    pub fn label(self) -> &'static str {
        match self {
            ParamType::Str => "str",
            ParamType::Int => "int",
            ParamType::Float => "float",
            ParamType::Bool => "bool",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::Str => value.is_string(),
            ParamType::Int => value.is_i64() || value.is_u64(),
            ParamType::Float => value.is_number(),
            ParamType::Bool => value.is_boolean(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamType) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            description: String::new(),
        }
    }

    pub fn optional(name: &str, kind: ParamType) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind)
        }
    }

    pub fn describe(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

/// Registration metadata for one action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionMeta {
    pub name: String,
    pub category: String,
    pub description_en: String,
    pub description_uk: String,
    pub params: Vec<ParamSpec>,
    pub aliases: Vec<String>,
}

impl ActionMeta {
    pub fn new(name: &str, category: &str) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            description_en: String::new(),
            description_uk: String::new(),
            params: Vec::new(),
            aliases: Vec::new(),
        }
    }

    pub fn describe(mut self, en: &str, uk: &str) -> Self {
        self.description_en = en.to_string();
        self.description_uk = uk.to_string();
        self
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn alias(mut self, alias: &str) -> Self {
        self.aliases.push(alias.to_string());
        self
    }

    pub fn description(&self, language: Language) -> &str {
        language.pick(&self.description_en, &self.description_uk)
    }

    fn check_params(&self, params: &Params) -> Result<(), String> {
        for spec in &self.params {
            match params.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(format!("missing required parameter '{}'", spec.name));
                }
                Some(value) if !value.is_null() && !spec.kind.accepts(value) => {
                    return Err(format!(
                        "parameter '{}' must be {}, got {value}",
                        spec.name,
                        spec.kind.label()
                    ));
                }
                _ => {}
            }
        }
        if let Some(unexpected) = params
            .keys()
            .find(|key| !self.params.iter().any(|spec| &spec.name == *key))
        {
            return Err(format!("unexpected parameter '{unexpected}'"));
        }
        Ok(())
    }
}

/// What a handler sees when it runs.
pub struct ActionCall<'a> {
    pub name: &'a str,
    pub params: &'a Params,
    pub registry: &'a ActionRegistry,
}

impl ActionCall<'_> {
    pub fn str_param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn int_param(&self, name: &str) -> Option<i64> {
        self.params.get(name).and_then(Value::as_i64)
    }

    pub fn bool_param(&self, name: &str) -> Option<bool> {
        self.params.get(name).and_then(Value::as_bool)
    }
}

pub trait ActionHandler: Send + Sync {
    fn run(&self, call: &ActionCall<'_>) -> anyhow::Result<ActionOutcome>;
}

impl<F> ActionHandler for F
where
    F: Fn(&ActionCall<'_>) -> anyhow::Result<ActionOutcome> + Send + Sync,
{
    fn run(&self, call: &ActionCall<'_>) -> anyhow::Result<ActionOutcome> {
        self(call)
    }
}

struct Entry {
    meta: ActionMeta,
    handler: Arc<dyn ActionHandler>,
}

/// Immutable name → handler table.
pub struct ActionRegistry {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field(
                "actions",
                &self.entries.iter().map(|e| &e.meta.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[derive(Default)]
pub struct ActionRegistryBuilder {
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
}

impl ActionRegistryBuilder {
    /// Register `handler` under `meta.name` and its aliases. Registering a
    /// name again replaces the earlier action.
    pub fn register(mut self, meta: ActionMeta, handler: impl ActionHandler + 'static) -> Self {
        let handler: Arc<dyn ActionHandler> = Arc::new(handler);
        let slot = match self.index.get(&meta.name) {
            Some(&existing) => {
                tracing::warn!(action = %meta.name, "action registered twice; replacing");
                existing
            }
            None => self.entries.len(),
        };
        let names: Vec<String> = std::iter::once(meta.name.clone())
            .chain(meta.aliases.iter().cloned())
            .collect();
        let entry = Entry { meta, handler };
        if slot == self.entries.len() {
            self.entries.push(entry);
        } else {
            self.entries[slot] = entry;
        }
        for name in names {
            self.index.insert(name, slot);
        }
        self
    }

    /// Register a closure handler.
    pub fn register_fn<F>(self, meta: ActionMeta, handler: F) -> Self
    where
        F: Fn(&ActionCall<'_>) -> anyhow::Result<ActionOutcome> + Send + Sync + 'static,
    {
        self.register(meta, handler)
    }

    pub fn build(self) -> ActionRegistry {
        tracing::debug!(actions = self.entries.len(), "action registry built");
        ActionRegistry {
            entries: self.entries,
            index: self.index,
        }
    }
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    /// Look up an action by name or alias.
    pub fn get(&self, name: &str) -> Option<&ActionMeta> {
        self.entry(name).map(|entry| &entry.meta)
    }

    fn entry(&self, name: &str) -> Option<&Entry> {
        self.index.get(name).and_then(|&idx| self.entries.get(idx))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn execute(&self, name: &str, params: &Params) -> ActionOutcome {
        let Some(entry) = self.entry(name) else {
            tracing::warn!(action = name, "unknown action");
            return ActionOutcome::failed_with(
                format!("Unknown action: {name}"),
                Phrase::UnknownAction,
            );
        };
        if let Err(problem) = entry.meta.check_params(params) {
            tracing::error!(action = name, %problem, "action parameter error");
            return ActionOutcome::failed_with(
                format!("Wrong parameters for {name}: {problem}"),
                Phrase::BadParameters,
            );
        }
        let call = ActionCall {
            name: &entry.meta.name,
            params,
            registry: self,
        };
        match catch_unwind(AssertUnwindSafe(|| entry.handler.run(&call))) {
            Ok(Ok(outcome)) => {
                tracing::info!(
                    action = %entry.meta.name,
                    success = outcome.success,
                    "action executed"
                );
                outcome
            }
            Ok(Err(err)) => {
                tracing::error!(
                    action = %entry.meta.name,
                    error = %format!("{err:#}"),
                    "action failed"
                );
                ActionOutcome::failed_with(
                    format!("Action {name} failed: {err:#}"),
                    Phrase::ActionFailed,
                )
            }
            Err(_) => {
                tracing::error!(action = %entry.meta.name, "action handler panicked");
                ActionOutcome::failed_with(
                    format!("Action {name} panicked"),
                    Phrase::ActionError,
                )
            }
        }
    }

    /// Registered actions in registration order, aliases collapsed,
    /// optionally filtered by category.
    pub fn list_actions(&self, category: Option<&str>) -> Vec<&ActionMeta> {
        self.entries
            .iter()
            .map(|entry| &entry.meta)
            .filter(|meta| category.map_or(true, |wanted| meta.category == wanted))
            .collect()
    }

    /// One line per action for the understanding backend's prompt.
    pub fn schema_for_llm(&self, language: Language) -> String {
        self.list_actions(None)
            .into_iter()
            .map(|meta| {
                let params = meta
                    .params
                    .iter()
                    .map(|spec| {
                        let required = if spec.required { " (required)" } else { "" };
                        format!("{}: {}{required}", spec.name, spec.kind.label())
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("- {}({params}): {}", meta.name, meta.description(language))
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
