//! Meta commands that act on the assistant itself.

use super::{ActionCall, ActionMeta, ActionOutcome, ActionRegistryBuilder, ParamSpec, ParamType};
use crate::i18n::Language;
use crate::state::PipelineState;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const CATEGORY: &str = "conversation";

/// Add `switch_language`, `list_commands` and `stop_assistant`, bound to
/// `state`.
pub fn register_conversation_actions(
    builder: ActionRegistryBuilder,
    state: Arc<PipelineState>,
) -> ActionRegistryBuilder {
    let language_state = state.clone();
    builder
        .register_fn(
            ActionMeta::new("switch_language", CATEGORY)
                .describe(
                    "Switch language between English and Ukrainian",
                    "Перемикнути мову між англійською та українською",
                )
                .param(
                    ParamSpec::optional("language", ParamType::Str)
                        .describe("Target language: 'en' or 'uk'. If omitted, toggles."),
                ),
            move |call| Ok(switch_language(&language_state, call)),
        )
        .register_fn(
            ActionMeta::new("list_commands", CATEGORY).describe(
                "List all available voice commands",
                "Показати всі доступні голосові команди",
            ),
            |call| Ok(list_commands(call)),
        )
        .register_fn(
            ActionMeta::new("stop_assistant", CATEGORY)
                .describe("Shut down the assistant", "Вимкнути помічника"),
            move |_| {
                state.shutdown();
                Ok(ActionOutcome::ok("Shutting down").with_speech("Goodbye!", "До побачення!"))
            },
        )
}

fn switch_language(state: &PipelineState, call: &ActionCall<'_>) -> ActionOutcome {
    let language = match call.str_param("language") {
        Some(code) => state.set_language(code),
        None => state.toggle_language(),
    };
    match language {
        Language::Uk => ActionOutcome::ok("Language switched to Ukrainian")
            .with_speech("Switching to Ukrainian", "Перемикаюсь на українську"),
        Language::En => ActionOutcome::ok("Language switched to English")
            .with_speech("Switching to English", "Switching to English"),
    }
}

fn list_commands(call: &ActionCall<'_>) -> ActionOutcome {
    let actions = call.registry.list_actions(None);
    let mut categories: Vec<(&str, Vec<&str>)> = Vec::new();
    for meta in &actions {
        match categories.iter_mut().find(|(name, _)| *name == meta.category) {
            Some((_, names)) => names.push(meta.name.as_str()),
            None => categories.push((meta.category.as_str(), vec![meta.name.as_str()])),
        }
    }

    let total = actions.len();
    let summary = categories
        .iter()
        .map(|(category, names)| format!("{category}: {}", names.join(", ")))
        .collect::<Vec<_>>()
        .join(". ");
    let category_names = categories
        .iter()
        .map(|(category, _)| *category)
        .collect::<Vec<_>>()
        .join(", ");
    let data: Map<String, Value> = categories
        .iter()
        .map(|(category, names)| (category.to_string(), json!(names)))
        .collect();

    ActionOutcome::ok(format!("I have {total} commands available. {summary}"))
        .with_data(Value::Object(data))
        .with_speech(
            format!(
                "I have {total} commands across {} categories: {category_names}",
                categories.len()
            ),
            format!(
                "У мене {total} команд у {} категоріях: {category_names}",
                categories.len()
            ),
        )
}
