use crate::config::AppConfig;
use std::env;
use std::fs::OpenOptions;
use std::panic;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_subscriber::fmt::time::UtcTime;

static TRACING_INIT: OnceLock<()> = OnceLock::new();
static PANIC_HOOK_INSTALLED: OnceLock<()> = OnceLock::new();

pub fn tracing_log_path() -> PathBuf {
    env::var("VOXCMD_TRACE_LOG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| env::temp_dir().join("voxcmd_trace.jsonl"))
}

/// Install the JSON file subscriber once. Returns the log path when logging
/// is on and the file could be opened.
pub fn init_tracing(config: &AppConfig) -> Option<PathBuf> {
    if !config.logging_enabled() {
        return None;
    }

    let path = tracing_log_path();
    let file = OpenOptions::new().create(true).append(true).open(&path).ok()?;
    TRACING_INIT.get_or_init(|| {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_timer(UtcTime::rfc_3339())
            .with_writer(file)
            .with_current_span(false)
            .with_span_list(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
    install_panic_hook();
    Some(path)
}

/// Record panics in the trace log, then defer to the previous hook.
pub fn install_panic_hook() {
    PANIC_HOOK_INSTALLED.get_or_init(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|loc| format!("{}:{}", loc.file(), loc.line()))
                .unwrap_or_else(|| "unknown".to_string());
            let thread = std::thread::current();
            tracing::error!(
                location = %location,
                thread = thread.name().unwrap_or("unnamed"),
                "panic: {info}"
            );
            previous(info);
        }));
    });
}
