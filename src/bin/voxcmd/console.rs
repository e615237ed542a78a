//! Line-based console control standing in for global hotkeys.

use crossbeam_channel::Sender;
use std::io::{self, BufRead};
use std::thread;

pub(crate) const HELP: &str = "commands: <enter>/t talk, i interrupt, c continuous on/off, \
l switch language, a active on/off, m mute on/off, r reactivate, q quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConsoleCommand {
    PushToTalk,
    Interrupt,
    ToggleContinuous,
    ToggleLanguage,
    ToggleActive,
    ToggleMute,
    Reactivate,
    Quit,
}

impl ConsoleCommand {
    pub(crate) fn parse(line: &str) -> Option<Self> {
        let command = match line.trim().to_ascii_lowercase().as_str() {
            "" | "t" | "talk" => Self::PushToTalk,
            "i" | "interrupt" => Self::Interrupt,
            "c" | "continuous" => Self::ToggleContinuous,
            "l" | "lang" | "language" => Self::ToggleLanguage,
            "a" | "active" => Self::ToggleActive,
            "m" | "mute" => Self::ToggleMute,
            "r" | "reactivate" => Self::Reactivate,
            "q" | "quit" | "exit" => Self::Quit,
            _ => return None,
        };
        Some(command)
    }
}

/// Read stdin line by line. End of input counts as `Quit`.
pub(crate) fn spawn_console_thread(
    tx: Sender<ConsoleCommand>,
) -> io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(err) => {
                        tracing::warn!(error = %err, "stdin read error");
                        break;
                    }
                };
                match ConsoleCommand::parse(&line) {
                    Some(command) => {
                        if tx.send(command).is_err() {
                            return;
                        }
                    }
                    None => eprintln!("unknown command '{}'; {HELP}", line.trim()),
                }
            }
            let _ = tx.send(ConsoleCommand::Quit);
        })
}
