use anyhow::Result;
use chrono::{DateTime, Local};
use log::{LevelFilter, Record};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use crate::chat::Command;

// Logging setup and terminal input helpers for the privchat binary.

pub struct SimpleLogger {
    log_file: Option<std::fs::File>,
}

impl SimpleLogger {
    pub fn new(log_file_path: Option<&str>) -> Result<Self> {
        let log_file = if let Some(path) = log_file_path {
            Some(OpenOptions::new().create(true).append(true).open(path)?)
        } else {
            None
        };

        Ok(SimpleLogger { log_file })
    }
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now: DateTime<Local> = Local::now();
        let line = format!(
            "[{}] {} [{}:{}] {}\n",
            now.format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.file().unwrap_or("unknown"),
            record.line().unwrap_or(0),
            record.args()
        );

        match &self.log_file {
            Some(file) => {
                if let Ok(mut file) = file.try_clone() {
                    let _ = file.write_all(line.as_bytes());
                }
            }
            // Keep stdout for chat output; logs go to stderr without a file
            None => eprint!("{}", line),
        }
    }

    fn flush(&self) {
        if let Some(Ok(mut file)) = self.log_file.as_ref().map(|f| f.try_clone()) {
            let _ = file.flush();
        } else {
            let _ = std::io::stderr().flush();
        }
    }
}

pub fn setup_logging(log_file: Option<&str>, level: LevelFilter) -> Result<()> {
    let logger = SimpleLogger::new(log_file)?;
    log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(level))?;

    log::info!("Logging initialized at level: {}", level);
    log::info!("{} version {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));

    Ok(())
}

/// Read a line of input from stdin, trimming whitespace. `None` at end of input.
pub fn read_line() -> Result<Option<String>> {
    let mut input = String::new();
    if std::io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim().to_string()))
}

/// Map one line of terminal input to a client command.
///
/// `/select <id>`, `/file <path>`, `/typing`, `/stop`, `/users` and `/quit` are commands;
/// anything else is sent as text. Blank lines and unknown commands give `None`.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if !line.starts_with('/') {
        return Some(Command::SendText(line.to_string()));
    }

    let (name, arg) = match line.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (line, ""),
    };
    match (name, arg) {
        ("/select", id) if !id.is_empty() => Some(Command::Select(id.to_string())),
        ("/file", path) if !path.is_empty() => Some(Command::SendFile(PathBuf::from(path))),
        ("/typing", _) => Some(Command::Typing),
        ("/stop", _) => Some(Command::StopTyping),
        ("/users", _) => Some(Command::Users),
        ("/quit", _) => Some(Command::Quit),
        // A doubled slash escapes text that starts with one
        (name, _) if name.starts_with("//") => Some(Command::SendText(line[1..].to_string())),
        _ => None,
    }
}
