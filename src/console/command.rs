use crate::entity::{RecordId, Slider};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Chat,
    Admin,
}

impl Route {
    pub fn path(self) -> &'static str {
        match self {
            Route::Chat => "/",
            Route::Admin => "/admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Index(usize),
    Id(RecordId),
}

impl Target {
    fn parse(arg: &str) -> Result<Self, CommandError> {
        match arg.parse::<usize>() {
            Ok(0) => Err(CommandError::InvalidValue("positions start at 1".to_string())),
            Ok(n) => Ok(Target::Index(n)),
            Err(_) => Ok(Target::Id(RecordId::from(arg))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Go(Route),
    Help,
    Quit,
    List,
    Open(Target),
    Close,
    New,
    Send(String),
    Call,
    Hangup,
    Status,
    Settings,
    Set(Slider, i64),
    Prompt(String),
    Files,
    Upload(PathBuf),
    Delete(Target),
    Logs,
    Follow,
    Unfollow,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Unknown command: /{0} (try /help)")]
    Unknown(String),
    #[error("Missing argument: {0}")]
    MissingArgument(&'static str),
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

fn required<'a>(rest: &'a str, name: &'static str) -> Result<&'a str, CommandError> {
    let rest = rest.trim();
    if rest.is_empty() {
        Err(CommandError::MissingArgument(name))
    } else {
        Ok(rest)
    }
}

// `//text` sends `/text` literally. Blank lines parse to `None`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if let Some(literal) = line.strip_prefix("//") {
        return Ok(Some(Command::Send(format!("/{}", literal))));
    }
    let Some(body) = line.strip_prefix('/') else {
        return Ok(Some(Command::Send(line.to_string())));
    };

    let (name, rest) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
    let command = match name.to_ascii_lowercase().as_str() {
        "" | "chat" => Command::Go(Route::Chat),
        "admin" => Command::Go(Route::Admin),
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        "list" => Command::List,
        "open" => Command::Open(Target::parse(required(rest, "conversation")?)?),
        "close" => Command::Close,
        "new" => Command::New,
        "call" => Command::Call,
        "hangup" => Command::Hangup,
        "status" => Command::Status,
        "settings" => Command::Settings,
        "set" => {
            let args = required(rest, "slider and value")?;
            let (slider, value) = args
                .split_once(char::is_whitespace)
                .ok_or(CommandError::MissingArgument("value"))?;
            let slider: Slider = slider
                .parse()
                .map_err(|e: crate::error::ServiceError| CommandError::InvalidValue(e.to_string()))?;
            let value = value
                .trim()
                .parse::<i64>()
                .map_err(|_| CommandError::InvalidValue(format!("'{}' is not a number", value.trim())))?;
            Command::Set(slider, value)
        }
        "prompt" => Command::Prompt(rest.trim().to_string()),
        "files" => Command::Files,
        "upload" => Command::Upload(PathBuf::from(required(rest, "path")?)),
        "delete" => Command::Delete(Target::parse(required(rest, "file")?)?),
        "logs" => Command::Logs,
        "follow" => Command::Follow,
        "unfollow" => Command::Unfollow,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(command))
}
