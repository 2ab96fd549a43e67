use super::command::Route;
use crate::entity::{
    KnowledgeFile, LogEntry, Message, PersonalitySettings, RecordId, Role, Slider,
};
use crate::session::DateGroup;
use crate::utils::{format_clock, format_date, format_size};
use chrono_tz::Tz;
use std::fmt::Write;

pub fn help(route: Route) -> String {
    let mut out = String::from("Routes: /  /admin    Other: /help /quit\n");
    match route {
        Route::Chat => out.push_str(
            "Chat: <text> send | /list | /open <n|id> | /close | /new | /call | /hangup",
        ),
        Route::Admin => out.push_str(
            "Admin: /status | /settings | /set <empathy|humor|formality> <0-100> | /prompt <text>\n\
             \x20      /files | /upload <path> | /delete <n|id> | /logs | /follow | /unfollow",
        ),
    }
    out
}

pub fn conversation_list(groups: &[DateGroup<'_>], active: Option<&RecordId>) -> String {
    if groups.is_empty() {
        return "No conversations yet. Type a message to start one.".to_string();
    }

    let mut out = String::new();
    let mut position = 0;
    for group in groups {
        let _ = writeln!(out, "{}", group.bucket.label());
        for conversation in &group.conversations {
            position += 1;
            let marker = if Some(&conversation.id) == active { '*' } else { ' ' };
            let _ = writeln!(out, " {}{:>3}. {}", marker, position, conversation.title);
        }
    }
    out.trim_end().to_string()
}

pub fn message(message: &Message) -> String {
    let mut out = match message.role {
        Role::User => format!("you   > {}", message.content),
        Role::Assistant => format!(
            "aura  > {} ({})",
            message.content,
            message.emotion.as_deref().unwrap_or("neutral")
        ),
    };
    if message.id.is_local() {
        out.push_str(" [not saved]");
    }
    for tool in message.tools() {
        let _ = write!(out, "\n        used {}", tool.name);
    }
    out
}

pub struct StatusPanel<'a> {
    pub store: &'a str,
    pub live_logs: bool,
    pub files: &'a [KnowledgeFile],
    pub emotion: Option<&'a str>,
}

pub fn status(panel: &StatusPanel<'_>) -> String {
    let system = if panel.live_logs {
        "Operational"
    } else {
        "Degraded (live logs offline)"
    };
    let bytes: i64 = panel.files.iter().filter_map(|f| f.size_bytes).sum();
    format!(
        "System     {} [{} store]\nMemory     {} files, {}\nEmotion    {}",
        system,
        panel.store,
        panel.files.len(),
        format_size(Some(bytes)),
        panel.emotion.unwrap_or("neutral")
    )
}

pub fn settings(settings: &PersonalitySettings) -> String {
    let mut out = String::new();
    for slider in Slider::ALL {
        let _ = writeln!(
            out,
            "{:<10} {:>4}",
            slider.label(),
            settings.slider(slider).to_string()
        );
    }
    let prompt = settings.system_prompt();
    let _ = write!(
        out,
        "Prompt     {}",
        if prompt.is_empty() { "(none)" } else { prompt }
    );
    out
}

pub fn file(position: usize, file: &KnowledgeFile, tz: &Tz) -> String {
    format!(
        "{:>3}. {} [{}] {} {}",
        position,
        file.filename,
        file.kind().label(),
        format_size(file.size_bytes),
        format_date(file.created_at, tz)
    )
}

pub fn log(entry: &LogEntry, tz: &Tz) -> String {
    format!(
        "[{}] {:<5} {}",
        format_clock(entry.created_at, tz),
        entry.level.as_str(),
        entry.message
    )
}
