mod command;
mod render;

use crate::admin::{KnowledgeManager, LogTail, PersonalityEditor};
use crate::call::{AudioSink, CallSession, CallStatus, MediaTransport, TokenSource};
use crate::config::StoreBackend;
use crate::entity::{KnowledgeFile, LogEntry, RecordId, Role, SettingsPatch};
use crate::session::{ChatSession, SendOutcome, group_by_date};
use anyhow::Result;
use chrono::Utc;
use chrono_tz::Tz;
use command::{Command, Route, Target, parse};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Dialer {
    pub tokens: Arc<dyn TokenSource>,
    pub transport: Arc<dyn MediaTransport>,
    pub sink: Arc<dyn AudioSink>,
}

pub struct Console {
    session: Arc<ChatSession>,
    dialer: Dialer,
    editor: PersonalityEditor,
    knowledge: KnowledgeManager,
    logs: LogTail,
    store: StoreBackend,
    timezone: Tz,
    route: Route,
    call: Option<CallSession>,
    call_status: Option<watch::Receiver<CallStatus>>,
    pending_send: Option<JoinHandle<SendOutcome>>,
    shown_messages: usize,
}

enum Flow {
    Continue,
    Quit,
}

impl Console {
    pub fn new(
        session: Arc<ChatSession>,
        dialer: Dialer,
        editor: PersonalityEditor,
        knowledge: KnowledgeManager,
        logs: LogTail,
        store: StoreBackend,
        timezone: Tz,
    ) -> Self {
        Self {
            session,
            dialer,
            editor,
            knowledge,
            logs,
            store,
            timezone,
            route: Route::Chat,
            call: None,
            call_status: None,
            pending_send: None,
            shown_messages: 0,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        self.enter(Route::Chat).await;

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else {
                        info!("Input closed");
                        break;
                    };
                    match parse(&line) {
                        Ok(Some(command)) => {
                            if let Flow::Quit = self.dispatch(command).await {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => println!("{}", e),
                    }
                }
                outcome = send_finished(&mut self.pending_send) => {
                    self.pending_send = None;
                    self.on_send_finished(outcome).await;
                }
                entry = next_log(&mut self.logs), if self.logs.is_following() => {
                    if let Some(entry) = entry {
                        println!("{}", render::log(&entry, &self.timezone));
                    }
                }
                status = call_changed(&mut self.call_status) => match status {
                    Some(CallStatus::Connected { elapsed }) if elapsed > 0 => {}
                    Some(status) => match status.failure() {
                        Some(reason) => println!("call: {} ({})", status.overlay_text(), reason),
                        None => println!("call: {}", status.overlay_text()),
                    },
                    None => self.call_status = None,
                },
            }
        }

        self.shutdown().await;
        Ok(())
    }

    pub async fn shutdown(&mut self) {
        if let Some(call) = self.call.take() {
            call.hangup().await;
        }
        self.logs.unfollow();
        if let Some(send) = self.pending_send.take() {
            send.abort();
        }
    }

    async fn enter(&mut self, route: Route) {
        self.route = route;
        println!("== {} ==", route.path());
        match route {
            Route::Chat => {
                self.session.load_conversations().await;
                self.print_conversations().await;
            }
            Route::Admin => {
                self.editor.load().await;
                self.knowledge.load().await;
                self.logs.load().await;
                if let Err(e) = self.logs.follow().await {
                    warn!("Live log stream unavailable: {}", e);
                }
                self.print_status().await;
                self.print_settings().await;
                self.print_files().await;
                self.print_logs();
            }
        }
    }

    async fn dispatch(&mut self, command: Command) -> Flow {
        match command {
            Command::Quit => return Flow::Quit,
            Command::Help => println!("{}", render::help(self.route)),
            Command::Go(route) => {
                if route != self.route && self.route == Route::Admin {
                    self.logs.unfollow();
                }
                self.enter(route).await;
            }
            Command::List => self.print_conversations().await,
            Command::Open(target) => {
                let conversations = self.session.conversations().await;
                let id = match target {
                    Target::Index(n) => conversations.get(n - 1).map(|c| c.id.clone()),
                    Target::Id(id) => conversations
                        .iter()
                        .any(|c| c.id == id)
                        .then_some(id),
                };
                match id {
                    Some(id) => {
                        self.session.select_conversation(Some(id)).await;
                        self.shown_messages = 0;
                        self.print_new_messages().await;
                    }
                    None => println!("No such conversation"),
                }
            }
            Command::Close => {
                self.session.select_conversation(None).await;
                self.shown_messages = 0;
            }
            Command::New => {
                if self.session.start_new_conversation().await.is_some() {
                    self.shown_messages = 0;
                    self.print_conversations().await;
                }
            }
            Command::Send(text) => {
                self.send(text);
            }
            Command::Call => self.start_call(),
            Command::Hangup => match self.call.take() {
                Some(call) => {
                    call.hangup().await;
                    self.call_status = None;
                    println!("call: {}", CallStatus::Closed.overlay_text());
                }
                None => println!("No call in progress"),
            },
            Command::Status => self.print_status().await,
            Command::Settings => self.print_settings().await,
            Command::Set(slider, value) => match SettingsPatch::slider(slider, value) {
                Ok(patch) => {
                    self.editor.update(patch).await;
                    self.print_settings().await;
                }
                Err(e) => println!("{}", e),
            },
            Command::Prompt(prompt) => {
                self.editor.update(SettingsPatch::system_prompt(prompt)).await;
                self.print_settings().await;
            }
            Command::Files => self.print_files().await,
            Command::Upload(path) => match self.knowledge.upload_path(&path).await {
                Ok(file) => println!("Uploaded {}", file.filename),
                Err(e) => println!("Upload failed: {}", e),
            },
            Command::Delete(target) => {
                let files = self.knowledge.files().await;
                match resolve_file(&files, target) {
                    Some(id) => match self.knowledge.delete(&id).await {
                        Ok(()) => self.print_files().await,
                        Err(e) => println!("Delete failed: {}", e),
                    },
                    None => println!("No such file"),
                }
            }
            Command::Logs => self.print_logs(),
            Command::Follow => match self.logs.follow().await {
                Ok(()) => println!("Following system logs"),
                Err(e) => println!("Live log stream unavailable: {}", e),
            },
            Command::Unfollow => self.logs.unfollow(),
        }
        Flow::Continue
    }

    // The spawned task may not have claimed the session yet, so the stored
    // handle is the busy marker.
    fn send(&mut self, text: String) -> bool {
        if self.route != Route::Chat {
            println!("Messages are sent from the chat screen, switch with /");
            return false;
        }
        if self.pending_send.is_some() || self.session.is_sending() {
            println!("AURA is still answering, hold on");
            return false;
        }

        let session = self.session.clone();
        self.pending_send = Some(tokio::spawn(async move {
            session.send_message(&text).await
        }));
        true
    }

    async fn on_send_finished(&mut self, outcome: Option<SendOutcome>) {
        match outcome {
            Some(SendOutcome::Busy) => println!("AURA is still answering, hold on"),
            Some(SendOutcome::Abandoned) => println!("Could not start a conversation"),
            Some(SendOutcome::Ignored) => {}
            Some(SendOutcome::Replied | SendOutcome::Fallback) => {
                self.print_new_messages().await;
            }
            None => warn!("Send task ended unexpectedly"),
        }
    }

    fn start_call(&mut self) {
        if let Some(call) = &self.call {
            println!("call: {}", call.status().overlay_text());
            return;
        }
        let call = CallSession::start(
            self.dialer.tokens.clone(),
            self.dialer.transport.clone(),
            self.dialer.sink.clone(),
        );
        println!("call: {}", call.status().overlay_text());
        self.call_status = Some(call.subscribe());
        self.call = Some(call);
    }

    async fn print_conversations(&self) {
        let conversations = self.session.conversations().await;
        let active = self.session.active_id().await;
        let groups = group_by_date(&conversations, Utc::now(), &self.timezone);
        println!("{}", render::conversation_list(&groups, active.as_ref()));
    }

    async fn print_new_messages(&mut self) {
        let messages = self.session.messages().await;
        for message in messages.iter().skip(self.shown_messages) {
            println!("{}", render::message(message));
        }
        self.shown_messages = messages.len();
    }

    async fn print_status(&self) {
        let files = self.knowledge.files().await;
        let messages = self.session.messages().await;
        let emotion = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant)
            .and_then(|m| m.emotion.as_deref());
        let panel = render::StatusPanel {
            store: self.store.label(),
            live_logs: self.logs.is_following(),
            files: &files,
            emotion,
        };
        println!("{}", render::status(&panel));
    }

    async fn print_settings(&self) {
        match self.editor.settings().await {
            Some(settings) => println!("{}", render::settings(&settings)),
            None => println!("Personality settings unavailable"),
        }
    }

    async fn print_files(&self) {
        let files = self.knowledge.files().await;
        if files.is_empty() {
            println!("No knowledge files");
        }
        for (i, file) in files.iter().enumerate() {
            println!("{}", render::file(i + 1, file, &self.timezone));
        }
    }

    fn print_logs(&self) {
        if self.logs.entries().is_empty() {
            println!("No logs yet. Activity will appear here in real time.");
        }
        for entry in self.logs.entries() {
            println!("{}", render::log(entry, &self.timezone));
        }
    }
}

fn resolve_file(files: &[KnowledgeFile], target: Target) -> Option<RecordId> {
    match target {
        Target::Index(n) => files.get(n - 1).map(|f| f.id.clone()),
        Target::Id(id) => files.iter().any(|f| f.id == id).then_some(id),
    }
}

async fn send_finished(pending: &mut Option<JoinHandle<SendOutcome>>) -> Option<SendOutcome> {
    match pending {
        Some(handle) => handle.await.ok(),
        None => std::future::pending().await,
    }
}

async fn next_log(logs: &mut LogTail) -> Option<LogEntry> {
    logs.next().await.cloned()
}

async fn call_changed(rx: &mut Option<watch::Receiver<CallStatus>>) -> Option<CallStatus> {
    match rx {
        Some(rx) => {
            rx.changed().await.ok()?;
            Some(rx.borrow_and_update().clone())
        }
        None => std::future::pending().await,
    }
}
