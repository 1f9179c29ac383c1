//! Line-oriented chat front end over stdin/stdout

pub mod commands;

pub use commands::{get_help_text, parse_slash_command, ParsedCommand, SlashCommand};

use anyhow::Result;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;

use crate::engine::ConversationEngine;
use crate::error::ChatError;
use crate::events::ChatEvent;
use crate::session::{MessageStatus, SessionId};

/// What the REPL should do after a slash command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Continue(String),
    Exit,
}

/// Interactive conversation loop. Output goes to `out`, so tests can capture it.
///
/// An interrupt cancels the reply in progress, or leaves the loop when idle.
pub struct Console<W: Write> {
    engine: ConversationEngine,
    current: SessionId,
    out: W,
    interrupt: Arc<Notify>,
}

impl<W: Write> Console<W> {
    pub fn new(engine: ConversationEngine, out: W) -> Self {
        let current = engine.new_session();
        Self {
            engine,
            current,
            out,
            interrupt: Arc::new(Notify::new()),
        }
    }

    /// Handle that delivers an interrupt, as Ctrl-C does under `run`
    pub fn interrupt_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.interrupt)
    }

    pub fn current(&self) -> SessionId {
        self.current
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    /// Read lines from stdin until EOF, `/bye`, or Ctrl-C at the prompt
    pub async fn run(&mut self) -> Result<()> {
        let interrupt = self.interrupt_handle();
        let signals = tokio::spawn(async move {
            while tokio::signal::ctrl_c().await.is_ok() {
                interrupt.notify_one();
            }
        });

        let result = self.run_with(BufReader::new(tokio::io::stdin())).await;
        signals.abort();
        result
    }

    pub async fn run_with<R: AsyncBufRead + Unpin>(&mut self, input: R) -> Result<()> {
        writeln!(
            self.out,
            "💬 Chatting with {}. Type /help for commands.",
            self.engine.model()
        )?;
        let mut lines = input.lines();
        let interrupt = self.interrupt_handle();

        loop {
            write!(self.out, "> ")?;
            self.out.flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = interrupt.notified() => None,
            };
            let Some(line) = line else {
                writeln!(self.out)?;
                break;
            };

            if let Some(command) = parse_slash_command(&line) {
                match self.run_command(command) {
                    CommandOutcome::Continue(text) => writeln!(self.out, "{text}")?,
                    CommandOutcome::Exit => break,
                }
                continue;
            }

            self.send(&line).await?;
        }

        Ok(())
    }

    pub fn run_command(&mut self, command: ParsedCommand) -> CommandOutcome {
        match command.command {
            SlashCommand::New => {
                self.current = self.engine.new_session();
                CommandOutcome::Continue("✨ Started a new conversation.".to_string())
            }
            SlashCommand::List => CommandOutcome::Continue(self.render_list()),
            SlashCommand::Open => {
                let Some(index) = command.list_index() else {
                    return CommandOutcome::Continue("Usage: /open <n> (see /list)".to_string());
                };
                match self.engine.list().get(index) {
                    Some(session) => {
                        self.current = session.id();
                        CommandOutcome::Continue(self.render_transcript())
                    }
                    None => CommandOutcome::Continue(format!("❌ No conversation #{}", index + 1)),
                }
            }
            SlashCommand::Rename => {
                let Some(topic) = command.argument() else {
                    return CommandOutcome::Continue("Usage: /rename <title>".to_string());
                };
                match self.engine.rename(self.current, topic) {
                    Ok(()) => CommandOutcome::Continue(format!("📝 Renamed to {topic}")),
                    Err(err) => CommandOutcome::Continue(format!("❌ Error: {err}")),
                }
            }
            SlashCommand::Help => CommandOutcome::Continue(get_help_text()),
            SlashCommand::Bye => CommandOutcome::Exit,
        }
    }

    /// Send one message and print the reply as it streams in.
    pub async fn send(&mut self, text: &str) -> Result<()> {
        let id = self.current;
        let mut events = self.engine.subscribe();
        let token = CancellationToken::new();

        let engine = self.engine.clone();
        let prompt = text.to_string();
        let cancel = token.clone();
        let interrupt = self.interrupt_handle();
        let mut task =
            tokio::spawn(async move { engine.submit_cancellable(id, &prompt, &cancel).await });

        let result = loop {
            tokio::select! {
                joined = &mut task => {
                    loop {
                        match events.try_recv() {
                            Ok(event) => self.show(&event, id)?,
                            Err(TryRecvError::Lagged(_)) => continue,
                            Err(_) => break,
                        }
                    }
                    break joined?;
                }
                event = events.recv() => {
                    if let Ok(event) = event {
                        self.show(&event, id)?;
                    }
                }
                _ = interrupt.notified(), if !token.is_cancelled() => token.cancel(),
            }
        };

        match result {
            Ok(_) => writeln!(self.out)?,
            Err(ChatError::InvalidInput) => {}
            Err(err) => writeln!(self.out, "\n❌ Error: {err} (send again to retry)")?,
        }
        self.out.flush()?;
        Ok(())
    }

    fn show(&mut self, event: &ChatEvent, id: SessionId) -> Result<()> {
        if let ChatEvent::MessageUpdated { session, delta, .. } = event {
            if *session == id {
                write!(self.out, "{delta}")?;
                self.out.flush()?;
            }
        }
        Ok(())
    }

    fn render_list(&self) -> String {
        let snapshot = self.engine.list();
        if snapshot.is_empty() {
            return "📭 No conversations yet. Send a message to start one!".to_string();
        }

        let mut text = String::from("📋 Conversations:\n");
        for (i, shared) in snapshot.iter().enumerate() {
            let session = shared.lock();
            let marker = if session.id() == self.current { "*" } else { " " };
            let updated = session
                .updated_at()
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            text.push_str(&format!(
                "{marker}{:>3}. {} ({} messages, updated {updated})\n",
                i + 1,
                session.topic(),
                session.messages().len()
            ));
        }
        text.truncate(text.trim_end().len());
        text
    }

    fn render_transcript(&self) -> String {
        let Some(shared) = self.engine.session(self.current) else {
            return String::new();
        };
        let session = shared.lock();
        let mut text = format!("📂 {}\n", session.topic());
        for message in session.messages() {
            let who = if message.is_user() { "you" } else { "model" };
            let suffix = if message.status == MessageStatus::Interrupted {
                " [interrupted]"
            } else {
                ""
            };
            text.push_str(&format!("{who}: {}{suffix}\n", message.text));
        }
        text.truncate(text.trim_end().len());
        text
    }
}
