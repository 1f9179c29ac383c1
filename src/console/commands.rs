use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a line with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Start a new conversation
    New,
    /// Show the conversation list
    List,
    /// Switch to a listed conversation
    Open,
    /// Rename the current conversation
    Rename,
    /// Show help
    Help,
    /// Exit the application
    Bye,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
    pub argument: Option<String>,
}

impl ParsedCommand {
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }

    /// 1-based list position for `/open`
    pub fn list_index(&self) -> Option<usize> {
        if self.command != SlashCommand::Open {
            return None;
        }
        self.argument()?
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|n| *n > 0)
            .map(|n| n - 1)
    }
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::New => "start a new conversation",
            SlashCommand::List => "list saved conversations",
            SlashCommand::Open => "switch to conversation <n> from /list",
            SlashCommand::Rename => "rename the current conversation to <title>",
            SlashCommand::Help => "show available commands",
            SlashCommand::Bye => "exit the application",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }

    pub fn takes_argument(self) -> bool {
        matches!(self, SlashCommand::Open | SlashCommand::Rename)
    }
}

/// Parse a slash command from user input
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    let input = input.trim();
    let body = input.strip_prefix('/')?;

    let mut parts = body.splitn(2, char::is_whitespace);
    let head = parts.next()?;
    let rest = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let command = SlashCommand::from_str(head)
        .ok()
        .or_else(|| match head.to_lowercase().as_str() {
            "q" | "quit" | "exit" => Some(SlashCommand::Bye),
            "n" => Some(SlashCommand::New),
            "ls" | "l" => Some(SlashCommand::List),
            "o" => Some(SlashCommand::Open),
            "h" | "?" => Some(SlashCommand::Help),
            _ => None,
        })?;

    Some(ParsedCommand {
        command,
        argument: rest.map(str::to_string),
    })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n\n");
    for command in SlashCommand::iter() {
        let usage = if command.takes_argument() {
            format!("/{} <arg>", command.command())
        } else {
            format!("/{}", command.command())
        };
        help.push_str(&format!("{:<16} {}\n", usage, command.description()));
    }

    help.push_str("\nAliases: /q /quit /exit for /bye, /n for /new, /ls for /list, /o for /open.");
    help.push_str("\nAnything else is sent to the model. Ctrl-C stops a reply in progress.");

    help
}
