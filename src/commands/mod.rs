//! Slash commands understood by the interactive chat.
//!
//! Parsing is separate from execution: the chat loop receives a
//! [`CommandResult`] and performs the network or store work itself.

mod registry;

pub use registry::{all_commands, matching_commands, Command, CommandInvocation};


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    ProcessAsMessage(String),
    ListSessions,
    NewSession(Option<String>),
    SwitchSession(String),
    DeleteSession(String),
    ShowHistory,
    /// `None` toggles an existing log between paused and active.
    Log(Option<String>),
    Help,
    Quit,
    /// The command was recognized but its arguments were not.
    Usage(&'static str),
}

pub fn process_input(input: &str) -> CommandResult {
    let trimmed = input.trim();

    let Some(rest) = trimmed.strip_prefix('/') else {
        return CommandResult::ProcessAsMessage(input.to_string());
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command_name = match parts.next() {
        Some(name) if !name.is_empty() => name,
        _ => return CommandResult::ProcessAsMessage(input.to_string()),
    };
    let args = parts.next().unwrap_or("").trim();

    match registry::find_command(command_name) {
        Some(command) => (command.parser)(CommandInvocation {
            input: trimmed,
            args,
        }),
        None => CommandResult::ProcessAsMessage(input.to_string()),
    }
}

pub fn help_text() -> String {
    let width = all_commands()
        .iter()
        .map(|command| command.usage.len())
        .max()
        .unwrap_or(0);
    let mut text = String::from("Commands:\n");
    for command in all_commands() {
        text.push_str(&format!("  {:width$}  {}\n", command.usage, command.help));
    }
    text.push_str("Ctrl-C stops a streaming reply; at the prompt it exits.");
    text
}

fn single_argument(invocation: CommandInvocation<'_>) -> Option<String> {
    let mut words = invocation.args.split_whitespace();
    match (words.next(), words.next()) {
        (Some(arg), None) => Some(arg.to_string()),
        _ => None,
    }
}

fn usage_of(invocation: CommandInvocation<'_>) -> &'static str {
    invocation
        .input
        .trim_start_matches('/')
        .split_whitespace()
        .next()
        .and_then(registry::find_command)
        .map_or("/help", |command| command.usage)
}

pub(super) fn parse_sessions(_invocation: CommandInvocation<'_>) -> CommandResult {
    CommandResult::ListSessions
}

pub(super) fn parse_new(invocation: CommandInvocation<'_>) -> CommandResult {
    let title = Some(invocation.args)
        .filter(|title| !title.is_empty())
        .map(str::to_string);
    CommandResult::NewSession(title)
}

pub(super) fn parse_switch(invocation: CommandInvocation<'_>) -> CommandResult {
    single_argument(invocation).map_or_else(
        || CommandResult::Usage(usage_of(invocation)),
        CommandResult::SwitchSession,
    )
}

pub(super) fn parse_delete(invocation: CommandInvocation<'_>) -> CommandResult {
    single_argument(invocation).map_or_else(
        || CommandResult::Usage(usage_of(invocation)),
        CommandResult::DeleteSession,
    )
}

pub(super) fn parse_history(_invocation: CommandInvocation<'_>) -> CommandResult {
    CommandResult::ShowHistory
}

pub(super) fn parse_log(invocation: CommandInvocation<'_>) -> CommandResult {
    if invocation.args.is_empty() {
        return CommandResult::Log(None);
    }
    single_argument(invocation).map_or_else(
        || CommandResult::Usage(usage_of(invocation)),
        |file| CommandResult::Log(Some(file)),
    )
}

pub(super) fn parse_help(_invocation: CommandInvocation<'_>) -> CommandResult {
    CommandResult::Help
}

pub(super) fn parse_quit(_invocation: CommandInvocation<'_>) -> CommandResult {
    CommandResult::Quit
}
