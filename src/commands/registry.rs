use super::CommandResult;

pub type CommandParser = fn(CommandInvocation<'_>) -> CommandResult;

pub struct Command {
    pub name: &'static str,
    pub usage: &'static str,
    pub help: &'static str,
    pub parser: CommandParser,
}

#[derive(Clone, Copy)]
pub struct CommandInvocation<'a> {
    pub input: &'a str,
    pub args: &'a str,
}

pub fn all_commands() -> &'static [Command] {
    COMMANDS
}

pub fn find_command(name: &str) -> Option<&'static Command> {
    all_commands()
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}

/// Commands whose name starts with `prefix`, for completion hints.
pub fn matching_commands(prefix: &str) -> Vec<&'static Command> {
    let prefix = prefix.trim_start_matches('/').to_ascii_lowercase();
    all_commands()
        .iter()
        .filter(|command| command.name.starts_with(&prefix))
        .collect()
}

const COMMANDS: &[Command] = &[
    Command {
        name: "sessions",
        usage: "/sessions",
        help: "List sessions, marking the selected one.",
        parser: super::parse_sessions,
    },
    Command {
        name: "new",
        usage: "/new [title]",
        help: "Create a session and switch to it.",
        parser: super::parse_new,
    },
    Command {
        name: "switch",
        usage: "/switch <id>",
        help: "Select a session and load its history.",
        parser: super::parse_switch,
    },
    Command {
        name: "delete",
        usage: "/delete <id>",
        help: "Delete a session.",
        parser: super::parse_delete,
    },
    Command {
        name: "history",
        usage: "/history",
        help: "Reload and print the selected session's messages.",
        parser: super::parse_history,
    },
    Command {
        name: "log",
        usage: "/log [file]",
        help: "Start logging to a file, or pause/resume the current log.",
        parser: super::parse_log,
    },
    Command {
        name: "help",
        usage: "/help",
        help: "Show available commands.",
        parser: super::parse_help,
    },
    Command {
        name: "quit",
        usage: "/quit",
        help: "Leave the chat.",
        parser: super::parse_quit,
    },
];
