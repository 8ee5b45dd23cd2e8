#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    Help,
    New,
    Cancel,
    Regenerate,
    /// Edit the user message at transcript index `index` and regenerate from it.
    Edit {
        index: usize,
        text: String,
    },
    Quit,
    Invalid {
        command: String,
        reason: String,
    },
    Unknown(String),
}

pub const HELP_TEXT: &str = "\
/help                 show this help
/new                  start a new session
/cancel               stop the streaming reply
/regenerate           ask the last question again
/edit <n> <text>      rewrite message n and regenerate from it
/quit                 leave the chat";

pub fn parse_slash_command(input: &str) -> Option<SlashCommand> {
    let trimmed = input.trim();
    if !trimmed.starts_with('/') {
        return None;
    }

    let (command, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (trimmed, ""),
    };

    let parsed = match command {
        "/help" => SlashCommand::Help,
        "/new" => SlashCommand::New,
        "/cancel" => SlashCommand::Cancel,
        "/regenerate" => SlashCommand::Regenerate,
        "/edit" => parse_edit(rest),
        "/quit" => SlashCommand::Quit,
        _ => SlashCommand::Unknown(command.to_string()),
    };

    Some(parsed)
}

fn parse_edit(args: &str) -> SlashCommand {
    let invalid = |reason: &str| SlashCommand::Invalid {
        command: "/edit".to_string(),
        reason: reason.to_string(),
    };

    let (index, text) = match args.split_once(char::is_whitespace) {
        Some((index, text)) => (index, text.trim()),
        None => (args, ""),
    };
    let Ok(index) = index.parse::<usize>() else {
        return invalid("expected a message number");
    };
    if text.is_empty() {
        return invalid("expected the new message text");
    }

    SlashCommand::Edit {
        index,
        text: text.to_string(),
    }
}
