use super::ReplCommand;

pub type CommandParser = fn(&str) -> Result<ReplCommand, String>;

pub struct Command {
    pub name: &'static str,
    pub usage: &'static str,
    pub help: &'static str,
    pub parse: CommandParser,
}

pub fn all_commands() -> &'static [Command] {
    COMMANDS
}

pub fn find_command(name: &str) -> Option<&'static Command> {
    all_commands()
        .iter()
        .find(|command| command.name.eq_ignore_ascii_case(name))
}

fn bare(args: &str, command: ReplCommand) -> Result<ReplCommand, String> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err(format!("unexpected argument: {args}"))
    }
}

fn required<'a>(args: &'a str, what: &str) -> Result<&'a str, String> {
    if args.is_empty() {
        Err(format!("missing {what}"))
    } else {
        Ok(args)
    }
}

fn optional(args: &str) -> Option<String> {
    (!args.is_empty()).then(|| args.to_string())
}

fn position(args: &str) -> Result<usize, String> {
    match required(args, "message number")?.parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("not a message number: {args}")),
    }
}

const COMMANDS: &[Command] = &[
    Command {
        name: "help",
        usage: "/help",
        help: "Show available commands.",
        parse: |args| bare(args, ReplCommand::Help),
    },
    Command {
        name: "new",
        usage: "/new [bot]",
        help: "Start a conversation, optionally with a bot such as openai:image_generation.",
        parse: |args| Ok(ReplCommand::New(optional(args))),
    },
    Command {
        name: "list",
        usage: "/list",
        help: "List conversations, most recently used first.",
        parse: |args| bare(args, ReplCommand::List),
    },
    Command {
        name: "switch",
        usage: "/switch <n|id>",
        help: "Make a listed conversation current.",
        parse: |args| required(args, "conversation").map(|target| ReplCommand::Switch(target.to_string())),
    },
    Command {
        name: "history",
        usage: "/history",
        help: "Print the current transcript with message numbers.",
        parse: |args| bare(args, ReplCommand::History),
    },
    Command {
        name: "retry",
        usage: "/retry",
        help: "Regenerate the last reply.",
        parse: |args| bare(args, ReplCommand::Retry),
    },
    Command {
        name: "edit",
        usage: "/edit <text>",
        help: "Replace your last message and resend it.",
        parse: |args| required(args, "replacement text").map(|text| ReplCommand::Edit(text.to_string())),
    },
    Command {
        name: "delete",
        usage: "/delete <n>",
        help: "Delete message number n from the transcript.",
        parse: |args| position(args).map(ReplCommand::Delete),
    },
    Command {
        name: "clear",
        usage: "/clear",
        help: "Remove every message from the current conversation.",
        parse: |args| bare(args, ReplCommand::Clear),
    },
    Command {
        name: "abort",
        usage: "/abort",
        help: "Stop the reply in progress, keeping what arrived.",
        parse: |args| bare(args, ReplCommand::Abort),
    },
    Command {
        name: "dismiss",
        usage: "/dismiss",
        help: "Clear the last error.",
        parse: |args| bare(args, ReplCommand::Dismiss),
    },
    Command {
        name: "rename",
        usage: "/rename <name>",
        help: "Rename the current conversation.",
        parse: |args| required(args, "name").map(|name| ReplCommand::Rename(name.to_string())),
    },
    Command {
        name: "system",
        usage: "/system [prompt]",
        help: "Set the system prompt, or clear it when no prompt is given.",
        parse: |args| Ok(ReplCommand::System(optional(args))),
    },
    Command {
        name: "log",
        usage: "/log",
        help: "Pause or resume the transcript log given with --log.",
        parse: |args| bare(args, ReplCommand::Log),
    },
    Command {
        name: "quit",
        usage: "/quit",
        help: "Leave the chat.",
        parse: |args| bare(args, ReplCommand::Quit),
    },
];
