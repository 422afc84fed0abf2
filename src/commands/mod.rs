//! Slash commands understood by the chat prompt.

mod registry;

pub use registry::{all_commands, find_command, Command};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Help,
    New(Option<String>),
    List,
    Switch(String),
    History,
    Retry,
    Edit(String),
    Delete(usize),
    Clear,
    Abort,
    Dismiss,
    Rename(String),
    System(Option<String>),
    Log,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Empty,
    Message(String),
    Command(ReplCommand),
    /// A known command with bad arguments.
    Invalid { usage: &'static str, reason: String },
}

pub fn process_input(input: &str) -> Input {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Input::Empty;
    }
    let Some(rest) = trimmed.strip_prefix('/') else {
        return Input::Message(input.to_string());
    };

    let mut parts = rest.splitn(2, char::is_whitespace);
    let command_name = match parts.next() {
        Some(name) if !name.is_empty() => name,
        _ => return Input::Message(input.to_string()),
    };
    let args = parts.next().unwrap_or("").trim();

    match find_command(command_name) {
        Some(command) => match (command.parse)(args) {
            Ok(parsed) => Input::Command(parsed),
            Err(reason) => Input::Invalid {
                usage: command.usage,
                reason,
            },
        },
        None => Input::Message(input.to_string()),
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
        text.push_str(&format!("  {:<width$}  {}\n", command.usage, command.help));
    }
    text.push_str("Anything else is sent as a message.");
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_a_message() {
        assert_eq!(process_input("hello"), Input::Message("hello".into()));
        assert_eq!(process_input("   "), Input::Empty);
        assert_eq!(process_input("/"), Input::Message("/".into()));
    }

    #[test]
    fn unknown_commands_are_sent_verbatim() {
        assert_eq!(
            process_input("/usr/bin is a path"),
            Input::Message("/usr/bin is a path".into())
        );
    }

    #[test]
    fn commands_parse_arguments() {
        assert_eq!(process_input("/new"), Input::Command(ReplCommand::New(None)));
        assert_eq!(
            process_input("/new openai:image_generation"),
            Input::Command(ReplCommand::New(Some("openai:image_generation".into())))
        );
        assert_eq!(
            process_input("/SWITCH 2"),
            Input::Command(ReplCommand::Switch("2".into()))
        );
        assert_eq!(
            process_input("/edit  try again please "),
            Input::Command(ReplCommand::Edit("try again please".into()))
        );
        assert_eq!(process_input("/delete 3"), Input::Command(ReplCommand::Delete(3)));
        assert_eq!(process_input("/system"), Input::Command(ReplCommand::System(None)));
        assert_eq!(process_input("/quit"), Input::Command(ReplCommand::Quit));
    }

    #[test]
    fn bad_arguments_report_usage() {
        match process_input("/delete zero") {
            Input::Invalid { usage, .. } => assert_eq!(usage, "/delete <n>"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(process_input("/delete 0"), Input::Invalid { .. }));
        assert!(matches!(process_input("/rename"), Input::Invalid { .. }));
        assert!(matches!(process_input("/retry now"), Input::Invalid { .. }));
    }

    #[test]
    fn help_lists_every_command() {
        let help = help_text();
        for command in all_commands() {
            assert!(help.contains(command.usage));
        }
    }
}
