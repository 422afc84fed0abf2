//! Line-oriented chat: reads prompts and slash commands from stdin while printing
//! replies as they stream in.

use std::error::Error;
use std::io::{self, Write};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::cli::conversations;
use crate::cli::render::{self, ImageOutput, StreamPrinter};
use crate::cli::session::{parse_bot, Session};
use crate::commands::{help_text, process_input, Input, ReplCommand};
use crate::core::conversation::Conversation;
use crate::core::events::StoreEvent;
use crate::core::ids::ConversationId;
use crate::core::message::{Message, Role};
use crate::providers::{BotKind, ExchangeError};
use crate::utils::logging::TranscriptLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub async fn run_chat(
    session: Session,
    conversation: Option<String>,
    log_file: Option<String>,
) -> Result<(), Box<dyn Error>> {
    let log = match log_file {
        Some(path) => TranscriptLog::open(path)?,
        None => TranscriptLog::disabled(),
    };
    let mut repl = ChatRepl::new(session, log);

    if let Some(target) = conversation {
        match repl.find_conversation(&target) {
            Some(id) => {
                repl.session.orchestrator.set_current(&id);
                repl.print_history()?;
            }
            None => {
                eprintln!("❌ No conversation matches '{target}'");
                std::process::exit(1);
            }
        }
    }

    let mut events = repl.session.orchestrator.engine().subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Type a message, or /help for commands.");
    repl.prompt()?;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if repl.handle_line(&line)? == Flow::Quit {
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(event) => repl.on_event(&event)?,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event receiver lagged");
                    repl.refresh()?;
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    repl.session.orchestrator.cancel_all();
    Ok(())
}

struct ChatRepl {
    session: Session,
    printer: StreamPrinter,
    log: TranscriptLog,
    shown_error: Option<ExchangeError>,
    current_name: String,
}

impl ChatRepl {
    fn new(session: Session, log: TranscriptLog) -> Self {
        let current_name = session
            .orchestrator
            .engine()
            .read(|state| state.conversations().current().map(|c| c.name.clone()))
            .unwrap_or_default();
        Self {
            session,
            printer: StreamPrinter::new(),
            log,
            shown_error: None,
            current_name,
        }
    }

    fn prompt(&self) -> io::Result<()> {
        let mut out = io::stdout();
        write!(out, "> ")?;
        out.flush()
    }

    fn current(&self) -> Option<Conversation> {
        self.session
            .orchestrator
            .engine()
            .read(|state| state.conversations().current().cloned())
    }

    fn current_messages(&self) -> Vec<Message> {
        match self.current() {
            Some(conversation) => self
                .session
                .orchestrator
                .engine()
                .read(|state| state.messages(&conversation.id).to_vec()),
            None => Vec::new(),
        }
    }

    /// Accepts a 1-based position from `/list` or a conversation id prefix.
    fn find_conversation(&self, target: &str) -> Option<ConversationId> {
        conversations::find(self.session.orchestrator.engine(), target)
    }

    fn handle_line(&mut self, line: &str) -> Result<Flow, Box<dyn Error>> {
        let flow = match process_input(line) {
            Input::Empty => Flow::Continue,
            Input::Message(text) => {
                self.send(&text)?;
                Flow::Continue
            }
            Input::Command(command) => self.handle_command(command)?,
            Input::Invalid { usage, reason } => {
                eprintln!("❌ {reason} (usage: {usage})");
                Flow::Continue
            }
        };
        if flow == Flow::Continue && !self.printer.is_tracking() {
            self.prompt()?;
        }
        Ok(flow)
    }

    fn send(&mut self, text: &str) -> Result<(), Box<dyn Error>> {
        let orchestrator = &self.session.orchestrator;
        if orchestrator.send(text).is_none() {
            return Ok(());
        }
        if let Err(err) = self.log.log_turn(&Message::user(text)) {
            warn!(error = %err, "failed to write transcript log");
        }
        self.follow_current();
        Ok(())
    }

    fn follow_current(&mut self) {
        if self.printer.is_tracking() {
            println!();
        }
        if let Some(conversation) = self.current() {
            let orchestrator = &self.session.orchestrator;
            self.printer
                .track(orchestrator.engine(), orchestrator.providers(), &conversation.id);
            self.current_name = conversation.name;
        }
    }

    fn handle_command(&mut self, command: ReplCommand) -> Result<Flow, Box<dyn Error>> {
        let orchestrator = self.session.orchestrator.clone();
        match command {
            ReplCommand::Quit => return Ok(Flow::Quit),
            ReplCommand::Help => println!("{}", help_text()),
            ReplCommand::New(bot) => {
                let bot = match bot {
                    Some(raw) => match parse_bot(&raw, orchestrator.default_bot()) {
                        Ok(bot) => Some(bot),
                        Err(err) => {
                            eprintln!("❌ {err}");
                            return Ok(Flow::Continue);
                        }
                    },
                    None => None,
                };
                if let Some(bot) = &bot {
                    if let Err(err) = orchestrator.providers().resolve(bot) {
                        eprintln!("❌ {}", err.message);
                        return Ok(Flow::Continue);
                    }
                }
                self.printer.forget();
                let id = orchestrator.new_conversation(bot);
                self.current_name.clear();
                if let Some(conversation) = self.current() {
                    println!("Started conversation {id} with {}", conversation.bot);
                }
            }
            ReplCommand::List => self.print_list(),
            ReplCommand::Switch(target) => match self.find_conversation(&target) {
                Some(id) => {
                    self.printer.forget();
                    orchestrator.set_current(&id);
                    if let Some(conversation) = self.current() {
                        self.current_name = conversation.name.clone();
                        println!("Switched to {}", conversation.display_name());
                    }
                    self.print_history()?;
                }
                None => eprintln!("❌ No conversation matches '{target}'"),
            },
            ReplCommand::History => self.print_history()?,
            ReplCommand::Retry => {
                let Some(conversation) = self.current() else {
                    eprintln!("❌ No current conversation");
                    return Ok(Flow::Continue);
                };
                let messages = self.current_messages();
                let target = messages.iter().rev().find(|m| m.is_assistant());
                match target.and_then(|m| orchestrator.retry_from(&conversation.id, &m.id)) {
                    Some(_) => self.after_rewrite(&conversation.id),
                    None => eprintln!("❌ Nothing to retry"),
                }
            }
            ReplCommand::Edit(text) => {
                let Some(conversation) = self.current() else {
                    eprintln!("❌ No current conversation");
                    return Ok(Flow::Continue);
                };
                let messages = self.current_messages();
                let target = messages.iter().rev().find(|m| m.is_user());
                match target.and_then(|m| orchestrator.edit_and_resend(&conversation.id, &m.id, &text)) {
                    Some(_) => self.after_rewrite(&conversation.id),
                    None => eprintln!("❌ No message of yours to edit"),
                }
            }
            ReplCommand::Delete(position) => {
                let Some(conversation) = self.current() else {
                    eprintln!("❌ No current conversation");
                    return Ok(Flow::Continue);
                };
                match self.current_messages().get(position - 1) {
                    Some(message) => {
                        orchestrator.delete_message(&conversation.id, &message.id);
                        println!("Deleted message {position}");
                    }
                    None => eprintln!("❌ No message {position}"),
                }
            }
            ReplCommand::Clear => {
                if let Some(conversation) = self.current() {
                    orchestrator.clear_messages(&conversation.id);
                    self.printer.forget();
                    if let Err(err) = self.log.rewrite(&[]) {
                        warn!(error = %err, "failed to rewrite transcript log");
                    }
                    println!("Cleared {}", conversation.display_name());
                }
            }
            ReplCommand::Abort => {
                let aborted = self
                    .current()
                    .is_some_and(|conversation| orchestrator.cancel(&conversation.id));
                if aborted {
                    self.refresh()?;
                    println!("(aborted)");
                } else {
                    println!("Nothing to abort");
                }
            }
            ReplCommand::Dismiss => {
                orchestrator.dismiss_error();
                self.shown_error = None;
            }
            ReplCommand::Rename(name) => {
                if let Some(conversation) = self.current() {
                    orchestrator.rename(&conversation.id, &name);
                    self.current_name = name.trim().to_string();
                    println!("Renamed to {}", self.current_name);
                }
            }
            ReplCommand::System(prompt) => match self.current() {
                Some(conversation) => {
                    let set = prompt.is_some();
                    orchestrator.set_system_info(&conversation.id, prompt);
                    println!("{}", if set { "System prompt set" } else { "System prompt cleared" });
                }
                None => eprintln!("❌ No current conversation"),
            },
            ReplCommand::Log => match self.log.toggle() {
                Ok(status) => println!("{status}"),
                Err(err) => eprintln!("❌ {err}"),
            },
        }
        Ok(Flow::Continue)
    }

    fn after_rewrite(&mut self, conversation_id: &ConversationId) {
        let messages = self
            .session
            .orchestrator
            .engine()
            .read(|state| state.messages(conversation_id).to_vec());
        if let Err(err) = self.log.rewrite(&messages) {
            warn!(error = %err, "failed to rewrite transcript log");
        }
        self.follow_current();
    }

    fn on_event(&mut self, event: &StoreEvent) -> Result<(), Box<dyn Error>> {
        match event {
            StoreEvent::MessagesChanged(_) | StoreEvent::StreamChanged(_) => self.refresh(),
            StoreEvent::ErrorChanged => self.show_error(),
            StoreEvent::ConversationsChanged => {
                self.announce_title();
                Ok(())
            }
            StoreEvent::CurrentChanged(_) => Ok(()),
        }
    }

    fn refresh(&mut self) -> Result<(), Box<dyn Error>> {
        let settled = self
            .printer
            .refresh(self.session.orchestrator.engine(), &mut io::stdout())?;
        if let Some(message) = settled {
            self.finish_turn(&message)?;
        }
        Ok(())
    }

    fn finish_turn(&mut self, message: &Message) -> Result<(), Box<dyn Error>> {
        let kind = self
            .current()
            .and_then(|c| self.session.orchestrator.providers().resolve(&c.bot).ok())
            .map(|(_, meta)| meta.kind);
        if kind == Some(BotKind::ImageGeneration) && !message.content.is_empty() {
            match render::render_image(&message.content, &self.session.data_dir, &message.id) {
                Ok(ImageOutput::Url(url)) => println!("🖼  {url}"),
                Ok(ImageOutput::Saved(path)) => println!("🖼  saved to {}", path.display()),
                Err(err) => eprintln!("❌ Could not read image reply: {err}"),
            }
            if let Some(revised) = render::revised_prompt(&message.content) {
                println!("   ({revised})");
            }
        }
        if let Err(err) = self.log.log_turn(message) {
            warn!(error = %err, "failed to write transcript log");
        }
        self.show_error()?;
        self.prompt()?;
        Ok(())
    }

    fn show_error(&mut self) -> Result<(), Box<dyn Error>> {
        let error = self
            .session
            .orchestrator
            .engine()
            .read(|state| state.error().cloned());
        if error.is_some() && error != self.shown_error {
            if let Some(err) = &error {
                eprintln!("❌ {}: {}", err.code, err.message);
            }
        }
        self.shown_error = error;
        Ok(())
    }

    fn announce_title(&mut self) {
        let Some(conversation) = self.current() else {
            return;
        };
        if self.current_name.is_empty() && !conversation.name.is_empty() {
            println!("\n📝 {}", conversation.name);
            self.current_name = conversation.name;
        }
    }

    fn print_list(&self) {
        let rows = conversations::rows(self.session.orchestrator.engine());
        if rows.is_empty() {
            println!("No conversations yet.");
            return;
        }
        for (i, row) in rows.iter().enumerate() {
            let marker = if row.current { "*" } else { " " };
            println!(
                "{marker} {:>2}. {}  [{}, {} messages]",
                i + 1,
                row.name,
                row.bot,
                row.messages
            );
        }
    }

    fn print_history(&self) -> io::Result<()> {
        let mut out = io::stdout();
        for (i, message) in self.current_messages().iter().enumerate() {
            let label = match message.role {
                Role::User => "you",
                Role::Assistant => "bot",
                Role::System => "system",
            };
            writeln!(out, "[{}] {label}: {}", i + 1, message.content)?;
        }
        out.flush()
    }
}
