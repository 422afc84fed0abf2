//! One-shot `say` command: send a single prompt, stream the reply to stdout, exit.

use std::error::Error;
use std::io;

use tokio::sync::broadcast::error::RecvError;

use crate::cli::render::{self, ImageOutput, StreamPrinter};
use crate::cli::session::Session;
use crate::providers::BotKind;

pub async fn run_say(session: Session, prompt: Vec<String>) -> Result<(), Box<dyn Error>> {
    let prompt = prompt.join(" ");
    if prompt.trim().is_empty() {
        eprintln!("Usage: murmur say <prompt>");
        std::process::exit(1);
    }

    let orchestrator = session.orchestrator.clone();
    let engine = orchestrator.engine().clone();
    let mut events = engine.subscribe();

    let Some(task) = orchestrator.send(&prompt) else {
        report_error(&session);
        std::process::exit(1);
    };
    let Some(conversation) = engine.read(|state| state.conversations().current().cloned()) else {
        return Err("conversation vanished before the reply started".into());
    };
    let kind = orchestrator
        .providers()
        .resolve(&conversation.bot)
        .map(|(_, meta)| meta.kind)?;

    let mut printer = StreamPrinter::new();
    printer.track(&engine, orchestrator.providers(), &conversation.id);
    let mut out = io::stdout();

    let settled = loop {
        if let Some(message) = printer.refresh(&engine, &mut out)? {
            break message;
        }
        match events.recv().await {
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => return Err("engine closed".into()),
        }
    };
    // Settlement is observed before the task returns; wait so nothing is left running.
    let _ = task.await;

    if engine.read(|state| state.error().is_some()) {
        report_error(&session);
        std::process::exit(1);
    }

    if kind == BotKind::ImageGeneration {
        match render::render_image(&settled.content, &session.data_dir, &settled.id)? {
            ImageOutput::Url(url) => println!("{url}"),
            ImageOutput::Saved(path) => println!("{}", path.display()),
        }
    }
    Ok(())
}

fn report_error(session: &Session) {
    let error = session
        .orchestrator
        .engine()
        .read(|state| state.error().cloned());
    match error {
        Some(err) => eprintln!("❌ Error: {}", err.message),
        None => eprintln!("❌ Error: the request could not be sent"),
    }
}
