//! Non-interactive conversation management: `list` and `delete`.

use std::error::Error;

use crate::core::engine::EngineHandle;
use crate::core::ids::ConversationId;
use crate::core::orchestrator::Orchestrator;

pub struct ConversationRow {
    pub id: ConversationId,
    pub name: String,
    pub bot: String,
    pub messages: usize,
    pub last_used: String,
    pub current: bool,
}

/// Conversations most recently used first.
pub fn rows(engine: &EngineHandle) -> Vec<ConversationRow> {
    engine.read(|state| {
        let current = state.conversations().current_id();
        state
            .conversations()
            .list()
            .into_iter()
            .map(|conversation| ConversationRow {
                id: conversation.id.clone(),
                name: conversation.display_name().to_string(),
                bot: conversation.bot.to_string(),
                messages: state.messages(&conversation.id).len(),
                last_used: conversation
                    .last_use_time
                    .format("%Y-%m-%d %H:%M")
                    .to_string(),
                current: current == Some(&conversation.id),
            })
            .collect()
    })
}

pub fn list_conversations(orchestrator: &Orchestrator) -> Result<(), Box<dyn Error>> {
    let rows = rows(orchestrator.engine());
    if rows.is_empty() {
        println!("No conversations yet. Run 'murmur' to start one.");
        return Ok(());
    }
    for (i, row) in rows.iter().enumerate() {
        let marker = if row.current { "*" } else { " " };
        println!(
            "{marker} {:>2}. {}  {}  [{}, {} messages, {}]",
            i + 1,
            row.id,
            row.name,
            row.bot,
            row.messages,
            row.last_used
        );
    }
    Ok(())
}

/// Resolves a 1-based list position or an id prefix.
pub fn find(engine: &EngineHandle, target: &str) -> Option<ConversationId> {
    let rows = rows(engine);
    if let Ok(n) = target.parse::<usize>() {
        return n.checked_sub(1).and_then(|i| rows.get(i)).map(|row| row.id.clone());
    }
    let mut matches = rows
        .into_iter()
        .filter(|row| row.id.as_str().starts_with(target));
    match (matches.next(), matches.next()) {
        (Some(row), None) => Some(row.id),
        _ => None,
    }
}

pub fn delete_conversation(orchestrator: &Orchestrator, target: &str) -> Result<(), Box<dyn Error>> {
    let Some(id) = find(orchestrator.engine(), target) else {
        eprintln!("❌ No conversation matches '{target}'");
        std::process::exit(1);
    };
    orchestrator.delete_conversation(&id);
    println!("✅ Deleted conversation {id}");
    Ok(())
}
