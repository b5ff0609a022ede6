//! Interactive research REPL.
//!
//! Plain input runs a research turn against the active session (creating one
//! on first use); slash commands manage sessions. Ctrl+C during a turn
//! cancels it; at the prompt it just clears the line.

use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use super::driver::{RenderSink, ResearchClient};
use super::machine::Update;
use crate::models::ChatSession;

const HELP: &str = "\
Commands:
  /chats            list sessions
  /open <id>        switch to a session and show its transcript
  /new              start fresh (next query creates a session)
  /filter <sub>     scope new sessions to one subreddit (/filter to clear)
  /title <text>     rename the active session
  /delete           delete the active session
  /help             show this help
  /quit             exit
Anything else runs a research query.";

/// Sink that renders to the terminal as fragments arrive.
struct PrintSink;

impl RenderSink for PrintSink {
    fn apply(&mut self, update: Update) {
        match update {
            Update::RenderFragments(text) => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            Update::RenderSentiment(sentiment) => {
                println!(
                    "[sentiment] {:.0}/100 {} (confidence {:.0}%)\n",
                    sentiment.score,
                    sentiment.label.as_str(),
                    sentiment.confidence * 100.0
                );
            }
            Update::ShowProvisional => {
                println!();
            }
            Update::ClearTransient => {
                println!("\n(turn cancelled)");
            }
            // handled by the driver
            Update::Reconcile { .. } => {}
        }
    }

    fn replace(&mut self, session: &ChatSession) {
        if !session.sources.is_empty() {
            println!("\nSources:");
            for (i, source) in session.sources.iter().enumerate() {
                let upvotes = source
                    .upvotes
                    .map(|n| format!(", {n} upvotes"))
                    .unwrap_or_default();
                println!("  [{}] {} (r/{}{upvotes})", i + 1, source.title, source.subreddit);
            }
        }
    }
}

/// Run the REPL against a server.
pub async fn run(server_url: &str) -> Result<()> {
    let client = ResearchClient::new(server_url);
    let mut editor = DefaultEditor::new()?;
    let mut active_chat: Option<String> = None;
    let mut subreddit_filter: Option<String> = None;

    println!("redlens - Reddit sentiment research");
    println!("Type /help for commands.\n");

    loop {
        let prompt = match &active_chat {
            Some(id) => format!("{}> ", &id[..id.len().min(8)]),
            None => "> ".to_string(),
        };
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => continue,
            Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        if let Some(rest) = line.strip_prefix('/') {
            let mut parts = rest.splitn(2, ' ');
            let command = parts.next().unwrap_or_default();
            let arg = parts.next().map(str::trim).filter(|s| !s.is_empty());

            match command {
                "quit" | "exit" => break,
                "help" => println!("{HELP}"),
                "chats" => match client.list_chats().await {
                    Ok(chats) if chats.is_empty() => println!("no sessions yet"),
                    Ok(chats) => {
                        for chat in chats {
                            println!("  {}  {}  ({} messages)", chat.id, chat.title, chat.messages.len());
                        }
                    }
                    Err(e) => eprintln!("error: {e}"),
                },
                "open" => match arg {
                    Some(id) => match client.get_chat(id).await {
                        Ok(chat) => {
                            println!("== {} ==", chat.title);
                            for message in &chat.messages {
                                println!("[{:?}] {}", message.role, message.content);
                            }
                            active_chat = Some(chat.id);
                        }
                        Err(e) => eprintln!("error: {e}"),
                    },
                    None => eprintln!("usage: /open <id>"),
                },
                "new" => {
                    active_chat = None;
                    println!("next query starts a new session");
                }
                "filter" => {
                    subreddit_filter = arg.map(str::to_string);
                    match &subreddit_filter {
                        Some(sub) => println!("new sessions scoped to r/{sub}"),
                        None => println!("subreddit filter cleared"),
                    }
                }
                "title" => match (&active_chat, arg) {
                    (Some(id), Some(title)) => {
                        if let Err(e) = client.update_title(id, title).await {
                            eprintln!("error: {e}");
                        }
                    }
                    (None, _) => eprintln!("no active session"),
                    (_, None) => eprintln!("usage: /title <text>"),
                },
                "delete" => match &active_chat {
                    Some(id) => {
                        match client.delete_chat(id).await {
                            Ok(()) => {
                                println!("deleted");
                                active_chat = None;
                            }
                            Err(e) => eprintln!("error: {e}"),
                        }
                    }
                    None => eprintln!("no active session"),
                },
                other => eprintln!("unknown command: /{other}"),
            }
            continue;
        }

        // A research query. Ctrl+C mid-turn flips the cancel flag.
        let cancel = Arc::new(AtomicBool::new(false));
        let watcher = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.store(true, Ordering::Relaxed);
                }
            })
        };

        let mut sink = PrintSink;
        match client
            .run_turn(
                active_chat.as_deref(),
                line,
                subreddit_filter.as_deref(),
                cancel,
                &mut sink,
            )
            .await
        {
            Ok(chat_id) => active_chat = Some(chat_id),
            Err(e) => eprintln!("error: {e}"),
        }
        watcher.abort();
    }

    Ok(())
}
