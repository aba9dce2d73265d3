use std::error::Error;
use std::io::Write;
use std::sync::Arc;

use log::info;
use tokio::io::{ AsyncBufReadExt, BufReader };

use super::{ render_markdown, ChatController, ConversationState, HttpTransport, TurnOutcome };
use crate::cli::ChatArgs;
use crate::models::message::Role;

const HELP: &str = "Type a message and press Enter. /clear resets the conversation, /quit exits.";

/// Line-oriented chat front-end. Prints the assistant reply as it streams in.
pub async fn run_chat(args: &ChatArgs) -> Result<(), Box<dyn Error + Send + Sync>> {
    let transport = HttpTransport::new(&args.server_url)?;
    info!("Chatting with relay at {}", transport.endpoint());
    let controller = ChatController::new(Arc::new(transport));

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        match line.trim() {
            "/quit" | "/exit" => break,
            "/clear" => {
                controller.clear_chat();
                println!("(conversation cleared)");
            }
            "/help" => println!("{}", HELP),
            _ => run_turn(&controller, &line, args.html).await?,
        }
    }

    Ok(())
}

async fn run_turn(
    controller: &ChatController,
    line: &str,
    html: bool
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let mut watcher = controller.subscribe();
    let mut printed = 0;
    let turn = controller.send_message(line);
    tokio::pin!(turn);

    let outcome = loop {
        tokio::select! {
            outcome = &mut turn => break outcome,
            changed = watcher.changed() => {
                if changed.is_err() {
                    break (&mut turn).await;
                }
                let state = watcher.borrow_and_update().clone();
                printed = print_new_text(&state, printed)?;
            }
        }
    };

    let state = controller.snapshot();
    match outcome {
        TurnOutcome::Skipped => {}
        TurnOutcome::Completed => {
            print_new_text(&state, printed)?;
            println!();
            if html {
                if let Some(reply) = state.messages.last() {
                    println!("{}", render_markdown(&reply.content));
                }
            }
        }
        TurnOutcome::Failed(_) => {
            println!();
            if let Some(error) = &state.error {
                eprintln!("error: {}", error);
            }
        }
    }

    Ok(())
}

/// Writes the part of the streaming reply not yet on screen and returns the
/// new printed length.
fn print_new_text(state: &ConversationState, printed: usize) -> std::io::Result<usize> {
    let Some(reply) = state.messages.last().filter(|m| m.role == Role::Assistant) else {
        return Ok(printed);
    };
    if reply.content.len() <= printed {
        return Ok(printed);
    }

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(reply.content[printed..].as_bytes())?;
    stdout.flush()?;
    Ok(reply.content.len())
}
