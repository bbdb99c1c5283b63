use crate::agent::ChatAgent;
use crate::export::{ contains_itinerary, export_chat_markdown, export_itinerary };
use log::{ error, warn };
use std::error::Error;
use std::io::Write;
use std::path::Path;
use tokio::io::{ AsyncBufReadExt, BufReader };

const HELP: &str = "\
Commands:
  /new                 start a new chat
  /list                list saved chats
  /load <n|id>         switch to a chat
  /delete <n|id>       delete a chat
  /clear               delete every chat
  /export <file>       save the latest itinerary as Markdown
  /save <file>         save the whole chat as Markdown
  /<starter>           send a starter prompt (see /help)
  /help                show this help
  /quit                exit
Anything else is sent to the assistant.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    NewChat,
    List,
    Load(String),
    Delete(String),
    ClearAll,
    Export(String),
    Save(String),
    Starter(String),
    Usage(&'static str),
    Help,
    Quit,
    Message(String),
}

pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Message(line.to_string()));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim().to_string()),
        None => (rest, String::new()),
    };
    let command = match (name.to_lowercase().as_str(), arg.is_empty()) {
        ("new", _) => Command::NewChat,
        ("list" | "ls", _) => Command::List,
        ("load", false) => Command::Load(arg),
        ("delete" | "rm", false) => Command::Delete(arg),
        ("clear", _) => Command::ClearAll,
        ("export", false) => Command::Export(arg),
        ("save", false) => Command::Save(arg),
        ("load", true) => Command::Usage("/load <n|id>"),
        ("delete" | "rm", true) => Command::Usage("/delete <n|id>"),
        ("export", true) => Command::Usage("/export <file>"),
        ("save", true) => Command::Usage("/save <file>"),
        ("help" | "?", _) => Command::Help,
        ("quit" | "exit" | "q", _) => Command::Quit,
        (other, true) => Command::Starter(other.to_string()),
        _ => Command::Help,
    };
    Some(command)
}

/// Accepts a 1-based position from `/list` or a literal chat id.
fn resolve_chat_ref(agent: &ChatAgent, reference: &str) -> Option<String> {
    let chats = &agent.session.history().chats;
    if let Ok(n) = reference.parse::<usize>() {
        if n >= 1 && n <= chats.len() {
            return Some(chats[n - 1].id.clone());
        }
    }
    chats
        .iter()
        .find(|c| c.id == reference)
        .map(|c| c.id.clone())
}

fn print_transcript(agent: &ChatAgent) {
    for message in agent.controller.transcript() {
        println!("[{}] {}", message.role, message.content);
    }
}

fn print_chat_list(agent: &ChatAgent) {
    let history = agent.session.history();
    if history.chats.is_empty() {
        println!("No chat history yet");
        return;
    }
    println!("Chat History ({})", history.chats.len());
    for (i, chat) in history.chats.iter().enumerate() {
        let marker = if history.current_chat_id.as_deref() == Some(chat.id.as_str()) { "*" } else { " " };
        println!(
            "{} {:>2}. {}  ({} messages, {})",
            marker,
            i + 1,
            chat.title,
            chat.messages.len(),
            chat.created_at.format("%Y-%m-%d %H:%M")
        );
    }
}

async fn send_message(agent: &mut ChatAgent, input: &str) {
    print!("assistant> ");
    let _ = std::io::stdout().flush();
    let result = agent.send(input, |token| {
        print!("{}", token);
        let _ = std::io::stdout().flush();
    }).await;
    println!();

    match result {
        Ok(Some(reply)) => {
            if contains_itinerary(&reply.content) {
                println!("(itinerary detected, use /export <file> to save it)");
            }
        }
        Ok(None) => {}
        Err(e) => println!("error: {}", e),
    }
}

/// Handles one line. Returns false when the user asked to quit.
pub async fn handle_line(agent: &mut ChatAgent, line: &str) -> bool {
    let Some(command) = parse_command(line) else {
        return true;
    };

    match command {
        Command::Quit => {
            return false;
        }
        Command::Help => {
            println!("{}", HELP);
            for starter in &agent.prompt_config.starter_prompts {
                println!("  /{:<19} {}", starter.key, starter.label);
            }
        }
        Command::Usage(usage) => println!("Usage: {}", usage),
        Command::NewChat => {
            agent.controller.new_chat(&mut agent.session);
            println!("Started a new chat");
        }
        Command::List => print_chat_list(agent),
        Command::Load(reference) => {
            match resolve_chat_ref(agent, &reference) {
                Some(id) => {
                    agent.controller.select_chat(&mut agent.session, &id);
                    print_transcript(agent);
                }
                None => println!("No chat matches '{}'", reference),
            }
        }
        Command::Delete(reference) => {
            match resolve_chat_ref(agent, &reference) {
                Some(id) => {
                    agent.session.delete_chat(&id);
                    agent.controller.sync_from_session(&agent.session);
                    println!("Deleted chat");
                }
                None => println!("No chat matches '{}'", reference),
            }
        }
        Command::ClearAll => {
            agent.session.clear_all();
            agent.controller.sync_from_session(&agent.session);
            println!("Cleared all chat history");
        }
        Command::Export(path) | Command::Save(path) if agent.session.current_chat().is_none() => {
            println!("Nothing to export yet ({})", path);
        }
        Command::Export(path) => {
            if let Some(chat) = agent.session.current_chat() {
                match export_itinerary(chat, Path::new(&path)).await {
                    Ok(()) => println!("Itinerary saved to {}", path),
                    Err(e) => println!("Export unavailable: {}", e),
                }
            }
        }
        Command::Save(path) => {
            if let Some(chat) = agent.session.current_chat() {
                match export_chat_markdown(chat, Path::new(&path)).await {
                    Ok(()) => println!("Chat saved to {}", path),
                    Err(e) => println!("Export unavailable: {}", e),
                }
            }
        }
        Command::Starter(key) => {
            let prompt = agent.prompt_config.starter(&key).map(|s| s.prompt.clone());
            match prompt {
                Ok(prompt) => {
                    println!("you> {}", prompt);
                    send_message(agent, &prompt).await;
                }
                Err(e) => {
                    warn!("{}", e);
                    println!("Unknown command '/{}', try /help", key);
                }
            }
        }
        Command::Message(text) => send_message(agent, &text).await,
    }
    true
}

pub async fn run(agent: &mut ChatAgent) -> Result<(), Box<dyn Error + Send + Sync>> {
    agent.start().await;
    println!("How can I help you today? Type /help for commands.");
    print_transcript(agent);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("you> ");
        let _ = std::io::stdout().flush();
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                error!("Failed to read input: {}", e);
                break;
            }
        };
        if !handle_line(agent, &line).await {
            break;
        }
    }

    agent.shutdown().await;
    Ok(())
}
