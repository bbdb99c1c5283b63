pub mod agent;
pub mod cli;
pub mod config;
pub mod controller;
pub mod export;
pub mod history;
pub mod llm;
pub mod models;
pub mod repl;

use agent::ChatAgent;
use cli::Args;
use history::{ initialize_snapshot_store, SnapshotStore };
use history::repair::{ apply_repair, repair_snapshot, RepairReport };
use log::info;
use std::error::Error;

fn print_repair_report(report: Option<&RepairReport>, applied: bool) {
    let Some(report) = report else {
        println!("No repairable chat history found");
        return;
    };
    let verb = if applied { "Removed" } else { "Would remove" };
    println!(
        "{} {} duplicate chat(s) and {} duplicate message(s); {} chat(s) remain",
        verb,
        report.chats_removed(),
        report.messages_removed(),
        report.history.chats.len()
    );
}

/// Repairs the stored history in place, or reports what a repair would do.
/// Only the snapshot store is touched.
pub async fn repair_stored_history(
    args: &Args
) -> Result<Option<RepairReport>, Box<dyn Error + Send + Sync>> {
    let store = initialize_snapshot_store(args)?;
    if args.apply_repair {
        return Ok(apply_repair(store.as_ref(), &args.store_key).await?);
    }
    let raw = store.load(&args.store_key).await?;
    Ok(raw.as_deref().and_then(repair_snapshot))
}

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("History Store Type: {}", args.store_type);
    info!("History Store Key: {}", args.store_key);
    info!("Save Debounce: {}ms", args.save_debounce_ms);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Temperature: {}, Max Tokens: {}", args.chat_temperature, args.chat_max_tokens);
    info!("Prompts Path: {}", args.prompts_path.as_deref().unwrap_or("built-in"));
    info!("-------------------------");

    if args.repair || args.apply_repair {
        let report = repair_stored_history(&args).await?;
        print_repair_report(report.as_ref(), args.apply_repair);
        return Ok(());
    }

    let mut agent = ChatAgent::new(&args)?;

    repl::run(&mut agent).await
}
