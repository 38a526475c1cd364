//! An interactive trip-planning chat in the terminal.

#[macro_use]
extern crate tracing;

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::select;
use tokio::time::sleep;
use tripagent::AppConfig;
use tripagent::core::{
    ConversationEvent, ConversationManager, EventStream, ManagerState,
    TripContextCache,
};
use tripagent::model::{ChatContext, ConversationId, Message, Role};

const BAR_CHAR: &str = "▎";

const HELP: &str = "\
/new            start a new trip
/list           list saved trips
/open <n>       continue trip number <n> from /list
/delete <n>     delete trip number <n> from /list
/abort          stop waiting for the current answer
/quit           leave";

enum Command<'a> {
    Chat(&'a str),
    New,
    List,
    Open(&'a str),
    Delete(&'a str),
    Abort,
    Help,
    Quit,
}

impl<'a> Command<'a> {
    fn parse(line: &'a str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Some(Command::Chat(line));
        };
        let (name, arg) = command
            .split_once(char::is_whitespace)
            .map(|(name, arg)| (name, arg.trim()))
            .unwrap_or((command, ""));
        Some(match name {
            "new" => Command::New,
            "list" => Command::List,
            "open" => Command::Open(arg),
            "delete" => Command::Delete(arg),
            "abort" => Command::Abort,
            "quit" | "exit" => Command::Quit,
            _ => Command::Help,
        })
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return;
        }
    };

    let cache = Arc::new(TripContextCache::default());
    let manager = config.build_manager(Arc::clone(&cache));
    match manager.load_from_storage().await {
        Ok(count) => debug!("loaded {count} saved trips"),
        Err(err) => eprintln!("{} {err}", "could not load saved trips:".red()),
    }

    let progress_style = ProgressStyle::with_template("{spinner} {wide_msg}")
        .unwrap()
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");

    let mut input = BufReader::new(io::stdin()).lines();
    println!("{}", "Where would you like to go? /help lists commands.".dimmed());
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = read_line(&mut input).await else {
            break;
        };
        let Some(command) = Command::parse(&line) else {
            continue;
        };

        let result = match command {
            Command::Chat(content) => {
                chat(&manager, &cache, content, &progress_style, &mut input)
                    .await
            }
            Command::New => manager
                .switch_conversation(ConversationId::DEFAULT)
                .await
                .map(|_| println!("{}", "Starting a new trip.".dimmed())),
            Command::List => manager.state().await.map(|state| print_list(&state)),
            Command::Open(arg) => open(&manager, arg).await,
            Command::Delete(arg) => delete(&manager, arg).await,
            Command::Abort => {
                println!("{}", "Nothing to abort.".dimmed());
                Ok(())
            }
            Command::Help => {
                println!("{HELP}");
                Ok(())
            }
            Command::Quit => break,
        };
        if let Err(err) = result {
            eprintln!("{} {err}", "error:".red());
        }
    }

    manager.shutdown().await;
}

async fn chat(
    manager: &ConversationManager,
    cache: &TripContextCache,
    content: &str,
    progress_style: &ProgressStyle,
    input: &mut Lines<BufReader<Stdin>>,
) -> Result<(), tripagent::core::Error> {
    let state = manager.state().await?;
    let conversation_id = state.active_conversation.clone();
    let history = state
        .active()
        .map(|conv| conv.messages.clone())
        .unwrap_or_default();
    let context = ChatContext {
        trip: cache
            .summary(&conversation_id)
            .map(|summary| summary.to_trip_details()),
        ..Default::default()
    };

    let mut events = manager.subscribe();
    let mut sending = tokio::spawn({
        let manager = manager.clone();
        let conversation_id = conversation_id.clone();
        let content = content.to_owned();
        async move {
            manager
                .send_message(conversation_id, &content, context, &history)
                .await
        }
    });

    let progress_bar = ProgressBar::new_spinner();
    progress_bar.set_style(progress_style.clone());
    progress_bar.set_message("🤔 Thinking...");

    let mut input_closed = false;
    let result = loop {
        progress_bar.inc(1);
        select! {
            result = &mut sending => break result,
            line = read_line(input), if !input_closed => {
                match line.as_deref().map(Command::parse) {
                    Some(Some(Command::Abort)) => {
                        if !manager.abort_request(&conversation_id).await? {
                            progress_bar.println("Not sent yet, try again.");
                        }
                    }
                    // Closed stdin stops the request too.
                    None => {
                        input_closed = true;
                        manager.abort_request(&conversation_id).await?;
                    }
                    Some(None) => {}
                    Some(Some(_)) => progress_bar.println(
                        "Still waiting for an answer, /abort to stop.",
                    ),
                }
            }
            Some(event) = events.recv() => {
                if let ConversationEvent::LoadingChanged {
                    status: Some(status),
                    ..
                } = event
                {
                    progress_bar.set_message(format!("🤔 {status}"));
                }
            }
            _ = sleep(Duration::from_millis(100)) => {}
        }
    };
    progress_bar.finish_and_clear();

    match result {
        Ok(Ok(_)) => {}
        Ok(Err(err)) if err.is_cancelled() => {
            println!("{}", "Stopped.".dimmed());
            return Ok(());
        }
        Ok(Err(err)) => return Err(err),
        Err(err) => {
            error!("chat task failed: {err}");
            return Ok(());
        }
    }

    print_assistant_messages(&mut events);
    Ok(())
}

fn print_assistant_messages(events: &mut EventStream) {
    while let Some(event) = events.try_recv() {
        let ConversationEvent::MessageAdded { message, .. } = event else {
            continue;
        };
        if message.role == Role::Assistant {
            print_message(&message);
        }
    }
}

fn print_message(message: &Message) {
    if message.is_error {
        println!("{}⚠️  {}", BAR_CHAR.bright_red(), message.content.red());
        return;
    }
    println!("{}🧭 {}", BAR_CHAR.bright_cyan(), message.content.bright_white());
    for photo in &message.photos {
        let caption = photo.caption.as_deref().unwrap_or("photo");
        println!("{}📷 {caption}: {}", BAR_CHAR.bright_cyan(), photo.url.dimmed());
    }
}

fn print_list(state: &ManagerState) {
    if state.conversations.is_empty() {
        println!("{}", "No saved trips yet.".dimmed());
        return;
    }
    for (idx, conv) in state.conversations.iter().enumerate() {
        let is_active =
            state.active_conversation.as_str() == Some(conv.id.as_str());
        let marker = if is_active { "*" } else { " " };
        let loading = if state.is_loading(&conv.conversation_id()) {
            " (waiting)"
        } else {
            ""
        };
        println!(
            "{marker}{:>3}. {} {}{loading}",
            idx + 1,
            conv.title.bright_white(),
            conv.updated_at.format("%Y-%m-%d %H:%M").dimmed()
        );
    }
}

async fn pick(
    manager: &ConversationManager,
    arg: &str,
) -> Result<Option<ConversationId>, tripagent::core::Error> {
    let state = manager.state().await?;
    let picked = arg
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_sub(1))
        .and_then(|idx| state.conversations.get(idx))
        .map(|conv| conv.conversation_id());
    if picked.is_none() {
        println!("{}", "No such trip, see /list.".dimmed());
    }
    Ok(picked)
}

async fn open(
    manager: &ConversationManager,
    arg: &str,
) -> Result<(), tripagent::core::Error> {
    let Some(conversation_id) = pick(manager, arg).await? else {
        return Ok(());
    };
    manager.switch_conversation(conversation_id).await?;
    let state = manager.state().await?;
    if let Some(conv) = state.active() {
        println!("{}", conv.title.bold());
        for message in &conv.messages {
            match message.role {
                Role::User => println!("> {}", message.content.dimmed()),
                Role::Assistant => print_message(message),
            }
        }
    }
    Ok(())
}

async fn delete(
    manager: &ConversationManager,
    arg: &str,
) -> Result<(), tripagent::core::Error> {
    let Some(conversation_id) = pick(manager, arg).await? else {
        return Ok(());
    };
    if let Some(id) = conversation_id.as_str() {
        manager.delete_conversation(id).await?;
        println!("{}", "Deleted.".dimmed());
    }
    Ok(())
}

async fn read_line(input: &mut Lines<BufReader<Stdin>>) -> Option<String> {
    match input.next_line().await {
        Ok(line) => line,
        Err(err) => {
            error!("error reading input: {}", err);
            None
        }
    }
}
