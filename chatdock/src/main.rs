//! `chatdock` demo binary.
//!
//! Seeds an in-memory backend with two friends and drives a scripted chat
//! session against it, printing the session's projections after each step.

use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use chatdock::bus::memory::InMemoryBus;
use chatdock::config::{CliArgs, ClientConfig};
use chatdock::events::SessionEvent;
use chatdock::session::{ChatSession, SessionOptions};
use chatdock::store::memory::InMemoryStore;
use chatdock_proto::contact::{Contact, ContactId};
use chatdock_proto::message::{DeliveryState, Timestamp};

type DemoSession = ChatSession<InMemoryStore, InMemoryBus>;

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("chatdock starting");

    let me = ContactId::new(config.user_id.clone().unwrap_or_else(|| "alice".to_string()));
    let bob = ContactId::new("bob");
    let carol = ContactId::new("carol");

    let bus = Arc::new(InMemoryBus::new());
    let store = Arc::new(InMemoryStore::new().with_feed(Arc::clone(&bus)));
    store.add_profile(Contact::new(me.as_str(), "Me"));
    store.add_profile(Contact::new("bob", "Bob").with_online(true));
    store.add_profile(Contact::new("carol", "Carol"));
    store.add_friendship(&me, &bob);
    store.add_friendship(&me, &carol);

    let now = Timestamp::now().as_millis();
    store.seed_message(&bob, &me, "hey, are you around?", Timestamp::from_millis(now.saturating_sub(60_000)));
    store.seed_message(&carol, &me, "lunch tomorrow?", Timestamp::from_millis(now.saturating_sub(30_000)));

    let (session, mut events) = ChatSession::new(
        me.clone(),
        Arc::clone(&store),
        Arc::clone(&bus),
        SessionOptions::from_config(&config),
    );
    let format = config.timestamp_format.as_str();

    println!("== start");
    session.start().await;
    print_contacts(&session);
    print_unread(&session);

    println!("\n== open chat with bob");
    session.open(&bob).await;
    print_messages(&session, &bob, format);
    print_unread(&session);

    println!("\n== send");
    if let Err(e) = session.send(&bob, "yes, what's up?").await {
        println!("send failed: {e}");
    }
    print_messages(&session, &bob, format);

    println!("\n== send while the store is offline");
    store.set_offline(true);
    session.set_draft(&bob, "hola");
    match session.send(&bob, "hola").await {
        Ok(_) => println!("unexpectedly delivered"),
        Err(e) => println!("send failed: {e}"),
    }
    store.set_offline(false);
    print_messages(&session, &bob, format);
    if let Some(window) = session.window(&bob) {
        println!("draft restored: {:?}", window.draft);
    }

    println!("\n== bob disconnects");
    store.update_presence(&bob, false);
    settle().await;
    for notice in session.notices() {
        println!(
            "{} went offline at {}",
            notice.contact,
            format_timestamp(notice.since, format)
        );
    }

    println!("\n== bob reconnects");
    store.update_presence(&bob, true);
    settle().await;
    println!("active notices: {}", session.notices().len());

    println!("\n== incoming message while minimized");
    session.minimize(&bob);
    store.seed_message(&bob, &me, "ping", Timestamp::now());
    settle().await;
    print_unread(&session);

    println!("\n== events");
    print_events(&mut events);

    session.shutdown().await;
    tracing::info!("chatdock finished");
}

/// Initialize file-based tracing subscriber.
///
/// Returns a guard that must be held for the lifetime of the program
/// to ensure logs are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("chatdock.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Gives the feed listeners time to process what was just published.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

/// Formats a timestamp in local time, falling back to raw milliseconds for
/// out-of-range values or a bad format string.
fn format_timestamp(ts: Timestamp, format: &str) -> String {
    let Some(time) = i64::try_from(ts.as_millis())
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
    else {
        return ts.to_string();
    };
    let mut out = String::new();
    if write!(out, "{}", time.with_timezone(&chrono::Local).format(format)).is_err() {
        return ts.to_string();
    }
    out
}

fn print_contacts(session: &DemoSession) {
    for contact in session.contacts() {
        let status = if contact.online { "online" } else { "offline" };
        println!("{} ({}) {status}", contact.display_name, contact.id);
    }
}

fn print_unread(session: &DemoSession) {
    println!("unread total: {}", session.unread_total());
    for (contact, count) in session.unread() {
        println!("  {contact}: {count}");
    }
}

fn print_messages(session: &DemoSession, contact: &ContactId, format: &str) {
    for message in session.messages(contact) {
        let marker = match message.delivery_state() {
            DeliveryState::Pending => " (sending)",
            DeliveryState::Confirmed => "",
        };
        println!(
            "[{}] {}: {}{marker}",
            format_timestamp(message.created_at, format),
            message.sender,
            message.content
        );
    }
}

fn print_events(events: &mut mpsc::Receiver<SessionEvent>) {
    while let Ok(event) = events.try_recv() {
        println!("{event:?}");
    }
}
