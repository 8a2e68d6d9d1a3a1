use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use muse_core::models::{ContextKey, Delivery, LocalDraft, Message, SharedThreadDirectory};
use muse_core::{CoreEvent, SyncConfig, SyncRuntime};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "muse-cli")]
#[command(about = "Follow a muse conversation and post to it from stdin")]
struct Cli {
    /// Path to JSON config file (apiBaseUrl, channelUrl, limits)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Open a thread instead of the main timeline
    #[arg(long, conflicts_with = "project")]
    thread: Option<String>,

    /// Browse a project's history (paged, no live updates)
    #[arg(long)]
    project: Option<String>,

    /// Maximum number of messages shown
    #[arg(long)]
    render: Option<usize>,
}

/// A line typed on stdin
#[derive(Debug, PartialEq)]
enum Command {
    Older,
    Newer,
    Main,
    Thread(String),
    Project(String),
    Retry(String),
    Quit,
    Send(String),
}

fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Command::Send(line.to_string()));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };
    let command = match (name, arg) {
        ("older", _) => Command::Older,
        ("newer", _) => Command::Newer,
        ("main", _) => Command::Main,
        ("thread", id) if !id.is_empty() => Command::Thread(id.to_string()),
        ("project", id) if !id.is_empty() => Command::Project(id.to_string()),
        ("retry", id) if !id.is_empty() => Command::Retry(id.to_string()),
        ("quit", _) | ("q", _) => Command::Quit,
        // Unknown slash commands go out verbatim
        _ => Command::Send(line.to_string()),
    };
    Some(command)
}

/// Prints entries of the visible slice that are new or changed their marker.
#[derive(Default)]
struct Printer {
    shown: HashMap<String, Delivery>,
}

impl Printer {
    fn render(&mut self, runtime: &SyncRuntime) {
        for message in runtime.visible() {
            if self.shown.get(&message.id) == Some(&message.delivery) {
                continue;
            }
            self.shown.insert(message.id.clone(), message.delivery);
            println!("{}", format_line(message));
        }
    }

    fn reset(&mut self, runtime: &SyncRuntime) {
        self.shown.clear();
        println!("--- {} ---", runtime.active_context());
        self.render(runtime);
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn format_line(message: &Message) -> String {
    let marker = match message.delivery {
        Delivery::Pending => " (sending)".to_string(),
        Delivery::Sent => " (sent)".to_string(),
        Delivery::Failed => format!(" (failed, /retry {})", short_id(&message.id)),
        Delivery::Confirmed => String::new(),
    };
    format!(
        "[{}] {}: {}{}",
        message.timestamp.with_timezone(&Local).format("%H:%M:%S"),
        message.role.as_str(),
        message.body,
        marker
    )
}

fn load_config(cli: &Cli) -> Result<SyncConfig> {
    let mut config = match &cli.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(render) = cli.render {
        config.render_cap = render;
    }
    config.validate()?;
    Ok(config)
}

fn handle_event(runtime: &SyncRuntime, printer: &mut Printer, event: CoreEvent) {
    match event {
        CoreEvent::WindowChanged(key) if &key == runtime.active_context() => printer.render(runtime),
        CoreEvent::WindowChanged(_) => {}
        CoreEvent::Motd(text) => println!("** {}", text),
        CoreEvent::ConnectionChanged(state) => eprintln!("[channel: {:?}]", state),
        CoreEvent::PageFailed {
            context,
            direction,
            error,
        } => eprintln!("Failed to load {:?} page for {}: {}", direction, context, error),
        CoreEvent::DeliveryFailed { message_id, error } => {
            eprintln!("Send {} failed: {}", short_id(&message_id), error);
        }
    }
}

/// Returns false when the session should end
fn handle_command(runtime: &mut SyncRuntime, printer: &mut Printer, command: Command) -> bool {
    debug!(?command, "stdin command");
    match command {
        Command::Older => {
            if !runtime.load_older() {
                eprintln!("No older history to load");
            }
        }
        Command::Newer => {
            if !runtime.load_newer() {
                eprintln!("No newer history to load");
            }
        }
        Command::Main => {
            runtime.switch_context(ContextKey::Main);
            printer.reset(runtime);
        }
        Command::Thread(id) => {
            runtime.switch_context(ContextKey::thread(id));
            printer.reset(runtime);
        }
        Command::Project(id) => {
            runtime.switch_context(ContextKey::project(id));
            printer.reset(runtime);
        }
        Command::Retry(prefix) => {
            let target = runtime
                .visible()
                .iter()
                .find(|m| m.delivery == Delivery::Failed && m.id.starts_with(&prefix))
                .map(|m| m.id.clone());
            if target.is_some_and(|id| runtime.resubmit(&id)) {
                printer.render(runtime);
            } else {
                eprintln!("No failed message matching {}", prefix);
            }
        }
        Command::Quit => return false,
        Command::Send(body) => {
            runtime.submit(LocalDraft::new(body));
            printer.render(runtime);
        }
    }
    true
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    let mut runtime = SyncRuntime::with_http(config, Arc::new(SharedThreadDirectory::new()));
    runtime.start();

    if let Some(thread) = cli.thread {
        runtime.switch_context(ContextKey::thread(thread));
    } else if let Some(project) = cli.project {
        runtime.switch_context(ContextKey::project(project));
    }

    let (line_tx, mut line_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });

    let mut printer = Printer::default();
    printer.reset(&runtime);
    loop {
        tokio::select! {
            update = runtime.next_update() => {
                let Some(update) = update else { break };
                for event in runtime.process(update) {
                    handle_event(&runtime, &mut printer, event);
                }
            }
            line = line_rx.recv() => {
                let Some(line) = line else { break };
                if let Some(command) = parse_command(&line) {
                    if !handle_command(&mut runtime, &mut printer, command) {
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    runtime.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    muse_core::tracing_setup::init_tracing();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("  "), None);
        assert_eq!(parse_command("/older"), Some(Command::Older));
        assert_eq!(parse_command("/thread t-9 "), Some(Command::Thread("t-9".to_string())));
        assert_eq!(parse_command("/retry ab12"), Some(Command::Retry("ab12".to_string())));
        assert_eq!(parse_command("/q"), Some(Command::Quit));
        assert_eq!(parse_command("hello there"), Some(Command::Send("hello there".to_string())));
    }

    #[test]
    fn test_slash_command_without_argument_is_sent_verbatim() {
        assert_eq!(parse_command("/thread"), Some(Command::Send("/thread".to_string())));
        assert_eq!(parse_command("/shrug ok"), Some(Command::Send("/shrug ok".to_string())));
    }

    #[test]
    fn test_render_flag_overrides_config() {
        let cli = Cli::parse_from(["muse-cli", "--render", "7"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.render_cap, 7);
        assert!(Cli::try_parse_from(["muse-cli", "--thread", "a", "--project", "b"]).is_err());
    }
}
