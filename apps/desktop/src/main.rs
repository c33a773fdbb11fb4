mod console;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    load_settings, Bridge, ControlEvent, InputEvent, LinkStatus, Settings, Shutdown,
};
use console::ConsoleDisplay;
use shared::domain::ChannelName;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

const DEFAULT_DIR: &str = "/mnt/9irc";

#[derive(Parser, Debug)]
#[command(name = "dirchat", about = "Terminal front-end for a filesystem chat backend")]
struct Args {
    /// Directory served by the chat backend.
    #[arg(default_value = DEFAULT_DIR)]
    dir: PathBuf,
}

#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Switch(ChannelName),
    List,
    Reconnect,
    Usage(&'static str),
    Submit(String),
}

fn parse_console_command(line: &str) -> ConsoleCommand {
    let mut words = line.split_whitespace();
    match words.next() {
        Some(":c") => match words.next() {
            Some(name) => ConsoleCommand::Switch(ChannelName::from(name)),
            None => ConsoleCommand::Usage(":c <channel>"),
        },
        Some(":l") => ConsoleCommand::List,
        Some(":r") => ConsoleCommand::Reconnect,
        _ => ConsoleCommand::Submit(line.to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let (settings, settings_error) = match load_settings() {
        Ok(settings) => (settings, None),
        Err(err) => (Settings::default(), Some(err)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(settings.log_filter.as_str())
        .with_writer(std::io::stderr)
        .init();
    if let Some(err) = settings_error {
        warn!(error = %err, "settings: falling back to defaults");
    }

    let display = ConsoleDisplay::new();
    let bridge = Bridge::start(args.dir.clone(), &settings, display.clone())
        .await
        .with_context(|| format!("cannot serve {}", args.dir.display()))?;
    display.select(&bridge.initial_channel());

    let shutdown = bridge.shutdown().clone();
    tokio::spawn(report_status(
        args.dir.clone(),
        bridge.status(),
        shutdown.clone(),
    ));
    if let Some(control) = bridge.control() {
        tokio::spawn(report_failures(
            control.subscribe(),
            Arc::clone(&display),
            shutdown.clone(),
        ));
    }
    tokio::spawn(fire_on_ctrl_c(shutdown.clone()));

    let mut lines = spawn_stdin_reader();
    loop {
        let line = tokio::select! {
            _ = shutdown.fired() => break,
            line = lines.recv() => line,
        };
        let Some(line) = line else {
            info!("stdin closed, shutting down");
            shutdown.fire();
            break;
        };
        run_command(parse_console_command(&line), &bridge, &display).await;
    }

    bridge.wait().await;
    Ok(())
}

async fn run_command(command: ConsoleCommand, bridge: &Bridge, display: &ConsoleDisplay) {
    match command {
        ConsoleCommand::Switch(name) => {
            if !display.select(&name) {
                display.notice(&format!("no channel named {name}"));
            }
        }
        ConsoleCommand::List => {
            let channels = bridge.channels().borrow().clone();
            let current = display.current();
            for (name, entry) in channels.iter() {
                let marker = if current.as_ref() == Some(name) { "*" } else { " " };
                let unread = if display.has_unread(name) { " +" } else { "" };
                let mode = if entry.outbound { "" } else { " (read-only)" };
                display.notice(&format!("{marker} {name}{mode}{unread}"));
            }
        }
        ConsoleCommand::Reconnect => match bridge.control() {
            Some(control) => match control.reconnect().await {
                Ok(()) => display.notice("control reconnected"),
                Err(err) => display.notice(&format!("reconnect failed: {err}")),
            },
            None => display.notice("no control file, input is disabled"),
        },
        ConsoleCommand::Usage(usage) => display.notice(&format!("usage: {usage}")),
        ConsoleCommand::Submit(line) => match display.emitter() {
            Some(emitter) => {
                emitter.handle(InputEvent::Submit(line)).await;
            }
            None => display.notice("this channel does not accept input"),
        },
    }
}

async fn report_status(dir: PathBuf, mut status: watch::Receiver<LinkStatus>, shutdown: Shutdown) {
    loop {
        let state = match *status.borrow_and_update() {
            LinkStatus::Connected => "connected",
            LinkStatus::Disconnected => "disconnected",
        };
        eprintln!("Reading {} ({state})", dir.display());

        tokio::select! {
            _ = shutdown.fired() => return,
            changed = status.changed() => {
                if changed.is_err() {
                    return;
                }
            }
        }
    }
}

async fn report_failures(
    mut events: broadcast::Receiver<ControlEvent>,
    display: Arc<ConsoleDisplay>,
    shutdown: Shutdown,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.fired() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(ControlEvent::SendFailed { line, reason }) => {
                display.notice(&format!("not sent: {line} ({reason})"));
            }
            Ok(ControlEvent::QuitRequested) => {}
            Err(broadcast::error::RecvError::Lagged(_)) => {}
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn fire_on_ctrl_c(shutdown: Shutdown) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("interrupt received, shutting down");
            shutdown.fire();
        }
        Err(err) => warn!(error = %err, "cannot listen for ctrl-c"),
    }
}

// Stdin is read on a plain thread so a pending read never holds up runtime
// shutdown.
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        for line in std::io::stdin().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_commands_are_recognised() {
        assert_eq!(
            parse_console_command(":c #rust"),
            ConsoleCommand::Switch(ChannelName::from("#rust"))
        );
        assert_eq!(parse_console_command(":l"), ConsoleCommand::List);
        assert_eq!(parse_console_command(":r"), ConsoleCommand::Reconnect);
        assert_eq!(
            parse_console_command(":c"),
            ConsoleCommand::Usage(":c <channel>")
        );
    }

    #[test]
    fn everything_else_is_submitted_verbatim() {
        assert_eq!(
            parse_console_command("/j #rust"),
            ConsoleCommand::Submit("/j #rust".into())
        );
        assert_eq!(
            parse_console_command("  hello  "),
            ConsoleCommand::Submit("  hello  ".into())
        );
        assert_eq!(
            parse_console_command(":cool"),
            ConsoleCommand::Submit(":cool".into())
        );
    }

    #[test]
    fn directory_defaults_to_backend_mount() {
        let args = Args::try_parse_from(["dirchat"]).expect("args");
        assert_eq!(args.dir, PathBuf::from(DEFAULT_DIR));
        let args = Args::try_parse_from(["dirchat", "/tmp/irc"]).expect("args");
        assert_eq!(args.dir, PathBuf::from("/tmp/irc"));
    }
}
