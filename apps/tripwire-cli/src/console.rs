//! Line-based reviewer console
//!
//! Reads commands from stdin and forwards them to the review session.
//! Session events are printed as they arrive by a separate task.
//!
//! Stdin is read on a plain thread: a blocking read cannot be cancelled, and
//! the runtime would otherwise wait for one more line before shutting down.

use std::path::PathBuf;

use anyhow::{Context, Result};
use std::io::BufRead;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tripwire::{ConnectionStatus, EvidenceId, SessionEvent, SessionHandle, THUMBNAIL_EDGE};

pub const HELP: &str = "\
Commands:
  list                    List evidence, newest first
  expand <id> [path]      Save the full image to path (default: ./<id>)
  thumb <id> [path]       Save a thumbnail to path (default: ./thumb_<id>.png)
  safe <id>               Mark as safe and delete (asks for confirmation)
  status                  Show sensor connection status
  help                    Show this help
  quit                    Stop the session and exit";

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    List,
    Expand { id: EvidenceId, out: Option<PathBuf> },
    Thumbnail { id: EvidenceId, out: Option<PathBuf> },
    Safe { id: EvidenceId },
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Option<Self>, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let id = |word: Option<&str>| -> Result<EvidenceId, String> {
            word.map(EvidenceId::from)
                .ok_or_else(|| format!("usage: {} <id>", verb))
        };

        let command = match verb {
            "list" | "ls" => ConsoleCommand::List,
            "expand" | "open" => ConsoleCommand::Expand {
                id: id(words.next())?,
                out: words.next().map(PathBuf::from),
            },
            "thumb" => ConsoleCommand::Thumbnail {
                id: id(words.next())?,
                out: words.next().map(PathBuf::from),
            },
            "safe" | "dispose" => ConsoleCommand::Safe {
                id: id(words.next())?,
            },
            "status" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" | "q" => ConsoleCommand::Quit,
            other => return Err(format!("unknown command {:?}, try `help`", other)),
        };

        if words.next().is_some() {
            return Err(format!("too many arguments for {}", verb));
        }
        Ok(Some(command))
    }
}

/// Whether a confirmation answer means yes
pub fn is_confirmation(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Forward stdin lines over a channel until end of input
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

pub struct Console {
    handle: SessionHandle,
    lines: mpsc::UnboundedReceiver<String>,
}

impl Console {
    pub fn new(handle: SessionHandle, lines: mpsc::UnboundedReceiver<String>) -> Self {
        Self { handle, lines }
    }

    /// Process commands until `quit`, end of input or cancellation
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        println!("{}", HELP);
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = self.lines.recv() => line,
            };
            let Some(line) = line else {
                debug!("stdin closed");
                break;
            };

            match ConsoleCommand::parse(&line) {
                Ok(None) => {}
                Ok(Some(ConsoleCommand::Quit)) => break,
                Ok(Some(command)) => {
                    if let Err(e) = self.execute(command).await {
                        println!("error: {:#}", e);
                    }
                }
                Err(msg) => println!("{}", msg),
            }
        }
        Ok(())
    }

    async fn execute(&mut self, command: ConsoleCommand) -> Result<()> {
        match command {
            ConsoleCommand::List => {
                let records = self.handle.records().await?;
                if records.is_empty() {
                    println!("No evidence awaiting review");
                }
                for record in records {
                    println!(
                        "{}  {}",
                        record.captured_at.format("%Y-%m-%d %H:%M:%S"),
                        record.id
                    );
                }
            }
            ConsoleCommand::Expand { id, out } => {
                let image = self.handle.request_expand(&id).await?;
                let out = out.unwrap_or_else(|| PathBuf::from(id.as_str()));
                tokio::fs::write(&out, &image.encoded)
                    .await
                    .with_context(|| format!("Failed to write {:?}", out))?;
                println!(
                    "{}: {}x{} {:?}, saved to {:?}",
                    id, image.width, image.height, image.format, out
                );
            }
            ConsoleCommand::Thumbnail { id, out } => {
                let image = self.handle.request_thumbnail(&id, THUMBNAIL_EDGE).await?;
                let out = out.unwrap_or_else(|| PathBuf::from(format!("thumb_{}.png", id)));
                tokio::fs::write(&out, &image.encoded)
                    .await
                    .with_context(|| format!("Failed to write {:?}", out))?;
                println!("{}: thumbnail {}x{} saved to {:?}", id, image.width, image.height, out);
            }
            ConsoleCommand::Safe { id } => {
                println!("Mark {} as safe and delete? [y/N]", id);
                let answer = self.lines.recv().await.unwrap_or_default();
                let confirmed = is_confirmation(&answer);
                self.handle.request_dispose(&id, confirmed).await?;
                if confirmed {
                    println!("{} deleted", id);
                } else {
                    println!("Kept {}", id);
                }
            }
            ConsoleCommand::Status => {
                let status = match self.handle.connection_status() {
                    ConnectionStatus::Connected => "connected",
                    ConnectionStatus::Reconnecting => "reconnecting",
                };
                println!("Sensor: {}", status);
            }
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => {}
        }
        Ok(())
    }
}

/// Print session events until the session stops or `cancel` fires
pub async fn print_events(
    mut events: broadcast::Receiver<SessionEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(SessionEvent::SensorConnected { endpoint }) => {
                println!("* sensor connected ({})", endpoint)
            }
            Ok(SessionEvent::SensorDisconnected { reason }) => {
                println!("* sensor disconnected: {}, reconnecting", reason)
            }
            Ok(SessionEvent::SensorUnavailable { reason }) => {
                println!("* sensor unavailable: {}, retrying", reason)
            }
            Ok(SessionEvent::EvidenceCaptured { record }) => {
                println!("* captured {}", record.id)
            }
            Ok(SessionEvent::CaptureFailed { reason }) => println!("* capture failed: {}", reason),
            Ok(SessionEvent::EvidenceDisposed { id }) => println!("* disposed {}", id),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Console missed {} session events", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
