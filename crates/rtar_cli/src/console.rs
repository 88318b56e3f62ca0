//! Interactive command console.
//!
//! Commands are a closed set looked up through [`COMMANDS`]; anything that
//! is not in the table is rejected before it reaches the running bot.

use miette::{IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use rtar_core::ProcessorEvent;
use rustyline_async::{Readline, ReadlineEvent};
use tokio::sync::broadcast;

use crate::app::App;
use crate::output::{Output, format_flag, format_status};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CommandKind {
    Help,
    Stats,
    Rate,
    Clear,
    Exit,
    Auto,
    Send,
    AdbTest,
    Config,
    Disconnect,
    Reconnect,
    Reset,
    Health,
    Presets,
    Debug,
    Block,
    Unblock,
    Filters,
}

/// One row of the command table
#[derive(Debug)]
pub struct CommandSpec {
    pub name: &'static str,
    pub usage: &'static str,
    pub description: &'static str,
    kind: CommandKind,
}

pub const COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        name: "/help",
        usage: "/help",
        description: "Show this list",
        kind: CommandKind::Help,
    },
    CommandSpec {
        name: "/stats",
        usage: "/stats",
        description: "Processing statistics",
        kind: CommandKind::Stats,
    },
    CommandSpec {
        name: "/rate",
        usage: "/rate [0-1]",
        description: "Show or set the reply probability for ordinary comments",
        kind: CommandKind::Rate,
    },
    CommandSpec {
        name: "/clear",
        usage: "/clear",
        description: "Forget processed comments and the context window",
        kind: CommandKind::Clear,
    },
    CommandSpec {
        name: "/exit",
        usage: "/exit",
        description: "Shut down and quit",
        kind: CommandKind::Exit,
    },
    CommandSpec {
        name: "/auto",
        usage: "/auto",
        description: "Toggle automatic delivery of replies",
        kind: CommandKind::Auto,
    },
    CommandSpec {
        name: "/send",
        usage: "/send <text>",
        description: "Post text through the device bridge",
        kind: CommandKind::Send,
    },
    CommandSpec {
        name: "/adbtest",
        usage: "/adbtest",
        description: "Check the device bridge",
        kind: CommandKind::AdbTest,
    },
    CommandSpec {
        name: "/config",
        usage: "/config",
        description: "Show the active configuration",
        kind: CommandKind::Config,
    },
    CommandSpec {
        name: "/disconnect",
        usage: "/disconnect",
        description: "Close the comment stream",
        kind: CommandKind::Disconnect,
    },
    CommandSpec {
        name: "/reconnect",
        usage: "/reconnect",
        description: "Reconnect the comment stream now",
        kind: CommandKind::Reconnect,
    },
    CommandSpec {
        name: "/reset",
        usage: "/reset",
        description: "Clear reconnect attempts and re-enable auto-reconnect",
        kind: CommandKind::Reset,
    },
    CommandSpec {
        name: "/health",
        usage: "/health",
        description: "Stream health and reconnect state",
        kind: CommandKind::Health,
    },
    CommandSpec {
        name: "/presets",
        usage: "/presets",
        description: "List preset reply templates",
        kind: CommandKind::Presets,
    },
    CommandSpec {
        name: "/debug",
        usage: "/debug",
        description: "Toggle debug logging",
        kind: CommandKind::Debug,
    },
    CommandSpec {
        name: "/block",
        usage: "/block <id>",
        description: "Never reply to a sender id",
        kind: CommandKind::Block,
    },
    CommandSpec {
        name: "/unblock",
        usage: "/unblock <id>",
        description: "Remove a sender id from the blocklist",
        kind: CommandKind::Unblock,
    },
    CommandSpec {
        name: "/filters",
        usage: "/filters",
        description: "List blocked sender ids",
        kind: CommandKind::Filters,
    },
];

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Help,
    Stats,
    Rate(Option<f64>),
    Clear,
    Exit,
    Auto,
    Send(String),
    AdbTest,
    Config,
    Disconnect,
    Reconnect,
    Reset,
    Health,
    Presets,
    Debug,
    Block(String),
    Unblock(String),
    Filters,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("Commands start with '/', try /help")]
    NotACommand,
    #[error("Unknown command {0}, try /help")]
    Unknown(String),
    #[error("Usage: {0}")]
    MissingArgument(&'static str),
    #[error("Response rate must be a number between 0 and 1, got {0}")]
    InvalidRate(String),
}

impl ConsoleCommand {
    /// Parse one console line
    pub fn parse(line: &str) -> std::result::Result<Self, ParseError> {
        let line = line.trim();
        if !line.starts_with('/') {
            return Err(ParseError::NotACommand);
        }

        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };
        let name = name.to_lowercase();
        let spec = COMMANDS
            .iter()
            .find(|spec| spec.name == name)
            .ok_or_else(|| ParseError::Unknown(name.clone()))?;

        let argument = || {
            if rest.is_empty() {
                Err(ParseError::MissingArgument(spec.usage))
            } else {
                Ok(rest.to_string())
            }
        };

        Ok(match spec.kind {
            CommandKind::Help => Self::Help,
            CommandKind::Stats => Self::Stats,
            CommandKind::Rate if rest.is_empty() => Self::Rate(None),
            CommandKind::Rate => match rest.parse::<f64>() {
                Ok(rate) if (0.0..=1.0).contains(&rate) => Self::Rate(Some(rate)),
                _ => return Err(ParseError::InvalidRate(rest.to_string())),
            },
            CommandKind::Clear => Self::Clear,
            CommandKind::Exit => Self::Exit,
            CommandKind::Auto => Self::Auto,
            CommandKind::Send => Self::Send(argument()?),
            CommandKind::AdbTest => Self::AdbTest,
            CommandKind::Config => Self::Config,
            CommandKind::Disconnect => Self::Disconnect,
            CommandKind::Reconnect => Self::Reconnect,
            CommandKind::Reset => Self::Reset,
            CommandKind::Health => Self::Health,
            CommandKind::Presets => Self::Presets,
            CommandKind::Debug => Self::Debug,
            CommandKind::Block => Self::Block(argument()?),
            CommandKind::Unblock => Self::Unblock(argument()?),
            CommandKind::Filters => Self::Filters,
        })
    }
}

/// Run the console until `/exit`, Ctrl-C or end of input, then shut the
/// bot down while the prompt can still show its logs.
pub async fn run(app: &App) -> Result<()> {
    let (mut rl, writer) = Readline::new(format!("{} ", ">".bright_blue())).into_diagnostic()?;
    app.logging.attach_prompt(writer.clone());
    let output = Output::new().with_writer(writer);

    output.status("Type /help for commands, /exit to quit");
    let printer = tokio::spawn(print_events(
        app.processor.subscribe(),
        output.clone(),
        app.config.bot.nickname.clone(),
    ));

    loop {
        let event = tokio::select! {
            event = rl.readline() => event,
            _ = tokio::signal::ctrl_c() => {
                output.status("CTRL-C");
                break;
            }
        };

        match event {
            Ok(ReadlineEvent::Line(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                rl.add_history_entry(line.clone());

                match ConsoleCommand::parse(&line) {
                    Ok(ConsoleCommand::Exit) => break,
                    Ok(command) => {
                        if let Err(e) = execute(app, &output, command).await {
                            output.error(&format!("Command error: {}", e));
                        }
                    }
                    Err(e) => output.warning(&e.to_string()),
                }
            }
            Ok(ReadlineEvent::Interrupted) => {
                output.status("CTRL-C");
                break;
            }
            Ok(ReadlineEvent::Eof) => {
                output.status("CTRL-D");
                break;
            }
            Err(err) => {
                output.error(&format!("Error: {:?}", err));
                break;
            }
        }
    }

    app.shutdown().await;
    printer.abort();
    output.status("Goodbye!");
    let _ = rl.flush();
    app.logging.detach_prompt();
    Ok(())
}

/// Show the comment feed and reply outcomes as they happen
async fn print_events(
    mut events: broadcast::Receiver<ProcessorEvent>,
    output: Output,
    nickname: String,
) {
    loop {
        match events.recv().await {
            Ok(ProcessorEvent::Received(message)) => output.comment(&message),
            Ok(ProcessorEvent::Replied {
                source,
                text,
                delivered,
                ..
            }) => output.reply(&nickname, source, &text, delivered),
            Ok(ProcessorEvent::Failed { message_id, error }) => {
                output.warning(&format!("No reply for {}: {}", message_id, error))
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::debug!("Console skipped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn execute(app: &App, output: &Output, command: ConsoleCommand) -> Result<()> {
    match command {
        ConsoleCommand::Help => {
            output.section("Commands");
            for spec in COMMANDS {
                output.kv(spec.usage, spec.description);
            }
        }
        ConsoleCommand::Stats => {
            let stats = app.processor.stats();
            let row = |metric: &str, value: String| vec![metric.to_string(), value];
            output.table(
                &["Metric", "Value"],
                vec![
                    row("Processed comments", stats.processed_messages.to_string()),
                    row("Context length", stats.context_length.to_string()),
                    row("Queue size", stats.queue_size.to_string()),
                    row(
                        "Busy workers",
                        format!("{}/{}", stats.busy_workers, stats.max_workers),
                    ),
                    row(
                        "Response timeout",
                        format!("{:.1}s", stats.response_timeout_secs),
                    ),
                    row("Response rate", format!("{:.2}", stats.response_rate)),
                    row("Auto-send", format_flag(stats.auto_send)),
                    row("Running", format_flag(stats.is_running)),
                    row("Stream", format_status(app.stream.status())),
                ],
            );
        }
        ConsoleCommand::Rate(None) => {
            output.info("Response rate:", &format!("{:.2}", app.processor.response_rate()));
        }
        ConsoleCommand::Rate(Some(rate)) => {
            let rate = app.processor.set_response_rate(rate);
            output.success(&format!("Response rate set to {:.2}", rate));
        }
        ConsoleCommand::Clear => {
            app.processor.clear_history();
            output.success("Processed comments and context cleared");
        }
        ConsoleCommand::Exit => {}
        ConsoleCommand::Auto => {
            let enabled = app.processor.toggle_auto_send();
            output.info("Auto-send:", &format_flag(enabled));
        }
        ConsoleCommand::Send(text) => {
            output.status("Sending...");
            app.processor.delivery().send(&text).await?;
            output.success("Sent");
        }
        ConsoleCommand::AdbTest => {
            if !app.bridge.is_connected() {
                app.bridge.connect().await?;
            }
            if app.bridge.test().await? {
                output.success(&format!("Device bridge at {} responds", app.bridge.address()));
            } else {
                output.warning("Device bridge answered unexpectedly");
            }
            match app.bridge.device_info().await {
                Ok(model) => output.kv("Device", &model),
                Err(e) => output.warning(&format!("Could not read device model: {}", e)),
            }
        }
        ConsoleCommand::Config => show_config(app, output)?,
        ConsoleCommand::Disconnect => {
            if app.stream.disconnect().await {
                output.success("Comment stream closed");
            } else {
                output.status("Comment stream was not open");
            }
        }
        ConsoleCommand::Reconnect => {
            output.status("Reconnecting...");
            app.stream.reconnect().await?;
            output.success("Reconnected");
        }
        ConsoleCommand::Reset => {
            app.stream.reset_reconnect_state();
            output.success("Reconnect state reset, auto-reconnect enabled");
        }
        ConsoleCommand::Health => {
            let status = app.stream.reconnect_status();
            output.section("Stream health");
            output.kv("State", &format_status(status.state));
            output.kv("Healthy", &format_flag(app.stream.is_healthy()));
            if let Some(idle) = app.stream.idle_secs() {
                output.kv("Last activity", &format!("{:.1}s ago", idle));
            }
            output.kv(
                "Reconnect attempts",
                &format!(
                    "{}/{}",
                    status.reconnect_attempts, status.max_reconnect_attempts
                ),
            );
            output.kv("Auto-reconnect", &format_flag(status.auto_reconnect_enabled));
            output.kv("Reconnecting", &format_flag(status.is_reconnecting));
        }
        ConsoleCommand::Presets => {
            let rows = app
                .processor
                .presets()
                .iter()
                .map(|(kind, set)| {
                    vec![
                        kind.clone(),
                        set.replies.len().to_string(),
                        set.description.clone(),
                    ]
                })
                .collect();
            output.table(&["Kind", "Templates", "Description"], rows);
        }
        ConsoleCommand::Debug => {
            let debug = app.logging.toggle_debug()?;
            output.info("Debug logging:", &format_flag(debug));
            if let Some(pattern) = app.logging.log_files() {
                output.kv("Log files", &pattern.display().to_string());
            }
        }
        ConsoleCommand::Block(id) => {
            if app.blocklist.block(&id)? {
                output.success(&format!("Blocked {}", id));
            } else {
                output.status(&format!("{} was already blocked", id));
            }
        }
        ConsoleCommand::Unblock(id) => {
            if app.blocklist.unblock(&id)? {
                output.success(&format!("Unblocked {}", id));
            } else {
                output.status(&format!("{} was not blocked", id));
            }
        }
        ConsoleCommand::Filters => {
            let blocked = app.blocklist.list();
            output.section(&format!("Blocked ids ({})", blocked.len()));
            if blocked.is_empty() {
                output.status("None");
            }
            for id in blocked {
                output.list_item(&id);
            }
        }
    }
    Ok(())
}

fn show_config(app: &App, output: &Output) -> Result<()> {
    let mut config = app.config.clone();
    if !config.model.api_key.is_empty() {
        config.model.api_key = "********".to_string();
    }
    if !config.stream.auth.is_empty() {
        config.stream.auth = "********".to_string();
    }

    output.section("Configuration");
    if let Some(path) = &app.config_path {
        output.kv("File", &path.display().to_string());
    }
    let rendered = toml::to_string_pretty(&config).into_diagnostic()?;
    for line in rendered.lines() {
        output.status(line);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parses_plain_commands() {
        assert_eq!(ConsoleCommand::parse("/stats"), Ok(ConsoleCommand::Stats));
        assert_eq!(ConsoleCommand::parse("  /EXIT  "), Ok(ConsoleCommand::Exit));
        assert_eq!(ConsoleCommand::parse("/adbtest"), Ok(ConsoleCommand::AdbTest));
    }

    #[test]
    fn test_parses_arguments() {
        assert_eq!(
            ConsoleCommand::parse("/send hello   there"),
            Ok(ConsoleCommand::Send("hello   there".to_string()))
        );
        assert_eq!(
            ConsoleCommand::parse("/block v123"),
            Ok(ConsoleCommand::Block("v123".to_string()))
        );
        assert_eq!(
            ConsoleCommand::parse("/unblock v123"),
            Ok(ConsoleCommand::Unblock("v123".to_string()))
        );
    }

    #[test]
    fn test_rate_argument() {
        assert_eq!(ConsoleCommand::parse("/rate"), Ok(ConsoleCommand::Rate(None)));
        assert_eq!(
            ConsoleCommand::parse("/rate 0.25"),
            Ok(ConsoleCommand::Rate(Some(0.25)))
        );
        assert_eq!(
            ConsoleCommand::parse("/rate 1.5"),
            Err(ParseError::InvalidRate("1.5".to_string()))
        );
        assert_eq!(
            ConsoleCommand::parse("/rate lots"),
            Err(ParseError::InvalidRate("lots".to_string()))
        );
    }

    #[test]
    fn test_rejects_unknown_and_incomplete() {
        assert_eq!(
            ConsoleCommand::parse("/launch"),
            Err(ParseError::Unknown("/launch".to_string()))
        );
        assert_eq!(ConsoleCommand::parse("hello"), Err(ParseError::NotACommand));
        assert_eq!(
            ConsoleCommand::parse("/send   "),
            Err(ParseError::MissingArgument("/send <text>"))
        );
        assert_eq!(
            ConsoleCommand::parse("/block"),
            Err(ParseError::MissingArgument("/block <id>"))
        );
    }

    #[test]
    fn test_every_table_entry_parses() {
        for spec in COMMANDS {
            let line = match spec.kind {
                CommandKind::Send | CommandKind::Block | CommandKind::Unblock => {
                    format!("{} x", spec.name)
                }
                _ => spec.name.to_string(),
            };
            assert!(ConsoleCommand::parse(&line).is_ok(), "{} failed", line);
        }
    }
}
