use std::io::Write;

use comfy_table::{ContentArrangement, Table, presets::UTF8_FULL};
use owo_colors::OwoColorize;
use rtar_core::{ConnectionStatus, Message, MessageClass, processor::ReplySource};
use rustyline_async::SharedWriter;

/// Standard output formatting for the console.
///
/// Prints through the prompt's SharedWriter when one is attached, plain
/// stdout otherwise.
#[derive(Clone, Default)]
pub struct Output {
    writer: Option<SharedWriter>,
}

impl Output {
    pub fn new() -> Self {
        Self { writer: None }
    }

    pub fn with_writer(mut self, writer: SharedWriter) -> Self {
        self.writer = Some(writer);
        self
    }

    fn line(&self, text: impl std::fmt::Display) {
        match &self.writer {
            Some(writer) => {
                let mut writer = writer.clone();
                let _ = writeln!(writer, "{}", text);
            }
            None => println!("{}", text),
        }
    }

    /// Print a system/status message (indented)
    pub fn status(&self, message: &str) {
        self.line(format!("  {}", message.dimmed()));
    }

    /// Print an info message (indented)
    pub fn info(&self, label: &str, value: &str) {
        self.line(format!("  {} {}", label.bright_blue(), value));
    }

    pub fn success(&self, message: &str) {
        self.line(format!("  {} {}", "✓".bright_green(), message));
    }

    pub fn error(&self, message: &str) {
        self.line(format!("  {} {}", "✗".bright_red(), message));
    }

    pub fn warning(&self, message: &str) {
        self.line(format!("  {} {}", "⚠".yellow(), message));
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        self.line("");
        self.line(title.bright_cyan().bold());
        self.line("─".repeat(40).dimmed());
    }

    /// Print a list item (already indented)
    pub fn list_item(&self, item: &str) {
        self.line(format!("    • {}", item));
    }

    /// Print a key-value pair (indented)
    pub fn kv(&self, key: &str, value: &str) {
        self.line(format!("  {} {}", format!("{}:", key).dimmed(), value));
    }

    /// Print a table with the console's border style
    pub fn table(&self, header: &[&str], rows: Vec<Vec<String>>) {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(header.to_vec());
        for row in rows {
            table.add_row(row);
        }
        self.line(table);
    }

    /// An incoming comment
    pub fn comment(&self, message: &Message) {
        let tag = match message.class {
            MessageClass::User => String::new(),
            class => format!("[{}] ", class),
        };
        self.line(format!(
            "{}{}: {}",
            tag.dimmed(),
            message.sender_name.bright_cyan(),
            message.text
        ));
    }

    /// A reply from the bot
    pub fn reply(&self, nickname: &str, source: ReplySource, text: &str, delivered: bool) {
        let marker = if delivered {
            "sent".bright_green().to_string()
        } else {
            "not sent".yellow().to_string()
        };
        self.line(format!(
            "{} {}: {} {}",
            format!("[{}]", source).bright_magenta(),
            nickname.bright_yellow().bold(),
            text,
            format!("({})", marker).dimmed()
        ));
    }
}

/// Format a stream status for display
pub fn format_status(status: ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Connected => "Connected".bright_green().to_string(),
        ConnectionStatus::Connecting => "Connecting".bright_yellow().to_string(),
        ConnectionStatus::Reconnecting => "Reconnecting".yellow().to_string(),
        ConnectionStatus::Disconnected => "Disconnected".dimmed().to_string(),
        ConnectionStatus::PermanentlyFailed => "Permanently failed".red().bold().to_string(),
    }
}

/// Format an on/off flag
pub fn format_flag(enabled: bool) -> String {
    if enabled {
        "on".bright_green().to_string()
    } else {
        "off".bright_red().to_string()
    }
}
