//! Terminal rendering of decorated messages and status lines.

use chat_core::{Notification, Rendered, Segment, Severity};
use crossterm::tty::IsTty;
use owo_colors::{OwoColorize, Style};
use std::env;
use std::io;

pub const BANNER: &str = "--- New message(s) received ---";
const BELL: char = '\u{7}';

#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    color: bool,
}

impl Renderer {
    /// Colors only when stdout is a terminal and `NO_COLOR` is unset.
    pub fn detect() -> Self {
        Self {
            color: io::stdout().is_tty() && env::var_os("NO_COLOR").is_none(),
        }
    }

    #[cfg(test)]
    pub fn plain() -> Self {
        Self { color: false }
    }

    fn paint(&self, text: &str, style: Style) -> String {
        if self.color {
            text.style(style).to_string()
        } else {
            text.to_string()
        }
    }

    pub fn message(&self, rendered: &Rendered) -> String {
        let mut line = String::new();
        if let Some(marker) = rendered.marker() {
            line.push_str(&self.paint(marker, Style::new().magenta().bold()));
            line.push(' ');
        }
        line.push_str(&self.paint(
            &format!("[{}]", rendered.timestamp),
            Style::new().bright_black(),
        ));
        line.push(' ');
        line.push_str(&self.paint(&rendered.sender, Style::new().white().bold()));
        line.push_str(": ");

        for segment in &rendered.segments {
            match segment {
                Segment::Text(text) => line.push_str(&self.paint(text, Style::new().green())),
                Segment::Mention {
                    text,
                    addresses_self,
                } => {
                    let style = if *addresses_self {
                        Style::new().yellow().bold().underline()
                    } else {
                        Style::new().yellow()
                    };
                    line.push_str(&self.paint(text, style));
                }
            }
        }
        line
    }

    pub fn notification(&self, notification: &Notification) -> String {
        let style = match notification.severity {
            Severity::Everyone => Style::new().red().bold(),
            Severity::SelfMention => Style::new().yellow().bold(),
            Severity::Plain => Style::new().cyan(),
        };
        format!(
            "{}{} {}",
            BELL,
            self.paint(&notification.title, style),
            notification.body()
        )
    }

    pub fn banner(&self) -> String {
        self.paint(BANNER, Style::new().cyan().bold())
    }

    pub fn prompt(&self, active: u64) -> String {
        format!(
            "{} {} ",
            self.paint(&format!("[Live:{}]", active), Style::new().green()),
            self.paint(">>>", Style::new().green().bold())
        )
    }

    pub fn success(&self, text: &str) -> String {
        self.paint(&format!("✓ {}", text), Style::new().green())
    }

    pub fn failure(&self, text: &str) -> String {
        self.paint(&format!("✗ {}", text), Style::new().red())
    }

    pub fn info(&self, text: &str) -> String {
        self.paint(text, Style::new().bright_black())
    }
}
