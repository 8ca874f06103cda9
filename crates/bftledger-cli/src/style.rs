//! Styled terminal output.

use std::sync::atomic::{AtomicBool, Ordering};

use owo_colors::{OwoColorize, Style};

static NO_COLOR: AtomicBool = AtomicBool::new(false);

pub fn set_no_color(value: bool) {
    NO_COLOR.store(value, Ordering::SeqCst);
}

fn paint(text: &impl std::fmt::Display, style: Style) -> String {
    if NO_COLOR.load(Ordering::SeqCst) {
        text.to_string()
    } else {
        text.style(style).to_string()
    }
}

/// Semantic colors for anything printable.
pub trait SemanticStyle {
    fn success(&self) -> String;
    fn error(&self) -> String;
    fn warning(&self) -> String;
    fn muted(&self) -> String;
    fn header(&self) -> String;
}

impl<T: std::fmt::Display> SemanticStyle for T {
    fn success(&self) -> String {
        paint(self, Style::new().green().bold())
    }

    fn error(&self) -> String {
        paint(self, Style::new().red().bold())
    }

    fn warning(&self) -> String {
        paint(self, Style::new().yellow())
    }

    fn muted(&self) -> String {
        paint(self, Style::new().dimmed())
    }

    fn header(&self) -> String {
        paint(self, Style::new().bold())
    }
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".success(), msg);
}

pub fn print_failure(msg: &str) {
    println!("{} {}", "✗".error(), msg);
}

pub fn print_warn(msg: &str) {
    println!("{} {}", "⚠".warning(), msg);
}

pub fn print_hint(msg: &str) {
    println!("{} {}", "→".muted(), msg.muted());
}

/// Indented `key: value` line.
pub fn print_labeled(key: &str, value: &str) {
    println!("  {}: {}", key.muted(), value);
}
