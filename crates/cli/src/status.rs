//! Carriage-return refreshed console status line.

use pitwall_session::LapStatus;
use std::io::Write;

/// Renders the fixed-field status line, re-printing only on change and
/// padding over a longer previous line.
#[derive(Debug, Default)]
pub struct StatusLine {
    last: String,
}

impl StatusLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, status: &LapStatus) {
        let line = format_status(status);
        if line == self.last {
            return;
        }
        let mut padded = line.clone();
        if self.last.chars().count() > line.chars().count() {
            let extra = self.last.chars().count() - line.chars().count();
            padded.extend(std::iter::repeat_n(' ', extra));
        }
        print!("{padded}\r");
        let _ = std::io::stdout().flush();
        self.last = line;
    }

    /// Terminate the line so shutdown logs start on a fresh row.
    pub fn finish(&mut self) {
        if !self.last.is_empty() {
            println!();
            self.last.clear();
        }
    }
}

fn format_status(status: &LapStatus) -> String {
    format!(
        "Current lap: {} | Session best: {} | Personal best: {} | \u{0394} vs PB: {}",
        format_ms(status.current_lap_ms),
        format_ms(status.session_best_ms),
        format_ms(status.personal_best_ms),
        format_delta(status.delta_ms),
    )
}

fn format_ms(value: Option<u32>) -> String {
    match value {
        Some(ms) => format!("{ms:>7} ms"),
        None => "     -- ms".to_string(),
    }
}

fn format_delta(value: Option<i64>) -> String {
    match value {
        Some(delta) => format!("{delta:>+6} ms"),
        None => "    -- ms".to_string(),
    }
}
