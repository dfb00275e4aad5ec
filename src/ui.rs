// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Human-readable output: banners, the wait spinner and the confirmation prompt.
//!
//! Everything here goes to a dedicated writer (stderr by default) so it never
//! interleaves with structured log lines.

use crate::constants::SPINNER_TICK;
use crate::error::{Result, TesterError};
use colored::{ColoredString, Colorize};
use dialoguer::theme::ColorfulTheme;
use dialoguer::Select;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex};

/// Shared handle on the human-readable writer.
#[derive(Clone)]
pub struct Progress {
    out: Arc<Mutex<Box<dyn Write + Send>>>,
    color: bool,
    /// Whether the writer is the terminal's stderr, where the spinner draws
    spinner: bool,
}

impl std::fmt::Debug for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress").field("color", &self.color).finish()
    }
}

impl Progress {
    pub fn new(out: Box<dyn Write + Send>, color: bool) -> Self {
        Self {
            out: Arc::new(Mutex::new(out)),
            color,
            spinner: false,
        }
    }

    pub fn stderr(color: bool) -> Self {
        let tty = std::io::stderr().is_terminal();
        Self {
            spinner: tty,
            ..Self::new(Box::new(std::io::stderr()), color && tty)
        }
    }

    /// Discards everything.
    pub fn sink() -> Self {
        Self::new(Box::new(std::io::sink()), false)
    }

    pub fn println(&self, line: &str) {
        let mut out = self.out.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // progress output is best-effort
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }

    fn paint(&self, text: &str, style: fn(&str) -> ColoredString) -> String {
        if self.color {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    /// Step boundary, e.g. `testers[02].Apply [metrics-server]`.
    pub fn banner(&self, text: &str) {
        self.println("");
        self.println(&self.paint(&format!("*********************************\n{text}"), |t| {
            t.bright_blue().bold()
        }));
        self.println("");
    }

    pub fn success(&self, text: &str) {
        self.println(&self.paint(&format!("✓ {text}"), |t| t.green().bold()));
    }

    pub fn failure(&self, text: &str) {
        self.println(&self.paint(&format!("✗ {text}"), |t| t.red().bold()));
    }

    pub fn warning(&self, text: &str) {
        self.println(&self.paint(&format!("⚠ {text}"), |t| t.yellow().bold()));
    }

    /// Titled multi-line block, used for `kubectl` output and summaries.
    pub fn block(&self, title: &str, body: &str) {
        self.println("");
        self.println(&self.paint(title, |t| t.cyan().bold()));
        self.println(body.trim_end());
        self.println("");
    }
}

/// Spinner shown while a wait is pending. It only draws when `progress`
/// writes to a terminal's stderr and stays hidden otherwise.
pub struct Spinner {
    bar: ProgressBar,
}

impl Spinner {
    pub fn start(progress: &Progress, message: String) -> Self {
        if !progress.spinner {
            return Self {
                bar: ProgressBar::hidden(),
            };
        }
        let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
        bar.enable_steady_tick(SPINNER_TICK);
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg:.magenta.bold}") {
            bar.set_style(style.tick_strings(&["∙∙∙", "●∙∙", "∙●∙", "∙∙●", "∙∙∙"]));
        }
        bar.set_message(message);
        Self { bar }
    }

    pub fn finish(self) {
        self.bar.finish_and_clear();
    }
}

/// Whether a person can answer prompts on this process.
pub fn is_interactive() -> bool {
    std::io::stdin().is_terminal()
}

/// Ask whether to go ahead with `action`. Returns `false` when cancelled.
pub async fn confirm(action: &str, details: &str) -> Result<bool> {
    let prompt = format!("Ready to {action} {details}, should we continue?");
    let items = vec!["No, cancel it!".to_string(), format!("Yes, let's {action}!")];

    let answer = tokio::task::spawn_blocking(move || {
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(0)
            .items(&items)
            .interact()
    })
    .await
    .map_err(|e| TesterError::Io(std::io::Error::other(e)))?
    .map_err(|e| TesterError::Io(std::io::Error::other(e)))?;

    Ok(answer == 1)
}

#[cfg(test)]
pub(crate) mod capture {
    use super::Progress;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    /// In-memory writer for asserting on progress output.
    #[derive(Clone, Default)]
    pub struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        pub fn progress(&self) -> Progress {
            Progress::new(Box::new(self.clone()), false)
        }

        pub fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::capture::Captured;
    use super::*;

    #[test]
    fn test_plain_output_without_color() {
        let captured = Captured::default();
        let progress = captured.progress();
        progress.banner("testers[01].Apply [jobs-pi]");
        progress.success("jobs-pi applied");
        progress.failure("jobs-echo failed");

        let text = captured.text();
        assert!(text.contains("testers[01].Apply [jobs-pi]"));
        assert!(text.contains("✓ jobs-pi applied"));
        assert!(text.contains("✗ jobs-echo failed"));
        assert!(!text.contains("\u{1b}["));
    }

    #[test]
    fn test_spinner_hidden_off_terminal() {
        let captured = Captured::default();
        for progress in [Progress::sink(), captured.progress()] {
            let spinner = Spinner::start(&progress, "waiting for job".to_string());
            assert!(spinner.bar.is_hidden());
            spinner.finish();
        }
        assert!(captured.text().is_empty());
    }

    #[test]
    fn test_block_trims_trailing_whitespace() {
        let captured = Captured::default();
        captured.progress().block("kubectl describe", "Name: x\n\n\n");
        assert!(captured.text().contains("kubectl describe\nName: x\n"));
    }
}
