//! Console output for match reports and command results
//!
//! Match reports go to stdout, one locked write per file, so concurrent
//! search branches never interleave. Diagnostics go through `tracing`.

use console::style;
use std::io::{self, Write};
use std::time::Duration;

use crate::scanner::{FileMatch, MatchObserver};

const RULE: &str = "+----------------------------------------+";

/// Output handler shared by all commands
#[derive(Debug, Clone, Copy)]
pub struct Output {
    quiet: bool,
}

impl Output {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }

    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", style("✔").green(), message);
        }
    }

    /// Print one boxed match block
    pub fn report(&self, file_match: &FileMatch) {
        if !self.quiet {
            write_stdout(&render_file_match(file_match));
        }
    }

    /// Print every block in one write, used when reporting is deferred
    pub fn report_all(&self, matches: &[FileMatch]) {
        if !self.quiet && !matches.is_empty() {
            let blocks: String = matches.iter().map(render_file_match).collect();
            write_stdout(&blocks);
        }
    }

    pub fn summary(&self, count: usize, elapsed: Duration) {
        if !self.quiet {
            let noun = if count == 1 { "file" } else { "files" };
            println!(
                "{} {} matched in {}",
                style(count).yellow().bold(),
                noun,
                style(format!("{:.2}s", elapsed.as_secs_f64())).dim()
            );
        }
    }
}

impl MatchObserver for Output {
    fn on_match(&self, file_match: &FileMatch) {
        self.report(file_match);
    }
}

fn write_stdout(text: &str) {
    let mut stdout = io::stdout().lock();
    if let Err(e) = stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush()) {
        tracing::debug!("Failed to write report: {}", e);
    }
}

/// Boxed report block: location, then position and compressed snippet of
/// every evidence entry
pub fn render_file_match(file_match: &FileMatch) -> String {
    let mut block = format!(
        "{}\nMatch:\t{}\n",
        RULE,
        style(file_match.file.location().display()).cyan().bold()
    );

    let entries: Vec<String> = file_match
        .matches
        .iter()
        .map(|m| {
            format!(
                "\tLine:{}, ColStart:{}, ColEnd:{}\n\t'{}'\n",
                m.line, m.start_col, m.end_col, m.compressed_snippet
            )
        })
        .collect();
    block.push_str(&entries.join("\n"));

    block.push_str(RULE);
    block.push_str("\n\n");
    block
}
