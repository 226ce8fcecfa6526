//! Terminal output: the unit summary table, the task progress bar and the
//! end-of-run report.

use crate::build::unit::BuildUnit;
use crate::build::{BuildGraph, RunReport};
use crate::parser::{Linkage, TargetKind};
use colored::*;
use console::{Term, measure_text_width, truncate_str};
use indicatif::{ProgressBar, ProgressStyle};

/// Box-drawn table that shrinks its widest columns to fit the terminal.
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    /// Rows with the wrong number of cells are dropped.
    pub fn add_row(&mut self, row: Vec<String>) {
        if row.len() == self.headers.len() {
            self.rows.push(row);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_widths(&self, max_width: usize) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| measure_text_width(h)).collect();
        for row in &self.rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(measure_text_width(&single_line(cell)));
            }
        }

        let overhead = 3 + 3 * self.headers.len();
        let available = max_width.saturating_sub(overhead);
        while widths.iter().sum::<usize>() > available {
            let Some((index, widest)) = widths
                .iter()
                .copied()
                .enumerate()
                .max_by_key(|(_, w)| *w)
            else {
                break;
            };
            if widest <= 8 {
                break;
            }
            widths[index] -= 1;
        }
        widths
    }

    pub fn render(&self, max_width: usize) -> String {
        if self.headers.is_empty() {
            return String::new();
        }
        let widths = self.column_widths(max_width);

        let border = |left: &str, mid: &str, right: &str| {
            let inner: Vec<String> = widths.iter().map(|w| "─".repeat(w + 2)).collect();
            format!("  {}{}{}\n", left, inner.join(mid), right)
        };
        let line = |cells: Vec<String>| {
            let mut out = String::from("  │");
            for (cell, width) in cells.iter().zip(&widths) {
                let cell = truncate_str(cell, *width, "...");
                let padding = width.saturating_sub(measure_text_width(&cell));
                out.push_str(&format!(" {}{} │", cell, " ".repeat(padding)));
            }
            out.push('\n');
            out
        };

        let mut out = border("┌", "┬", "┐");
        out.push_str(&line(
            self.headers.iter().map(|h| h.bold().to_string()).collect(),
        ));
        out.push_str(&border("├", "┼", "┤"));
        for row in &self.rows {
            out.push_str(&line(row.iter().map(|c| single_line(c)).collect()));
        }
        out.push_str(&border("└", "┴", "┘"));
        out
    }

    pub fn print(&self) {
        let (_rows, columns) = Term::stdout().size();
        print!("{}", self.render(columns as usize));
    }
}

fn single_line(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            _ => c,
        })
        .collect()
}

/// Progress bar for the scheduler, hidden when stderr is not a terminal.
pub fn progress_bar() -> ProgressBar {
    if !Term::stderr().is_term() {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    ProgressBar::new(0).with_style(style)
}

fn kind_label(unit: &BuildUnit) -> &'static str {
    match (unit.target_kind(), unit.linkage()) {
        (TargetKind::Application, _) => "app",
        (TargetKind::Library, Linkage::Static) => "static lib",
        (TargetKind::Library, Linkage::Dynamic) => "dynamic lib",
    }
}

/// One row per unit: target, kind, version, file count, Qt modules, tasks queued.
pub fn unit_summary(graph: &BuildGraph) -> Table {
    let mut table = Table::new(&["Target", "Kind", "Version", "Files", "Modules", "Tasks"]);
    for unit in graph.units() {
        let modules = if unit.modules().is_empty() {
            "-".to_string()
        } else {
            unit.modules().join(" ")
        };
        table.add_row(vec![
            unit.target_name().to_string(),
            kind_label(unit).to_string(),
            unit.version().to_string(),
            unit.files().len().to_string(),
            modules,
            unit.queued_tasks().to_string(),
        ]);
    }
    table
}

/// Prints failures and parse errors; returns whether the run succeeded.
pub fn print_report(report: &RunReport, parse_errors: &[String]) -> bool {
    for message in parse_errors {
        eprintln!("{} {}", "warning:".yellow().bold(), message);
    }

    if report.succeeded() {
        println!(
            "{} {} task(s) finished",
            "✓".green(),
            report.tasks_run.to_string().bold()
        );
        return true;
    }

    for failure in &report.failures {
        eprintln!("{} {}", "✗".red(), failure.to_error());
    }
    eprintln!(
        "{} build failed ({} of {} task(s) failed)",
        "error:".red().bold(),
        report.failures.len(),
        report.tasks_run
    );
    false
}
