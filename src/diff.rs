use std::fmt::Write;

use similar::{ChangeTag, TextDiff};

const RED: &str = "\x1b[31m";
const GREEN: &str = "\x1b[32m";
const RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy)]
pub struct DiffDisplayConfig {
    pub context: usize,
    pub colorize: bool,
}

/// Line diff of `old` → `new`, hunks separated by `...`.
pub fn render_diff(old: &str, new: &str, config: DiffDisplayConfig) -> String {
    let diff = TextDiff::configure()
        .algorithm(similar::Algorithm::Myers)
        .diff_lines(old, new);

    let mut out = String::new();
    for (idx, group) in diff.grouped_ops(config.context).iter().enumerate() {
        if idx > 0 {
            out.push_str("...\n");
        }
        for op in group {
            for change in diff.iter_changes(op) {
                let (sign, color) = match change.tag() {
                    ChangeTag::Delete => ("- ", RED),
                    ChangeTag::Insert => ("+ ", GREEN),
                    ChangeTag::Equal => ("  ", ""),
                };
                // `Change` renders its own trailing newline, even when the
                // input lacked one.
                if config.colorize && !color.is_empty() {
                    let line = change.value().trim_end_matches('\n');
                    let _ = writeln!(out, "{color}{sign}{line}{RESET}");
                } else {
                    let _ = write!(out, "{sign}{change}");
                }
            }
        }
    }
    out
}
