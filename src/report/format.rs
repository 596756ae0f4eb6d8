//! Terminal output for the three commands.
//!
//! Formatting lives here so the pipeline only produces data.

use std::fmt::Write;

use crate::report::{BadPositions, UpdateSummary};

/// Closing report of an update run.
pub fn format_update_summary(summary: &UpdateSummary) -> String {
    let mut out = String::new();
    let mode = if summary.dry_run { " (test run, nothing written)" } else { "" };
    let _ = writeln!(out, "=== domcal - calibration update{mode} ===");
    let _ = writeln!(out, "Updated:    {}", summary.updated);
    let _ = writeln!(out, "Skipped:    {}", summary.skipped.len());
    let _ = writeln!(out, "Bad files:  {}", summary.skipped_files.len());
    let _ = writeln!(out, "Defaulted:  {}", summary.defaulted);
    let _ = writeln!(out, "Baselines:  {}", summary.baselines_updated);
    let _ = writeln!(out, "Warnings:   {}", summary.warnings);

    if !summary.skipped.is_empty() {
        out.push_str("\nSkipped devices:\n");
        for s in &summary.skipped {
            let _ = writeln!(out, "  {}  {}", s.mbid, s.reason);
        }
    }
    if !summary.skipped_files.is_empty() {
        out.push_str("\nSkipped calibration files:\n");
        for f in &summary.skipped_files {
            let _ = writeln!(out, "  {}  {}", f.path.display(), f.reason);
        }
    }
    out
}

/// Bad positions as a count line plus an OMKey list, three per line.
pub fn format_bad_positions(bad: &BadPositions) -> String {
    let mut out = format!("Found {} bad DOMs\n", bad.len());
    out.push_str("bad_doms = [");
    for (i, p) in bad.positions.iter().enumerate() {
        if i > 0 {
            out.push(',');
            if i % 3 == 0 {
                out.push('\n');
            }
        }
        let _ = write!(out, " icetray.OMKey({},{})", p.string, p.slot);
    }
    out.push_str(" ]");
    out
}
