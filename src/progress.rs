//! Progress and run reports
//!
//! The spinner, headers and summaries go to stderr so that query, find
//! and rollup rows on stdout stay clean. The gendir report is that
//! command's output and goes to stdout.

use crate::config::GenConfig;
use crate::tasks::gendir::GenReport;
use crate::tasks::trace::TraceReport;
use crate::walker::{WalkProgress, WalkResult};
use console::style;
use humansize::{format_size, BINARY};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::time::Duration;

/// Spinner that displays live walk counters
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Create a new progress reporter
    pub fn new() -> Self {
        let bar = ProgressBar::new_spinner();

        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
        bar.enable_steady_tick(Duration::from_millis(100));

        Self { bar }
    }

    /// Update the progress display
    pub fn update(&self, progress: &WalkProgress) {
        let msg = format!(
            "Dirs: {} | Files: {} | Size: {} | Rate: {:.0}/s | Errors: {}",
            format_number(progress.dirs),
            format_number(progress.files),
            format_size(progress.bytes, BINARY),
            progress.files_per_second(),
            format_number(progress.errors),
        );

        self.bar.set_message(msg);
    }

    /// Finish the progress display with a final message
    pub fn finish(&self, message: &str) {
        self.bar.finish_with_message(message.to_string());
    }

    /// Finish and clear the progress display
    pub fn finish_and_clear(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let bytes: Vec<_> = s.bytes().rev().collect();

    let chunks: Vec<String> = bytes
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .rev()
                .map(|&b| b as char)
                .collect::<String>()
        })
        .collect();

    chunks.into_iter().rev().collect::<Vec<_>>().join(",")
}

/// Print a header at the start of a run
pub fn print_header(command: &str, target: &str, threads: usize) {
    eprintln!();
    eprintln!(
        "{} {} {}",
        style("treeindex").cyan().bold(),
        env!("CARGO_PKG_VERSION"),
        style(command).bold()
    );
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {}", style("Target:").bold(), target);
    eprintln!("  {} {}", style("Threads:").bold(), threads);
    eprintln!();
}

/// Print a summary of a tree walk
pub fn print_summary(title: &str, result: &WalkResult) {
    let duration_secs = result.duration.as_secs_f64();
    let rate = if duration_secs > 0.0 {
        (result.files + result.dirs) as f64 / duration_secs
    } else {
        0.0
    };

    eprintln!();
    eprintln!("{}", style(title).green().bold());
    eprintln!("{}", style("─".repeat(50)).dim());
    eprintln!("  {} {}", style("Directories:").bold(), format_number(result.dirs));
    eprintln!("  {} {}", style("Files:").bold(), format_number(result.files));
    if result.bytes > 0 {
        eprintln!("  {} {}", style("Total Size:").bold(), format_size(result.bytes, BINARY));
    }
    eprintln!(
        "  {} {:.1}s ({:.0} items/sec, {} threads)",
        style("Duration:").bold(),
        duration_secs,
        rate,
        result.threads
    );
    if result.errors > 0 {
        eprintln!("  {} {}", style("Errors:").yellow().bold(), format_number(result.errors));
    }
    if result.pruned > 0 {
        eprintln!(
            "  {} {} (results are incomplete)",
            style("Pruned subtrees:").yellow().bold(),
            format_number(result.pruned)
        );
    }
    eprintln!();
}

/// Print a summary of a trace replay
pub fn print_trace_summary(report: &TraceReport) {
    eprintln!();
    eprintln!("{}", style("Trace Replayed").green().bold());
    eprintln!("{}", style("─".repeat(50)).dim());
    match &report.scout {
        Ok(scout) => {
            eprintln!(
                "  {} {} dirs ({} empty), {} files",
                style("Scouted:").bold(),
                format_number(scout.dirs),
                format_number(scout.empty_dirs),
                format_number(scout.files)
            );
            if scout.bad_lines > 0 {
                eprintln!("  {} {}", style("Bad lines:").yellow().bold(), format_number(scout.bad_lines));
            }
        }
        Err(e) => eprintln!("  {} {}", style("Scout failed:").red().bold(), e),
    }
    eprintln!(
        "  {} {} dirs, {} files, {}",
        style("Indexed:").bold(),
        format_number(report.dirs),
        format_number(report.files),
        format_size(report.bytes, BINARY)
    );
    let failed = report.consumers.bad_records + report.consumers.failed_units;
    if failed > 0 {
        eprintln!(
            "  {} {} bad records, {} failed directories",
            style("Errors:").yellow().bold(),
            format_number(report.consumers.bad_records),
            format_number(report.consumers.failed_units)
        );
    }
    eprintln!("  {} {:.1}s", style("Duration:").bold(), report.duration.as_secs_f64());
    eprintln!();
}

/// Write the gendir parameters and expected counts, unless the header is off
pub fn write_gen_header<W: Write>(out: &mut W, config: &GenConfig) -> io::Result<()> {
    if !config.show_header {
        return Ok(());
    }
    writeln!(out, "Target:                     {}", config.root.display())?;
    writeln!(out, "Thread Count:               {}", config.threads)?;
    writeln!(out, "Levels:                     {}", config.depth)?;
    writeln!(out, "Branching Factor:           {}", config.branching)?;
    writeln!(out, "Files under each directory: {}", config.files)?;
    writeln!(out, "Iterations:                 {}", config.iterations)?;
    writeln!(out, "Expected Dir Count:         {}", config.expected_dirs())?;
    writeln!(out, "Expected File Count:        {}", config.expected_files())
}

/// Write the gendir timing table
pub fn write_op_table<W: Write>(out: &mut W, report: &GenReport) -> io::Result<()> {
    writeln!(out, "Total Run Time:             {:.2}s", report.duration.as_secs_f64())?;
    writeln!(out, "Total Threads Run:          {}", report.threads)?;
    writeln!(
        out,
        "|    MD Op    |    Count     |   Realtime (s)  |  Linear Time (s)  |      Min (s)      |      Max (s)      |"
    )?;
    writeln!(out, "{}", "-".repeat(108))?;

    for row in &report.rows {
        writeln!(
            out,
            "{:<13} {:>10} {:>16.2} {:>18.6} {:>19.6} {:>19.6}",
            row.op.name(),
            row.stat.count,
            row.realtime.as_secs_f64(),
            row.stat.secs,
            row.stat.min_secs(),
            row.stat.max
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::gendir::{Op, OpRow, OpStat};

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234567), "1,234,567");
        assert_eq!(format_number(1234567890), "1,234,567,890");
    }

    #[test]
    fn test_gen_header_respects_quiet() {
        use crate::config::{CliArgs, RunConfig};
        use clap::Parser;

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("gen");
        let header = |quiet: bool| {
            let mut argv = vec!["treeindex", "gendir", root.to_str().unwrap(), "-b", "2", "-d", "2"];
            if quiet {
                argv.push("-q");
            }
            let RunConfig::Gendir(config) = RunConfig::from_args(CliArgs::try_parse_from(argv).unwrap()).unwrap() else {
                panic!("expected gendir config");
            };
            let mut out = Vec::new();
            write_gen_header(&mut out, &config).unwrap();
            String::from_utf8(out).unwrap()
        };

        assert!(header(false).contains("Expected Dir Count:         3"));
        assert!(header(true).is_empty());
    }

    #[test]
    fn test_op_table_rows() {
        let report = GenReport {
            rows: vec![OpRow {
                op: Op::StatDir,
                stat: OpStat {
                    count: 7,
                    secs: 0.5,
                    min: 0.25,
                    max: 0.25,
                },
                realtime: Duration::from_millis(1500),
            }],
            expected_dirs: 7,
            expected_files: 0,
            failed: 0,
            pruned: 0,
            threads: 4,
            duration: Duration::from_secs(2),
        };

        let mut out = Vec::new();
        write_op_table(&mut out, &report).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], "Total Run Time:             2.00s");
        assert_eq!(lines[1], "Total Threads Run:          4");
        assert_eq!(lines.len(), 5);
        let cols: Vec<&str> = lines[4].split_whitespace().collect();
        assert_eq!(cols, vec!["stat", "(dir)", "7", "1.50", "0.500000", "0.250000", "0.250000"]);
    }
}
