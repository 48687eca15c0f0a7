//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

impl OutputFormat {
    pub fn parse(value: &str) -> Option<Self> {
        <Self as ValueEnum>::from_str(value, true).ok()
    }
}

/// Print any value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print table rows, or a warning when there are none
pub fn print_rows<T: Tabled>(rows: Vec<T>, empty_message: &str) {
    if rows.is_empty() {
        print_warning(empty_message);
        return;
    }
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format a rate in kbit/s
pub fn format_rate(kbps: u64) -> String {
    if kbps >= 1_000_000 {
        format!("{:.2} Gbps", kbps as f64 / 1_000_000.0)
    } else if kbps >= 1000 {
        format!("{:.2} Mbps", kbps as f64 / 1000.0)
    } else {
        format!("{} kbps", kbps)
    }
}

/// Cookies are printed in hex, the way controllers display them
pub fn format_cookie(cookie: u64) -> String {
    format!("{:#018x}", cookie)
}

pub fn format_optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

/// Color status based on value
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "success" | "persisted" | "healthy" => status.green().to_string(),
        "partial" | "skipped" | "degraded" => status.yellow().to_string(),
        "unmetered" => status.blue().to_string(),
        "failed" | "unhealthy" | "error" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color a confidence level
pub fn color_confidence(level: &str) -> String {
    match level {
        "high" => level.green().to_string(),
        "uncertain" | "multiple_candidates" => level.yellow().to_string(),
        "low" => level.red().to_string(),
        _ => level.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(512), "512 kbps");
        assert_eq!(format_rate(2500), "2.50 Mbps");
        assert_eq!(format_rate(1_500_000), "1.50 Gbps");
    }

    #[test]
    fn test_format_cookie_is_fixed_width() {
        assert_eq!(format_cookie(255), "0x00000000000000ff");
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(OutputFormat::parse("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::parse("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::parse("yaml"), None);
    }
}
