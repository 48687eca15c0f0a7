//! Classification statistics commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, ClassificationStats, SnapshotResponse, StatsQuery};
use crate::output::{color_status, print_json, print_rows, OutputFormat};

/// Row for stats table
#[derive(Tabled)]
struct StatsRow {
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Period")]
    period: String,
    #[tabled(rename = "Total")]
    total: u64,
    #[tabled(rename = "High")]
    high: String,
    #[tabled(rename = "Uncertain")]
    uncertain: u64,
    #[tabled(rename = "Low")]
    low: u64,
    #[tabled(rename = "Multi")]
    multiple: u64,
    #[tabled(rename = "DNS")]
    dns: u64,
    #[tabled(rename = "ASN")]
    asn: u64,
    #[tabled(rename = "Avg ms")]
    latency: String,
}

impl From<&ClassificationStats> for StatsRow {
    fn from(s: &ClassificationStats) -> Self {
        let share = if s.total > 0 {
            s.high_confidence as f64 * 100.0 / s.total as f64
        } else {
            0.0
        };
        Self {
            model: s.model_name.clone(),
            period: format!(
                "{} → {}",
                s.period_start.format("%Y-%m-%d %H:%M"),
                s.period_end.format("%H:%M")
            ),
            total: s.total,
            high: format!("{} ({:.0}%)", s.high_confidence, share),
            uncertain: s.uncertain,
            low: s.low_confidence,
            multiple: s.multiple_candidates,
            dns: s.dns_fallbacks,
            asn: s.asn_fallbacks,
            latency: format!("{:.2}", s.avg_latency_ms),
        }
    }
}

pub async fn show_stats(client: &ApiClient, query: StatsQuery, format: OutputFormat) -> Result<()> {
    let stats: Vec<ClassificationStats> = client.get_query("api/v1/stats", &query).await?;

    match format {
        OutputFormat::Json => print_json(&stats)?,
        OutputFormat::Table => {
            let total: u64 = stats.iter().map(|s| s.total).sum();
            print_rows(stats.iter().map(StatsRow::from).collect(), "No stats recorded");
            if !stats.is_empty() {
                println!("\n{} {} classifications", "Total:".bold(), total);
            }
        }
    }
    Ok(())
}

/// Ask the console to drain live counters now
pub async fn snapshot(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let response: SnapshotResponse = client
        .post("api/v1/stats/snapshot", &serde_json::Value::Null)
        .await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            println!("Snapshot: {}", color_status(&response.status));
            print_rows(
                response.stats.iter().map(StatsRow::from).collect(),
                "No classifications since the last snapshot",
            );
        }
    }
    Ok(())
}
