//! Meter policy commands

use anyhow::{Context, Result};
use chrono::NaiveTime;
use clap::{Args, ValueEnum};
use tabled::Tabled;

use crate::client::{ApiClient, MeterDraft, MeterPolicy};
use crate::output::{format_optional, format_rate, print_json, print_rows, print_success, OutputFormat};

/// When a policy applies
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Period {
    Weekday,
    Weekend,
    AllWeek,
}

impl Period {
    fn wire_name(&self) -> &'static str {
        match self {
            Period::Weekday => "WEEKDAY",
            Period::Weekend => "WEEKEND",
            Period::AllWeek => "ALL_WEEK",
        }
    }
}

/// Fields of a meter policy
#[derive(Debug, Clone, Args)]
pub struct MeterArgs {
    /// Controller address (host, host:port or URL)
    #[arg(long)]
    pub controller: String,

    /// Switch node id, e.g. openflow:1
    #[arg(long = "switch")]
    pub switch_id: String,

    /// Rate limit in kbit/s
    #[arg(long)]
    pub rate: u64,

    /// Burst size in kbit
    #[arg(long)]
    pub burst: Option<u64>,

    /// Category to meter; repeat for several
    #[arg(long = "category", required = true)]
    pub categories: Vec<String>,

    /// Restrict the policy to one client IP or MAC
    #[arg(long)]
    pub client: Option<String>,

    #[arg(long, value_enum, default_value = "all-week")]
    pub period: Period,

    /// Window start, HH:MM
    #[arg(long, value_parser = parse_time)]
    pub start: Option<NaiveTime>,

    /// Window end, HH:MM
    #[arg(long, value_parser = parse_time)]
    pub end: Option<NaiveTime>,

    /// Explicit controller meter id; allocated by the console when omitted
    #[arg(long)]
    pub meter_id: Option<u32>,
}

impl MeterArgs {
    pub fn into_draft(self) -> MeterDraft {
        MeterDraft {
            controller: self.controller,
            switch_id: self.switch_id,
            meter_id: self.meter_id,
            rate_kbps: self.rate,
            burst_size: self.burst,
            categories: self.categories,
            client: self.client,
            activation_period: self.period.wire_name().to_string(),
            start_time: self.start,
            end_time: self.end,
        }
    }
}

fn parse_time(value: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .with_context(|| format!("expected HH:MM, got {:?}", value))
}

/// Row for meters table
#[derive(Tabled)]
struct MeterRow {
    #[tabled(rename = "ID")]
    id: u64,
    #[tabled(rename = "Controller")]
    controller: String,
    #[tabled(rename = "Switch")]
    switch_id: String,
    #[tabled(rename = "Meter")]
    meter_id: u32,
    #[tabled(rename = "Rate")]
    rate: String,
    #[tabled(rename = "Categories")]
    categories: String,
    #[tabled(rename = "Client")]
    client: String,
    #[tabled(rename = "Period")]
    period: String,
    #[tabled(rename = "Window")]
    window: String,
}

impl From<&MeterPolicy> for MeterRow {
    fn from(p: &MeterPolicy) -> Self {
        let window = match (p.start_time, p.end_time) {
            (Some(start), Some(end)) => format!("{}-{}", start.format("%H:%M"), end.format("%H:%M")),
            _ => "all day".to_string(),
        };
        Self {
            id: p.id,
            controller: p.controller.clone(),
            switch_id: p.switch_id.clone(),
            meter_id: p.meter_id,
            rate: format_rate(p.rate_kbps),
            categories: p.categories.join(", "),
            client: format_optional(p.client.as_deref()),
            period: p.activation_period.clone(),
            window,
        }
    }
}

fn print_policy(policy: &MeterPolicy, format: OutputFormat, message: &str) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(policy)?,
        OutputFormat::Table => {
            print_success(message);
            print_rows(vec![MeterRow::from(policy)], "");
        }
    }
    Ok(())
}

pub async fn list_meters(
    client: &ApiClient,
    switch_id: Option<String>,
    category: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let policies: Vec<MeterPolicy> = client.get("api/v1/meters").await?;
    let policies: Vec<_> = policies
        .into_iter()
        .filter(|p| switch_id.as_ref().map_or(true, |s| &p.switch_id == s))
        .filter(|p| {
            category
                .as_ref()
                .map_or(true, |c| p.categories.iter().any(|pc| pc.eq_ignore_ascii_case(c)))
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&policies)?,
        OutputFormat::Table => {
            let total = policies.len();
            print_rows(policies.iter().map(MeterRow::from).collect(), "No meter policies found");
            if total > 0 {
                println!("\nTotal: {} policies", total);
            }
        }
    }
    Ok(())
}

pub async fn create_meter(client: &ApiClient, args: MeterArgs, format: OutputFormat) -> Result<()> {
    let policy: MeterPolicy = client.post("api/v1/meters", &args.into_draft()).await?;
    print_policy(
        &policy,
        format,
        &format!("Created policy {} with meter {}", policy.id, policy.meter_id),
    )
}

pub async fn update_meter(client: &ApiClient, id: u64, args: MeterArgs, format: OutputFormat) -> Result<()> {
    let policy: MeterPolicy = client
        .put(&format!("api/v1/meters/{}", id), &args.into_draft())
        .await?;
    print_policy(&policy, format, &format!("Updated policy {}", id))
}

pub async fn delete_meter(client: &ApiClient, id: u64, format: OutputFormat) -> Result<()> {
    let policy: MeterPolicy = client.delete(&format!("api/v1/meters/{}", id)).await?;
    match format {
        OutputFormat::Json => print_json(&policy)?,
        OutputFormat::Table => print_success(&format!(
            "Deleted policy {} and meter {} on {}",
            id, policy.meter_id, policy.switch_id
        )),
    }
    Ok(())
}
