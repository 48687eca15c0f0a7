//! Submit a classification request from a JSON file

use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::Value;
use std::path::Path;
use tabled::Tabled;

use crate::client::{ApiClient, ClassificationResponse};
use crate::output::{
    color_confidence, color_status, format_cookie, format_optional, print_json, print_rows,
    OutputFormat,
};

#[derive(Tabled)]
struct FlowRow {
    #[tabled(rename = "Direction")]
    direction: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Flow ID")]
    flow_id: String,
    #[tabled(rename = "HTTP")]
    response_code: String,
    #[tabled(rename = "Message")]
    message: String,
}

pub async fn classify(client: &ApiClient, request_file: &Path, format: OutputFormat) -> Result<()> {
    let raw = std::fs::read_to_string(request_file)
        .with_context(|| format!("Failed to read {}", request_file.display()))?;
    let request: Value = serde_json::from_str(&raw).context("Request file is not valid JSON")?;

    let response: ClassificationResponse = client.post("api/v1/classify", &request).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => {
            println!("{}", "Classification".bold());
            println!("{}", "=".repeat(40));
            println!("Category:   {}", response.classification.cyan());
            println!("Confidence: {}", color_confidence(&response.confidence));
            println!("Cookie:     {}", format_optional(response.cookie.map(format_cookie)));
            println!("Meter:      {}", format_optional(response.applied_meter_id));
            println!("Status:     {}", color_status(&response.status));

            if !response.flow_results.is_empty() {
                println!();
                let rows = response
                    .flow_results
                    .iter()
                    .map(|f| FlowRow {
                        direction: f.direction.clone(),
                        status: color_status(&f.status),
                        flow_id: f.flow_id.clone(),
                        response_code: format_optional(f.response_code),
                        message: f.message.clone().unwrap_or_default(),
                    })
                    .collect();
                print_rows(rows, "");
            }
        }
    }
    Ok(())
}
