//! Lookup set bulk loads

use anyhow::{Context, Result};
use std::path::Path;

use crate::client::{ApiClient, LoadReport, LoadRequest};
use crate::output::{print_error, print_json, print_success, OutputFormat};

/// Load a lookup set from a file readable by the console.
/// Relative paths are resolved against the current directory first.
pub async fn load(
    client: &ApiClient,
    set: &str,
    path: &Path,
    batch_size: Option<usize>,
    format: OutputFormat,
) -> Result<()> {
    let path = if path.is_relative() {
        std::env::current_dir()
            .context("Could not determine current directory")?
            .join(path)
    } else {
        path.to_path_buf()
    };

    let request = LoadRequest {
        path: path.display().to_string(),
        batch_size,
    };
    let report: LoadReport = client
        .post_report(&format!("api/v1/lookups/{}/load", set), &request)
        .await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            if report.success {
                print_success(&report.message);
            } else {
                print_error(&report.message);
            }
        }
    }

    if !report.success {
        anyhow::bail!("{} load failed", set);
    }
    Ok(())
}
