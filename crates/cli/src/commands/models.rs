//! Model management commands

use anyhow::Result;
use serde_json::Value;
use tabled::Tabled;

use crate::client::{ActivateRequest, ApiClient, Category, ModelSummary};
use crate::output::{
    format_cookie, print_info, print_json, print_rows, print_success, OutputFormat,
};

/// Row for models table
#[derive(Tabled)]
struct ModelRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Backend")]
    backend: String,
    #[tabled(rename = "Input")]
    input_shape: String,
    #[tabled(rename = "Categories")]
    categories: usize,
    #[tabled(rename = "Threshold")]
    threshold: String,
    #[tabled(rename = "Loaded")]
    loaded: String,
    #[tabled(rename = "Active")]
    active: String,
}

/// Row for categories table
#[derive(Tabled)]
struct CategoryRow {
    #[tabled(rename = "Category")]
    name: String,
    #[tabled(rename = "Cookie")]
    cookie: String,
}

fn check(flag: bool) -> String {
    if flag {
        "✓".to_string()
    } else {
        String::new()
    }
}

pub async fn list_models(client: &ApiClient, active_only: bool, format: OutputFormat) -> Result<()> {
    let models: Vec<ModelSummary> = client.get("api/v1/models").await?;
    let models: Vec<_> = models
        .into_iter()
        .filter(|m| !active_only || m.is_active)
        .collect();

    match format {
        OutputFormat::Json => print_json(&models)?,
        OutputFormat::Table => {
            let rows: Vec<ModelRow> = models
                .iter()
                .map(|m| ModelRow {
                    name: m.name.clone(),
                    backend: m.backend.clone(),
                    input_shape: format!("{:?}", m.input_shape),
                    categories: m.categories.len(),
                    threshold: format!("{:.2}", m.confidence_threshold),
                    loaded: check(m.is_loaded),
                    active: check(m.is_active),
                })
                .collect();
            print_rows(rows, "No models found");
        }
    }

    Ok(())
}

pub async fn activate_model(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let response: Value = client
        .put(
            "api/v1/models/active",
            &ActivateRequest {
                name: name.to_string(),
            },
        )
        .await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => print_success(&format!("Model {} is now active", name)),
    }
    Ok(())
}

pub async fn load_model(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let response: Value = client
        .post(&format!("api/v1/models/{}/load", name), &Value::Null)
        .await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => print_success(&format!("Model {} loaded", name)),
    }
    Ok(())
}

pub async fn unload_model(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let response: Value = client
        .post(&format!("api/v1/models/{}/unload", name), &Value::Null)
        .await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => print_success(&format!("Model {} unloaded", name)),
    }
    Ok(())
}

pub async fn list_categories(client: &ApiClient, name: &str, format: OutputFormat) -> Result<()> {
    let categories: Vec<Category> = client
        .get(&format!("api/v1/models/{}/categories", name))
        .await?;

    match format {
        OutputFormat::Json => print_json(&categories)?,
        OutputFormat::Table => {
            print_info(&format!("Categories of {}", name));
            let rows: Vec<CategoryRow> = categories
                .iter()
                .map(|c| CategoryRow {
                    name: c.name.clone(),
                    cookie: format_cookie(c.cookie),
                })
                .collect();
            print_rows(rows, "Model has no categories");
        }
    }
    Ok(())
}
