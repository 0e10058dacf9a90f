//! Prediction history command.

use anyhow::Result;
use autoscaler_core::types::PredictionRecord;
use colored::Colorize;
use tabled::Tabled;

use crate::output::{color_confidence, format_timestamp, print_warning, OutputFormat};
use crate::client::ApiClient;

#[derive(Tabled)]
struct PredictionRow {
    #[tabled(rename = "Issued")]
    issue_time: String,
    #[tabled(rename = "Horizon")]
    horizon: String,
    #[tabled(rename = "Predicted")]
    predicted_value: String,
    #[tabled(rename = "Bounds")]
    bounds: String,
    #[tabled(rename = "Model")]
    model_tag: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Realized")]
    realized: String,
}

/// Show recent predictions issued for a workload.
pub async fn show(client: &ApiClient, namespace: &str, name: &str, format: OutputFormat) -> Result<()> {
    let path = format!("api/v1/workloads/{}/{}/predictions", namespace, name);
    let predictions: Vec<PredictionRecord> = client.get(&path).await?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&predictions)?);
        }
        OutputFormat::Table => {
            println!("{}", format!("Predictions for {}/{}", namespace, name).bold());
            println!("{}", "=".repeat(60));

            if predictions.is_empty() {
                print_warning("No predictions recorded for this workload");
                return Ok(());
            }

            let rows: Vec<PredictionRow> = predictions
                .iter()
                .map(|p| PredictionRow {
                    issue_time: format_timestamp(p.issue_time),
                    horizon: format!("{:?}", p.horizon),
                    predicted_value: format!("{:.1}", p.predicted_value),
                    bounds: format!("[{:.1}, {:.1}]", p.lower_bound, p.upper_bound),
                    model_tag: p.model_tag.clone(),
                    confidence: color_confidence(p.confidence),
                    realized: match p.realized_value {
                        Some(v) => format!("{:.1}", v),
                        None => "-".to_string(),
                    },
                })
                .collect();

            let table = tabled::Table::new(rows).with(tabled::settings::Style::rounded()).to_string();
            println!("{}", table);
            println!("\nTotal: {} predictions", predictions.len());
        }
    }

    Ok(())
}
