//! Example demonstrating the metrics report, insights and CSV export.
//!
//! Run with: `COC_API_TOKEN=... cargo run --example metrics_report`

use cocapi::{ClientAdmin, ClientBuilder, Error};
use std::time::Duration;

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("cocapi=warn,metrics_report=info")
        .init();

    let token = std::env::var("COC_API_TOKEN").unwrap_or_default();
    let client = ClientBuilder::new(token)
        .enable_metrics(true)
        .metrics_window_size(500)
        .include_status_code(true)
        .max_retries(2)
        .retry_delay(Duration::from_millis(200))
        .build()?;

    for tag in ["#2PP", "#8QU8J9LP", "#2PP", "#NOTATAG"] {
        let clan = client.api().clan(tag, None);
        println!("{} -> status {}", tag, clan["status_code"]);
    }
    client.api().player("#9YJ9RJ0", None);
    client.api().gold_pass();

    let summary = client.metrics_summary();
    println!("=== Summary ===");
    println!(
        "{}",
        serde_json::to_string_pretty(&summary).unwrap_or_default()
    );
    println!();

    if let Some(clans) = client.endpoint_metrics("/clans/%232PP") {
        println!("=== {} ===", clans.formatted_endpoint);
        println!(
            "{} requests, {}% cached, {}s average",
            clans.total_requests, clans.cache_hit_rate, clans.average_response_time
        );
        println!();
    }

    println!("=== Recent errors ===");
    for error in client.recent_errors(5) {
        println!(
            "{} {} -> {} {:?}",
            error.method, error.endpoint, error.status_code, error.error_type
        );
    }
    println!();

    if let Some(report) = client.performance_insights() {
        println!("=== Insights ===");
        for insight in &report.insights {
            println!("[{:?}] {}", insight.severity, insight.message);
        }
        for recommendation in &report.recommendations {
            println!("- {}", recommendation);
        }
        println!();
    }

    println!("=== CSV ===");
    print!("{}", client.export_metrics_csv());

    Ok(())
}
