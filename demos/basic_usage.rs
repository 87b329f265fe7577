//! Basic example demonstrating blocking requests against the Clash of Clans API.
//!
//! This example shows how to:
//! - Build a client from an API token
//! - Call typed endpoint wrappers and raw paths
//! - Tell error payloads apart from data
//! - Inspect the response cache
//!
//! Run with: `COC_API_TOKEN=... cargo run --example basic_usage`

use cocapi::request::params;
use cocapi::{ClientAdmin, ClientBuilder, Error, ErrorPayload};
use std::time::Duration;

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("cocapi=debug,basic_usage=info")
        .init();

    let token = std::env::var("COC_API_TOKEN").unwrap_or_default();

    // Building runs a self-test against GET /locations and fails early on a bad token
    let client = ClientBuilder::new(token)
        .timeout(Duration::from_secs(10))
        .cache_ttl(Duration::from_secs(300))
        .build()?;

    println!("=== Clan lookup ===");
    let clan = client.api().clan("#2PP", None);
    match ErrorPayload::from_value(&clan) {
        Some(error) => println!("Lookup failed: {} ({})", error.message, error.error_type),
        None => {
            println!("Name: {}", clan["name"]);
            println!("Level: {}", clan["clanLevel"]);
            println!("Members: {}", clan["members"]);
        }
    }
    println!();

    println!("=== Paged members ===");
    let members = client
        .api()
        .clan_members("#2PP", Some(params([("limit", 5)])));
    if let Some(items) = members["items"].as_array() {
        for member in items {
            println!("{:>20} {}", member["name"], member["trophies"]);
        }
    }
    println!();

    println!("=== Invalid parameter ===");
    // Rejected locally, nothing is sent
    let rejected = client.api().clan("#2PP", Some(params([("bogus", 1)])));
    println!("{}", rejected);
    println!();

    println!("=== Raw path ===");
    let leagues = client.request("/leagues", None);
    println!(
        "{} leagues",
        leagues["items"].as_array().map(Vec::len).unwrap_or(0)
    );
    println!();

    println!("=== Cache ===");
    // Same request again: served from the cache
    client.api().clan("#2PP", None);
    let stats = client.cache_stats();
    println!(
        "{} entries, {} hits, {} misses, hit rate {}%",
        stats.total_entries, stats.hits, stats.misses, stats.hit_rate
    );

    Ok(())
}
