//! Example demonstrating concurrent requests with the async client.
//!
//! Run with: `COC_API_TOKEN=... cargo run --example concurrent`

use cocapi::rate_limit::RateLimitConfig;
use cocapi::request::params;
use cocapi::{ClientAdmin, ClientBuilder, Error, ErrorPayload};

const CLAN_TAGS: [&str; 4] = ["#2PP", "#8QU8J9LP", "#PQL0289", "#Y2QGJYL"];

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("cocapi=info,concurrent=info")
        .init();

    let token = std::env::var("COC_API_TOKEN").unwrap_or_default();
    let client = ClientBuilder::new(token)
        .rate_limit_config(
            RateLimitConfig::builder()
                .requests_per_second(5.0)
                .burst(2)
                .build(),
        )
        .enable_metrics(true)
        .build_async()?;

    // Requests are only accepted while the session is active
    let session = client.enter().await?;

    let handles: Vec<_> = CLAN_TAGS
        .iter()
        .map(|tag| {
            let client = client.clone();
            let tag = tag.to_string();
            tokio::spawn(async move {
                let clan = client.api().clan(&tag, None).await;
                (tag, clan)
            })
        })
        .collect();

    for handle in handles {
        let Ok((tag, clan)) = handle.await else {
            continue;
        };
        match clan {
            Ok(value) => match ErrorPayload::from_value(&value) {
                Some(error) => println!("{}: {}", tag, error.message),
                None => println!("{}: {}", tag, value["name"]),
            },
            Err(e) => println!("{}: {}", tag, e),
        }
    }

    let (locations, top_clans) = tokio::join!(
        client.api().locations(None),
        client
            .api()
            .location_clan_rankings("global", Some(params([("limit", 3)]))),
    );
    println!(
        "{} locations",
        locations?["items"].as_array().map(Vec::len).unwrap_or(0)
    );
    println!("Top clans: {}", top_clans?["items"]);

    session.exit();

    // Closed client: calls fail with NoActiveSession
    match client.api().gold_pass().await {
        Err(Error::NoActiveSession) => println!("Session closed"),
        other => println!("Unexpected: {:?}", other),
    }

    println!("{:#?}", client.metrics_summary());
    Ok(())
}
