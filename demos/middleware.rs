//! Example demonstrating request and response middleware.
//!
//! Run with: `COC_API_TOKEN=... cargo run --example middleware`

use cocapi::middleware::{
    BoxError, DebugLogging, OutgoingRequest, RequestId, ResponseSize, ResponseTimestamp, UserAgent,
};
use cocapi::{ClientAdmin, ClientBuilder, Error};
use serde_json::Value;

/// Tags every successful payload with the client that fetched it.
struct ClientTag(&'static str);

impl cocapi::middleware::ResponseMiddleware for ClientTag {
    fn name(&self) -> &str {
        "client_tag"
    }

    fn process(&self, response: &Value) -> Result<Value, BoxError> {
        let mut response = response.clone();
        if let Some(object) = response.as_object_mut() {
            object.insert("_client".to_string(), Value::from(self.0));
        }
        Ok(response)
    }
}

fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("cocapi=debug,middleware=info")
        .init();

    let token = std::env::var("COC_API_TOKEN").unwrap_or_default();
    let client = ClientBuilder::new(token).build()?;

    client.add_request_middleware(UserAgent::new("clan-tracker/1.0"));
    client.add_request_middleware(RequestId);
    client.add_request_middleware(DebugLogging);

    // Closures work as anonymous middleware
    client.add_request_middleware(|request: &OutgoingRequest| -> Result<OutgoingRequest, BoxError> {
        let mut request = request.clone();
        request
            .params
            .entry("limit".to_string())
            .or_insert_with(|| "10".to_string());
        Ok(request)
    });

    client.add_response_middleware(ResponseTimestamp);
    client.add_response_middleware(ResponseSize);
    client.add_response_middleware(ClientTag("middleware-demo"));

    // A failing step is logged and skipped, the rest of the chain still runs
    client.add_response_middleware(|_: &Value| -> Result<Value, BoxError> {
        Err("always fails".into())
    });

    let info = client.middleware_info();
    println!("Request middleware:  {:?}", info.request_middleware_names);
    println!("Response middleware: {:?}", info.response_middleware_names);
    println!();

    let leagues = client.api().war_leagues();
    println!("Processed at: {}", leagues["_processed_at"]);
    println!("Size: {} bytes", leagues["_response_size_bytes"]);
    println!("Client: {}", leagues["_client"]);

    client.middleware().clear_all_middleware();
    println!("Cleared: {:?}", client.middleware_info());

    Ok(())
}
