//! Query fan-out - serial vs concurrent calls through one session.
//!
//! This example demonstrates:
//! - Establishing a session against a scripted in-process cluster
//! - Obtaining a pre-adapted service from a factory accessor
//! - Running the same lookup serially, then as a concurrent fan-out
//!
//! # Running
//!
//! ```sh
//! RUST_LOG=debug cargo run --example query_fanout
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::task::JoinSet;

use trestle::testkit::{ScriptStep, StubRuntime, StubService};
use trestle::{CallPayload, Client, ClientConfig, SESSION_FACTORY_ID};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Scripted cluster: a router, the session factory it hands out and a
    // query service with a 50ms round trip.
    let query = Arc::new(StubService::new("::demo::Query").triad_delayed(
        "findAllByQuery",
        Duration::from_millis(50),
        ScriptStep::value(json!([{ "id": 1, "name": "dv-3" }])),
    ));
    let factory = Arc::new(
        StubService::new(SESSION_FACTORY_ID)
            .with_identity("sess-demo")
            .triad("getQueryService", ScriptStep::proxy(query))
            .triad("setCallback", ScriptStep::void()),
    );
    let router = Arc::new(
        StubService::new("::demo::Router")
            .operation("getCategoryForClient", ScriptStep::value(json!("_client")))
            .triad("createSession", ScriptStep::proxy(factory)),
    );
    let runtime = Arc::new(StubRuntime::new(router));

    // Establish the session and pull an adapted query service out of it
    let client = Client::new(runtime, ClientConfig::default());
    let session = client.create_session(Some("public"), Some("public")).await?;
    println!("session id: {:?}", session.session_id());

    let handle = session
        .invoke("getQueryService", CallPayload::new())
        .await?
        .into_adapted()
        .ok_or("factory did not return a service")?;

    let filters = [
        "name like 'dv%'",
        "owner = 52",
        "created > '2026-01-01'",
        "tag = 'stitched'",
        "plate = 'P-009'",
    ];

    // Serial: one call at a time
    let started = Instant::now();
    for filter in &filters {
        handle
            .invoke("findAllByQuery", CallPayload::positional(vec![json!(filter)]))
            .await?;
    }
    println!("serial:     {:?}", started.elapsed());

    // Concurrent: all five at once through clones of the same handle
    let started = Instant::now();
    let mut calls = JoinSet::new();
    for filter in filters {
        let handle = handle.clone();
        calls.spawn(async move {
            handle
                .invoke("findAllByQuery", CallPayload::positional(vec![json!(filter)]))
                .await
        });
    }
    while let Some(joined) = calls.join_next().await {
        joined??;
    }
    println!("concurrent: {:?}", started.elapsed());

    client.close_session().await?;
    Ok(())
}
