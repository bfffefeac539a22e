//! End-to-end walkthrough against the embedded store: register a schema,
//! stage documents on the static connector, ingest, then query and search.
//! Everything runs in-process — no graph server, no embedding service.
//!
//! Run with: cargo run -p graphloom-api --example demo

use graphloom_api::{telemetry, Service};
use graphloom_embed::{HashEmbeddingProvider, ProviderRegistry};
use graphloom_graph::{GraphStore, MemoryGraph};
use graphloom_ingest::{Connector, ConnectorRegistry, IngestConfig, StaticConnector};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::init();

    let embeddings = ProviderRegistry::new(64);
    embeddings.register(Arc::new(HashEmbeddingProvider));
    let connectors = ConnectorRegistry::new();
    let connector = Arc::new(StaticConnector::new());
    connectors.register("static", Arc::clone(&connector) as Arc<dyn Connector>);
    let service = Service::assemble(
        Arc::new(MemoryGraph::new()) as Arc<dyn GraphStore>,
        Arc::new(embeddings),
        Arc::new(connectors),
        IngestConfig::default(),
    );
    service.startup().await?;

    let registered = service.register_schema(&json!({
        "kb_id": "docs",
        "name": "Documentation demo",
        "embedding": {
            "provider": "hash:64",
            "chunking": { "strategy": "by_fields", "fields": ["title"] }
        },
        "nodes": [
            { "label": "Document", "key_property": "id", "props": ["id", "title"] },
            { "label": "Person", "key_property": "email", "props": ["email", "name"] }
        ],
        "relationships": [
            { "type": "AUTHORED_BY", "from_label": "Document", "to_label": "Person" }
        ],
        "mappings": {
            "sources": [{
                "source_id": "pages",
                "connector_url": "static://demo/pages",
                "extract": {
                    "node": "Document",
                    "key": "$.id",
                    "assign": { "title": "$.title" }
                },
                "edges": [{
                    "type": "AUTHORED_BY",
                    "from": { "label": "Document", "key": "$.id" },
                    "to": {
                        "label": "Person",
                        "key": "$.author.email",
                        "props": { "name": "$.author.name" }
                    }
                }]
            }]
        }
    }))?;
    println!("registered kb `{}` ({} warnings)", registered.kb_id, registered.warnings.len());

    connector.stage(
        "static://demo/pages",
        json!([
            { "id": "d1", "title": "Intro to knowledge graphs",
              "author": { "email": "ada@example.com", "name": "Ada" } },
            { "id": "d2", "title": "Operating the ingestion pipeline",
              "author": { "email": "grace@example.com", "name": "Grace" } }
        ]),
    );
    service.add_source("docs", "pages", "static://demo/pages", None)?;

    let run_id = service.ingest("docs", "pages").await?;
    println!("run {run_id} started");
    loop {
        let runs = service.recent_runs(Some("docs"), 10).await?;
        if runs.iter().any(|r| r.run_id == run_id && r.state.is_terminal()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let status = service.sync_status("docs").await?;
    println!(
        "kb `docs`: {} nodes, {} relationships",
        status.nodes, status.relationships
    );

    let hits = service
        .semantic_search("docs", "knowledge graphs", 3, None)
        .await?;
    for hit in &hits {
        println!("search hit {} (score {:.3}): {}", hit.identity, hit.score, hit.snippet);
    }

    let params = BTreeMap::from([("author".to_string(), json!("Ada"))]);
    let rows = service
        .graph_query(
            "docs",
            "MATCH (d:Document)-[:AUTHORED_BY]->(p:Person) WHERE p.name = $author RETURN d.title",
            &params,
        )
        .await?;
    println!("authored by Ada: {}", serde_json::to_string_pretty(&rows)?);

    Ok(())
}
