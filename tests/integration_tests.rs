//! Integration tests for the complete Graphloom pipeline.
//!
//! These run the real service wiring end to end — schema registration,
//! connector pull, mapping, embedding, graph materialization, retrieval —
//! with a static connector and the deterministic hash embedding provider,
//! so no network or external store is involved.
//!
//! Run with: cargo test --test integration_tests

use graphloom_api::Service;
use graphloom_embed::{HashEmbeddingProvider, ProviderRegistry};
use graphloom_graph::{GraphStore, MemoryGraph, NodeIdentity, NodeUpsert, Provenance};
use graphloom_ingest::{
    Connector, ConnectorRegistry, IngestConfig, RunRecord, RunState, StaticConnector,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Harness
// ============================================================================

struct TestEnv {
    service: Service,
    connector: Arc<StaticConnector>,
    graph: Arc<MemoryGraph>,
}

fn env() -> TestEnv {
    env_on(Arc::new(MemoryGraph::new()))
}

fn env_on(graph: Arc<MemoryGraph>) -> TestEnv {
    let embeddings = ProviderRegistry::new(64);
    embeddings.register(Arc::new(HashEmbeddingProvider));
    let connectors = ConnectorRegistry::new();
    let connector = Arc::new(StaticConnector::new());
    connectors.register("static", Arc::clone(&connector) as Arc<dyn Connector>);
    let service = Service::assemble(
        Arc::clone(&graph) as Arc<dyn GraphStore>,
        Arc::new(embeddings),
        Arc::new(connectors),
        IngestConfig::default(),
    );
    TestEnv {
        service,
        connector,
        graph,
    }
}

async fn await_run(service: &Service, kb_id: &str, run_id: &str) -> RunRecord {
    for _ in 0..600 {
        let runs = service.recent_runs(Some(kb_id), 100).await.unwrap();
        if let Some(run) = runs.into_iter().find(|r| r.run_id == run_id) {
            if run.state.is_terminal() {
                return run;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("run {run_id} never reached a terminal state");
}

async fn ingest_and_wait(env: &TestEnv, kb_id: &str, source_id: &str) -> RunRecord {
    let run_id = env.service.ingest(kb_id, source_id).await.unwrap();
    await_run(&env.service, kb_id, &run_id).await
}

/// Start a run that must be distinct from `previous` — retries while the
/// single-flight table still holds the finished run.
async fn ingest_again(env: &TestEnv, kb_id: &str, source_id: &str, previous: &str) -> RunRecord {
    for _ in 0..600 {
        let run_id = env.service.ingest(kb_id, source_id).await.unwrap();
        if run_id != previous {
            return await_run(&env.service, kb_id, &run_id).await;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("single-flight slot for {kb_id}/{source_id} never freed");
}

fn retail_schema() -> Value {
    json!({
        "kb_id": "retail-demo",
        "nodes": [
            { "label": "Product", "key_property": "sku", "props": ["sku", "name"] },
            { "label": "Customer", "key_property": "email", "props": ["email", "name"] }
        ],
        "mappings": {
            "sources": [{
                "source_id": "products",
                "connector_url": "static://c/products",
                "extract": { "node": "Product", "key": "$.sku", "assign": { "name": "$.name" } }
            }]
        }
    })
}

fn docs_schema(provider: &str) -> Value {
    json!({
        "kb_id": "docs",
        "embedding": {
            "provider": provider,
            "chunking": { "strategy": "by_fields", "fields": ["title"] }
        },
        "nodes": [
            { "label": "Document", "key_property": "id", "props": ["id", "title"] },
            { "label": "Person", "key_property": "email", "props": ["email", "name"] },
            { "label": "Topic", "key_property": "name", "props": ["name"] }
        ],
        "relationships": [
            { "type": "AUTHORED_BY", "from_label": "Document", "to_label": "Person" },
            { "type": "DISCUSSES", "from_label": "Document", "to_label": "Topic" }
        ],
        "mappings": {
            "sources": [{
                "source_id": "pages",
                "connector_url": "static://c/pages",
                "extract": {
                    "node": "Document",
                    "key": "$.id",
                    "assign": { "title": "$.title" }
                },
                "edges": [
                    {
                        "type": "AUTHORED_BY",
                        "from": { "label": "Document", "key": "$.id" },
                        "to": {
                            "label": "Person",
                            "key": "$.author.email",
                            "props": { "name": "$.author.name" }
                        }
                    },
                    {
                        "type": "DISCUSSES",
                        "from": { "label": "Document", "key": "$.id" },
                        "to": { "label": "Topic", "key": "$.labels[*]" }
                    }
                ]
            }]
        }
    })
}

fn setup_docs(env: &TestEnv, documents: Value) {
    let registered = env.service.register_schema(&docs_schema("hash:64")).unwrap();
    assert_eq!(registered.kb_id, "docs");
    env.connector.stage("static://c/pages", documents);
    env.service
        .add_source("docs", "pages", "static://c/pages", None)
        .unwrap();
}

// ============================================================================
// End-to-end scenarios
// ============================================================================

#[tokio::test]
async fn products_ingest_is_idempotent() {
    let env = env();
    env.service.register_schema(&retail_schema()).unwrap();
    env.connector.stage(
        "static://c/products",
        json!([{ "sku": "A", "name": "x" }, { "sku": "B", "name": "y" }]),
    );
    env.service
        .add_source("retail-demo", "products", "static://c/products", None)
        .unwrap();

    let first = ingest_and_wait(&env, "retail-demo", "products").await;
    assert_eq!(first.state, RunState::Completed);
    assert_eq!(first.docs_processed, 2);

    let status = env.service.sync_status("retail-demo").await.unwrap();
    assert_eq!(status.nodes, 2);
    assert_eq!(status.relationships, 0);
    assert!(status.updated_at.is_some());

    let second = ingest_again(&env, "retail-demo", "products", &first.run_id).await;
    assert_eq!(second.state, RunState::Completed);

    let status = env.service.sync_status("retail-demo").await.unwrap();
    assert_eq!(status.nodes, 2);
    assert_eq!(status.relationships, 0);
}

#[tokio::test]
async fn document_author_edge_materializes_with_endpoint_props() {
    let env = env();
    setup_docs(
        &env,
        json!([{ "id": "d1", "title": "T", "author": { "email": "a@x", "name": "Ada" } }]),
    );

    let run = ingest_and_wait(&env, "docs", "pages").await;
    assert_eq!(run.state, RunState::Completed);

    let status = env.service.sync_status("docs").await.unwrap();
    assert_eq!(status.nodes, 2);
    assert_eq!(status.relationships, 1);

    let rows = env
        .service
        .graph_query(
            "docs",
            "MATCH (d:Document)-[:AUTHORED_BY]->(p:Person) RETURN d.id, p.name",
            &BTreeMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["d.id"], json!("d1"));
    assert_eq!(rows[0]["p.name"], json!("Ada"));
}

#[tokio::test]
async fn later_runs_enrich_endpoints_without_duplicating_edges() {
    let env = env();
    setup_docs(
        &env,
        json!([{ "id": "d1", "title": "T", "author": { "email": "a@x" } }]),
    );

    let first = ingest_and_wait(&env, "docs", "pages").await;
    assert_eq!(first.state, RunState::Completed);

    // The first pass only knows the email.
    let rows = env
        .service
        .graph_query(
            "docs",
            "MATCH (p:Person) RETURN p.name, p.email",
            &BTreeMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["p.name"], Value::Null);

    // The connector now serves richer data for the same identities.
    env.connector.stage(
        "static://c/pages",
        json!([{ "id": "d1", "title": "T", "author": { "email": "a@x", "name": "Ada" } }]),
    );
    let second = ingest_again(&env, "docs", "pages", &first.run_id).await;
    assert_eq!(second.state, RunState::Completed);

    let status = env.service.sync_status("docs").await.unwrap();
    assert_eq!(status.nodes, 2);
    assert_eq!(status.relationships, 1);

    let rows = env
        .service
        .graph_query("docs", "MATCH (p:Person) RETURN p.name", &BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(rows[0]["p.name"], json!("Ada"));
}

#[tokio::test]
async fn wildcard_paths_fan_out_into_one_edge_per_value() {
    let env = env();
    setup_docs(
        &env,
        json!([{ "id": "d1", "title": "T", "labels": ["graphs", "tutorial"] }]),
    );

    let run = ingest_and_wait(&env, "docs", "pages").await;
    assert_eq!(run.state, RunState::Completed);

    let status = env.service.sync_status("docs").await.unwrap();
    assert_eq!(status.nodes, 3);
    assert_eq!(status.relationships, 2);

    let rows = env
        .service
        .graph_query(
            "docs",
            "MATCH (d:Document)-[:DISCUSSES]->(t:Topic) RETURN t.name",
            &BTreeMap::new(),
        )
        .await
        .unwrap();
    let names: Vec<&Value> = rows.iter().map(|r| &r["t.name"]).collect();
    assert_eq!(names, vec![&json!("graphs"), &json!("tutorial")]);
}

#[tokio::test]
async fn mixed_empty_fanout_values_only_produce_real_edges() {
    let env = env();
    setup_docs(
        &env,
        json!([{ "id": "d1", "title": "T", "labels": ["graphs", "", null, "tutorial"] }]),
    );

    let run = ingest_and_wait(&env, "docs", "pages").await;
    assert_eq!(run.state, RunState::Completed);
    let status = env.service.sync_status("docs").await.unwrap();
    assert_eq!(status.relationships, 2);
}

#[tokio::test]
async fn semantic_search_finds_the_matching_chunk_owner() {
    let env = env();
    setup_docs(
        &env,
        json!([
            { "id": "d1", "title": "Intro to knowledge graphs" },
            { "id": "d2", "title": "Pancake recipes with syrup" }
        ]),
    );
    let run = ingest_and_wait(&env, "docs", "pages").await;
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.chunks_upserted, 2);

    let hits = env
        .service
        .semantic_search("docs", "knowledge graphs", 3, None)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert_eq!(hits[0].identity, NodeIdentity::new("Document", "d1"));
    assert!(hits[0].snippet.contains("knowledge graphs"));
    assert_eq!(hits[0].props["title"], json!("Intro to knowledge graphs"));

    // top_k larger than the chunk population returns what exists.
    let hits = env
        .service
        .semantic_search("docs", "knowledge graphs", 50, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);

    // Identical query, identical result set.
    let again = env
        .service
        .semantic_search("docs", "knowledge graphs", 50, None)
        .await
        .unwrap();
    assert_eq!(hits, again);
}

#[tokio::test]
async fn queries_and_search_are_tenant_scoped() {
    let env = env();
    setup_docs(
        &env,
        json!([{ "id": "d1", "title": "knowledge graphs", "author": { "email": "a@x", "name": "Ada" } }]),
    );
    ingest_and_wait(&env, "docs", "pages").await;

    // A second KB with identical labels in the same store.
    let mut other = docs_schema("hash:64");
    other["kb_id"] = json!("docs-b");
    other["mappings"]["sources"][0]["connector_url"] = json!("static://c/pages-b");
    env.service.register_schema(&other).unwrap();
    env.connector.stage(
        "static://c/pages-b",
        json!([{ "id": "b1", "title": "other tenant", "author": { "email": "b@y", "name": "Bob" } }]),
    );
    env.service
        .add_source("docs-b", "pages", "static://c/pages-b", None)
        .unwrap();
    ingest_and_wait(&env, "docs-b", "pages").await;

    let rows = env
        .service
        .graph_query(
            "docs",
            "MATCH (d:Document)-[:AUTHORED_BY]->(p:Person) RETURN d, p",
            &BTreeMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    for column in ["d", "p"] {
        assert_eq!(rows[0][column]["provenance"]["kb_id"], json!("docs"));
    }

    let hits = env
        .service
        .semantic_search("docs-b", "knowledge graphs", 10, None)
        .await
        .unwrap();
    assert!(hits
        .iter()
        .all(|hit| hit.identity != NodeIdentity::new("Document", "d1")));
}

// ============================================================================
// Boundary behaviors
// ============================================================================

#[tokio::test]
async fn empty_connector_response_completes_with_zero_counters() {
    let env = env();
    setup_docs(&env, json!([]));

    let run = ingest_and_wait(&env, "docs", "pages").await;
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.docs_processed, 0);
    assert_eq!(run.nodes_upserted, 0);
    assert_eq!(run.errors_total, 0);

    let status = env.service.sync_status("docs").await.unwrap();
    assert_eq!(status.nodes, 0);
}

#[tokio::test]
async fn documents_missing_the_key_are_skipped_and_recorded() {
    let env = env();
    setup_docs(
        &env,
        json!([{ "title": "keyless" }, { "id": "d2", "title": "fine" }]),
    );

    let run = ingest_and_wait(&env, "docs", "pages").await;
    assert_eq!(run.state, RunState::Completed);
    assert_eq!(run.docs_processed, 1);
    assert_eq!(run.errors_total, 1);
    assert!(run.errors[0].contains("key path"));

    let status = env.service.sync_status("docs").await.unwrap();
    assert_eq!(status.nodes, 1);
}

#[tokio::test]
async fn provider_dimension_change_orphans_old_chunks_until_reingest() {
    let env = env();
    setup_docs(&env, json!([{ "id": "d1", "title": "knowledge graphs" }]));
    let first = ingest_and_wait(&env, "docs", "pages").await;
    assert_eq!(first.state, RunState::Completed);
    assert_eq!(
        env.service
            .semantic_search("docs", "knowledge graphs", 5, None)
            .await
            .unwrap()
            .len(),
        1
    );

    // Re-register with a different dimension: a new index is provisioned
    // and the old chunks become unreachable to new searches.
    env.service.register_schema(&docs_schema("hash:32")).unwrap();
    let hits = env
        .service
        .semantic_search("docs", "knowledge graphs", 5, None)
        .await
        .unwrap();
    assert!(hits.is_empty());

    // Re-ingesting embeds at the new dimension.
    let second = ingest_again(&env, "docs", "pages", &first.run_id).await;
    assert_eq!(second.state, RunState::Completed);
    let hits = env
        .service
        .semantic_search("docs", "knowledge graphs", 5, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn read_only_discipline_holds_at_the_surface() {
    let env = env();
    setup_docs(&env, json!([{ "id": "d1", "title": "T" }]));
    ingest_and_wait(&env, "docs", "pages").await;

    let err = env
        .service
        .graph_query("docs", "MATCH (n) DETACH DELETE n", &BTreeMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "QueryNotReadOnly");

    let err = env
        .service
        .graph_query("docs", "MATCH (n RETURN n", &BTreeMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "QueryInvalid");
}

#[tokio::test]
async fn provenance_is_complete_on_everything_persisted() {
    let env = env();
    setup_docs(
        &env,
        json!([{ "id": "d1", "title": "T", "author": { "email": "a@x", "name": "Ada" } }]),
    );
    let run = ingest_and_wait(&env, "docs", "pages").await;

    let rows = env
        .service
        .graph_query("docs", "MATCH (d:Document) RETURN d", &BTreeMap::new())
        .await
        .unwrap();
    let provenance = &rows[0]["d"]["provenance"];
    assert_eq!(provenance["kb_id"], json!("docs"));
    assert_eq!(provenance["source_id"], json!("pages"));
    assert_eq!(provenance["run_id"], json!(run.run_id));
    assert!(provenance["updated_at"].as_str().is_some());
}

#[tokio::test]
async fn parameterized_queries_bind_at_the_surface() {
    let env = env();
    setup_docs(
        &env,
        json!([
            { "id": "d1", "title": "T", "author": { "email": "a@x", "name": "Ada" } },
            { "id": "d2", "title": "U", "author": { "email": "b@y", "name": "Bob" } }
        ]),
    );
    ingest_and_wait(&env, "docs", "pages").await;

    let params = BTreeMap::from([("author".to_string(), json!("Ada"))]);
    let rows = env
        .service
        .graph_query(
            "docs",
            "MATCH (d:Document)-[:AUTHORED_BY]->(p:Person) WHERE p.name = $author RETURN d.id",
            &params,
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["d.id"], json!("d1"));
}

// ============================================================================
// Run tracking, sweep, persistence
// ============================================================================

#[tokio::test]
async fn recent_runs_span_kbs_and_respect_the_limit() {
    let env = env();
    env.service.register_schema(&retail_schema()).unwrap();
    env.connector
        .stage("static://c/products", json!([{ "sku": "A", "name": "x" }]));
    env.service
        .add_source("retail-demo", "products", "static://c/products", None)
        .unwrap();
    setup_docs(&env, json!([{ "id": "d1", "title": "T" }]));

    let retail_run = ingest_and_wait(&env, "retail-demo", "products").await;
    let docs_run = ingest_and_wait(&env, "docs", "pages").await;

    let all = env.service.recent_runs(None, 10).await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].run_id, docs_run.run_id);
    assert_eq!(all[1].run_id, retail_run.run_id);

    let limited = env.service.recent_runs(None, 1).await.unwrap();
    assert_eq!(limited.len(), 1);

    let scoped = env.service.recent_runs(Some("retail-demo"), 10).await.unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].run_id, retail_run.run_id);
}

#[tokio::test]
async fn startup_sweep_fails_runs_orphaned_by_a_crash() {
    let graph = Arc::new(MemoryGraph::new());

    // A previous process died mid-run: its record persists as `running`.
    let orphan = RunRecord {
        run_id: "run-orphan".to_string(),
        kb_id: "docs".to_string(),
        source_id: "pages".to_string(),
        state: RunState::Running,
        started_at: chrono::Utc::now(),
        finished_at: None,
        docs_processed: 3,
        nodes_upserted: 3,
        edges_upserted: 0,
        chunks_upserted: 0,
        errors: Vec::new(),
        errors_total: 0,
        warnings: Vec::new(),
        last_error: None,
    };
    let props = match serde_json::to_value(&orphan).unwrap() {
        Value::Object(map) => map.into_iter().collect(),
        _ => unreachable!(),
    };
    graph
        .upsert_node(
            "docs",
            NodeUpsert::new(NodeIdentity::new("Run", "run-orphan"), "run_id", props),
            Provenance {
                kb_id: "docs".to_string(),
                source_id: "pages".to_string(),
                run_id: "run-orphan".to_string(),
                updated_at: chrono::Utc::now(),
            },
        )
        .await
        .unwrap();

    let env = env_on(graph);
    let swept = env.service.startup().await.unwrap();
    assert_eq!(swept, 1);

    let runs = env.service.recent_runs(Some("docs"), 10).await.unwrap();
    let swept_run = runs.iter().find(|r| r.run_id == "run-orphan").unwrap();
    assert_eq!(swept_run.state, RunState::Failed);
    assert_eq!(swept_run.last_error.as_deref(), Some("ProcessCrashed"));
}

#[tokio::test]
async fn materialized_data_survives_a_restart_via_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("graph.json");

    {
        let env = env_on(Arc::new(MemoryGraph::with_persistence(&path)));
        setup_docs(&env, json!([{ "id": "d1", "title": "knowledge graphs" }]));
        let run = ingest_and_wait(&env, "docs", "pages").await;
        assert_eq!(run.state, RunState::Completed);
        // The coordinator flushes in the background after each run; flush
        // once more so the snapshot is on disk before the "restart".
        env.graph.flush().await.unwrap();
    }

    let env = env_on(Arc::new(MemoryGraph::with_persistence(&path)));
    // Schemas are process state: re-register, but do not re-ingest.
    env.service.register_schema(&docs_schema("hash:64")).unwrap();
    env.service.startup().await.unwrap();

    let status = env.service.sync_status("docs").await.unwrap();
    assert_eq!(status.nodes, 1);
    let hits = env
        .service
        .semantic_search("docs", "knowledge graphs", 5, None)
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    // Run history survived too.
    let runs = env.service.recent_runs(Some("docs"), 10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].state, RunState::Completed);
}

#[tokio::test]
async fn surface_errors_carry_their_kinds() {
    let env = env();
    let err = env.service.ingest("ghost", "pages").await.unwrap_err();
    assert_eq!(err.kind(), "KbNotFound");

    env.service.register_schema(&docs_schema("hash:64")).unwrap();
    let err = env.service.ingest("docs", "ghost").await.unwrap_err();
    assert_eq!(err.kind(), "UnknownSource");

    let report = env.service.validate_schema(&json!({
        "kb_id": "docs",
        "nodes": [{ "label": "Document", "key_property": "uuid", "props": ["id"] }],
        "mappings": { "sources": [] }
    }));
    assert!(!report.is_valid());
    assert!(!env.service.cancel_run("no-such-run"));
}
