//! Run lifecycle tracking.
//!
//! Every ingestion run is a `(kb_id, source_id, run_id)` tuple moving
//! through `starting → running → {completed | failed}`. The live record is
//! held in memory while the run progresses; state transitions are also
//! persisted into the graph store as `Run`-labeled records (with a
//! `PRODUCED_BY` edge to the KB anchor), so history survives restarts and a
//! startup sweep can fail whatever a dead process left `running`.

use crate::error::IngestError;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use graphloom_graph::{
    EdgeUpsert, GraphStore, NodeIdentity, NodeRecord, NodeUpsert, Provenance,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

pub type RunId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Starting,
    Running,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }
}

/// The full record of one run. Serialized verbatim into the `Run` node's
/// properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub kb_id: String,
    pub source_id: String,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub docs_processed: u64,
    pub nodes_upserted: u64,
    pub edges_upserted: u64,
    pub chunks_upserted: u64,
    /// Retained error messages, capped at the retention ceiling.
    #[serde(default)]
    pub errors: Vec<String>,
    /// Total errors observed, including those past the ceiling.
    pub errors_total: u64,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl RunRecord {
    fn new(kb_id: &str, source_id: &str, run_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            kb_id: kb_id.to_string(),
            source_id: source_id.to_string(),
            state: RunState::Starting,
            started_at: Utc::now(),
            finished_at: None,
            docs_processed: 0,
            nodes_upserted: 0,
            edges_upserted: 0,
            chunks_upserted: 0,
            errors: Vec::new(),
            errors_total: 0,
            warnings: Vec::new(),
            last_error: None,
        }
    }

    fn to_props(&self) -> BTreeMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }

    fn from_node(record: &NodeRecord) -> Option<Self> {
        let object: serde_json::Map<String, Value> =
            record.props.clone().into_iter().collect();
        serde_json::from_value(Value::Object(object)).ok()
    }
}

/// Per-KB aggregate view.
#[derive(Debug, Clone, Serialize)]
pub struct KbStatus {
    pub kb_id: String,
    pub nodes: u64,
    pub relationships: u64,
    /// When the KB last changed (the anchor node's provenance timestamp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub sources: Vec<SourceStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub last_run: RunRecord,
}

/// The tracker. In-memory records for live runs, graph-store persistence
/// for history.
pub struct RunTracker {
    graph: Arc<dyn GraphStore>,
    error_retention: usize,
    active: DashMap<RunId, Arc<RwLock<RunRecord>>>,
}

impl RunTracker {
    pub fn new(graph: Arc<dyn GraphStore>, error_retention: usize) -> Self {
        Self {
            graph,
            error_retention,
            active: DashMap::new(),
        }
    }

    /// Open a run record and persist it in `starting` state.
    pub async fn start(
        &self,
        kb_id: &str,
        source_id: &str,
        run_id: &str,
    ) -> Result<(), IngestError> {
        let record = RunRecord::new(kb_id, source_id, run_id);
        self.persist(&record).await?;
        self.active
            .insert(run_id.to_string(), Arc::new(RwLock::new(record)));
        info!(kb_id, source_id, run_id, "run started");
        Ok(())
    }

    pub async fn mark_running(&self, run_id: &str) -> Result<(), IngestError> {
        // The map guard must not live across the persist await.
        let record = {
            let Some(entry) = self.active.get(run_id) else {
                return Ok(());
            };
            let mut record = entry.write();
            record.state = RunState::Running;
            record.clone()
        };
        self.persist(&record).await
    }

    /// Fold one document's outcome into the counters.
    pub fn record_document(&self, run_id: &str, nodes: u64, edges: u64, chunks: u64) {
        if let Some(entry) = self.active.get(run_id) {
            let mut record = entry.write();
            record.docs_processed += 1;
            record.nodes_upserted += nodes;
            record.edges_upserted += edges;
            record.chunks_upserted += chunks;
        }
    }

    /// Append an error, or only count it once past the retention ceiling.
    pub fn record_error(&self, run_id: &str, message: String) {
        if let Some(entry) = self.active.get(run_id) {
            let mut record = entry.write();
            record.errors_total += 1;
            if record.errors.len() < self.error_retention {
                record.errors.push(message);
            }
        }
    }

    pub fn record_warning(&self, run_id: &str, message: String) {
        if let Some(entry) = self.active.get(run_id) {
            let mut record = entry.write();
            if record.warnings.len() < self.error_retention {
                record.warnings.push(message);
            }
        }
    }

    /// Close a run. Terminal; the record leaves the active table.
    pub async fn complete(
        &self,
        run_id: &str,
        outcome: Result<(), &IngestError>,
    ) -> Result<(), IngestError> {
        let Some((_, entry)) = self.active.remove(run_id) else {
            return Ok(());
        };
        let record = {
            let mut record = entry.write();
            record.finished_at = Some(Utc::now());
            match outcome {
                Ok(()) => record.state = RunState::Completed,
                Err(error) => {
                    record.state = RunState::Failed;
                    record.last_error = Some(format!("{}: {error}", error.kind()));
                }
            }
            record.clone()
        };
        match &record.state {
            RunState::Completed => info!(
                run_id,
                docs = record.docs_processed,
                nodes = record.nodes_upserted,
                edges = record.edges_upserted,
                "run completed"
            ),
            _ => warn!(run_id, error = record.last_error.as_deref(), "run failed"),
        }
        self.persist(&record).await
    }

    /// A live run's current record, if it is still active.
    pub fn active_run(&self, run_id: &str) -> Option<RunRecord> {
        self.active.get(run_id).map(|entry| entry.read().clone())
    }

    async fn persist(&self, record: &RunRecord) -> Result<(), IngestError> {
        let identity = NodeIdentity::new("Run", record.run_id.clone());
        let provenance = Provenance {
            kb_id: record.kb_id.clone(),
            source_id: record.source_id.clone(),
            run_id: record.run_id.clone(),
            updated_at: Utc::now(),
        };
        self.graph
            .upsert_node(
                &record.kb_id,
                NodeUpsert::new(identity.clone(), "run_id", record.to_props()),
                provenance.clone(),
            )
            .await?;
        self.graph
            .upsert_edge(
                &record.kb_id,
                EdgeUpsert {
                    rel_type: "PRODUCED_BY".to_string(),
                    from: identity,
                    to: NodeIdentity::new("KnowledgeBase", record.kb_id.clone()),
                    props: BTreeMap::new(),
                },
                provenance,
            )
            .await?;
        Ok(())
    }

    /// All runs for a KB: persisted history overlaid with live records.
    pub async fn runs_for_kb(&self, kb_id: &str) -> Result<Vec<RunRecord>, IngestError> {
        let mut by_id: BTreeMap<String, RunRecord> = BTreeMap::new();
        for node in self.graph.nodes_with_label(kb_id, "Run").await? {
            if let Some(record) = RunRecord::from_node(&node) {
                by_id.insert(record.run_id.clone(), record);
            }
        }
        for entry in self.active.iter() {
            let record = entry.value().read().clone();
            if record.kb_id == kb_id {
                by_id.insert(record.run_id.clone(), record);
            }
        }
        Ok(by_id.into_values().collect())
    }

    /// Aggregate status: counts plus the latest run per source.
    pub async fn status(&self, kb_id: &str) -> Result<KbStatus, IngestError> {
        let counts = self.graph.count(kb_id).await?;
        let anchor = self
            .graph
            .get_node(kb_id, &NodeIdentity::new("KnowledgeBase", kb_id))
            .await?;

        let mut latest: BTreeMap<String, RunRecord> = BTreeMap::new();
        for record in self.runs_for_kb(kb_id).await? {
            match latest.get(&record.source_id) {
                Some(existing) if existing.started_at >= record.started_at => {}
                _ => {
                    latest.insert(record.source_id.clone(), record);
                }
            }
        }

        Ok(KbStatus {
            kb_id: kb_id.to_string(),
            nodes: counts.nodes,
            relationships: counts.relationships,
            updated_at: anchor.map(|node| node.provenance.updated_at),
            sources: latest
                .into_iter()
                .map(|(source_id, last_run)| SourceStatus {
                    source_id,
                    last_run,
                })
                .collect(),
        })
    }

    /// Most recent runs across the given KBs, newest first.
    pub async fn recent_runs(
        &self,
        kb_ids: &[String],
        limit: usize,
    ) -> Result<Vec<RunRecord>, IngestError> {
        let mut runs = Vec::new();
        for kb_id in kb_ids {
            runs.extend(self.runs_for_kb(kb_id).await?);
        }
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    /// Startup sweep: fail whatever a dead process left non-terminal.
    pub async fn sweep_orphans(&self, kb_ids: &[String]) -> Result<usize, IngestError> {
        let mut swept = 0;
        for kb_id in kb_ids {
            for node in self.graph.nodes_with_label(kb_id, "Run").await? {
                let Some(mut record) = RunRecord::from_node(&node) else {
                    continue;
                };
                if record.state.is_terminal() || self.active.contains_key(&record.run_id) {
                    continue;
                }
                record.state = RunState::Failed;
                record.finished_at = Some(Utc::now());
                record.last_error = Some("ProcessCrashed".to_string());
                warn!(kb_id, run_id = %record.run_id, "orphaned run failed by startup sweep");
                self.persist(&record).await?;
                swept += 1;
            }
        }
        Ok(swept)
    }
}
