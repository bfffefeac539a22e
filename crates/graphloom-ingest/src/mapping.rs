//! The mapping engine: one document in, a canonical batch of operations out.
//!
//! The engine is pure. It never talks to the store or the embedder; its
//! output is consumed by the coordinator. For one document it produces:
//!
//! 1. a node upsert for the source's extract node (key required),
//! 2. per edge mapping: endpoint node upserts for both sides, then the edge
//!    upserts — one per match when the `to` path fans out over an array,
//! 3. the chunk texts destined for embedding, when the schema embeds.
//!
//! Within the batch, node upserts to the same identity are merged, so the
//! operation set is deterministic and minimal.

use crate::error::DocumentMappingError;
use graphloom_embed::chunker;
use graphloom_graph::{EdgeUpsert, NodeIdentity, NodeUpsert};
use graphloom_schema::validate::{CompiledEndpoint, CompiledSchema, CompiledSource};
use serde_json::Value;
use std::collections::BTreeMap;

/// Operations for one document, in application order: nodes, then edges,
/// then chunk replacement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentOps {
    pub nodes: Vec<NodeUpsert>,
    pub edges: Vec<EdgeUpsert>,
    pub chunks: Option<ChunkPlan>,
    /// Non-fatal findings (skipped edges), recorded on the run.
    pub warnings: Vec<String>,
}

/// Chunk texts for the extract node; vectors are attached later by the
/// coordinator.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub owner: NodeIdentity,
    pub texts: Vec<String>,
}

/// Coerce a path match into a node key. Strings pass through (empty is
/// unusable), numbers and booleans render, composites and null do not key.
fn key_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn merge_node(nodes: &mut Vec<NodeUpsert>, upsert: NodeUpsert) {
    if let Some(existing) = nodes.iter_mut().find(|n| n.identity == upsert.identity) {
        existing.props.extend(upsert.props);
    } else {
        nodes.push(upsert);
    }
}

fn merge_edge(edges: &mut Vec<EdgeUpsert>, upsert: EdgeUpsert) {
    let duplicate = edges.iter().any(|e| {
        e.rel_type == upsert.rel_type && e.from == upsert.from && e.to == upsert.to
    });
    if !duplicate {
        edges.push(upsert);
    }
}

fn endpoint_props(endpoint: &CompiledEndpoint, doc: &Value) -> BTreeMap<String, Value> {
    let mut props = BTreeMap::new();
    for (prop, path) in &endpoint.props {
        if let Some(value) = path.eval_scalar(doc) {
            props.insert(prop.clone(), value.clone());
        }
    }
    props
}

/// Apply one source mapping to one document.
pub fn apply_mapping(
    schema: &CompiledSchema,
    source: &CompiledSource,
    doc: &Value,
) -> Result<DocumentOps, DocumentMappingError> {
    let key = key_string(source.key.eval_scalar(doc)).ok_or_else(|| {
        DocumentMappingError::MissingKey {
            path: source.key.source().to_string(),
        }
    })?;

    let mut ops = DocumentOps::default();

    // Extract node. The key property is materialized so the chunker (and
    // the store) see the complete property map.
    let mut props = BTreeMap::new();
    for (prop, path) in &source.assign {
        if let Some(value) = path.eval_scalar(doc) {
            props.insert(prop.clone(), value.clone());
        }
    }
    props.insert(
        source.node_key_property.clone(),
        Value::String(key.clone()),
    );
    let owner = NodeIdentity::new(source.node_label.clone(), key);
    merge_node(
        &mut ops.nodes,
        NodeUpsert::new(owner.clone(), source.node_key_property.clone(), props.clone()),
    );

    // Edges. A missing `from` key skips the edge with a warning; empty
    // entries in a fanned-out `to` are silently skipped.
    for edge in &source.edges {
        let Some(from_key) = key_string(edge.from.key.eval_scalar(doc)) else {
            ops.warnings.push(format!(
                "edge `{}`: from path `{}` selected no value, edge skipped",
                edge.rel_type,
                edge.from.key.source()
            ));
            continue;
        };
        let from_identity = NodeIdentity::new(edge.from.label.clone(), from_key);
        let from_props = endpoint_props(&edge.from, doc);

        let to_values: Vec<Option<String>> = if edge.to.key.has_wildcard() {
            edge.to
                .key
                .eval_multi(doc)
                .into_iter()
                .map(|v| key_string(Some(v)))
                .collect()
        } else {
            vec![key_string(edge.to.key.eval_scalar(doc))]
        };

        for to_key in to_values.into_iter().flatten() {
            let to_identity = NodeIdentity::new(edge.to.label.clone(), to_key);

            merge_node(
                &mut ops.nodes,
                NodeUpsert::new(
                    from_identity.clone(),
                    edge.from.key_property.clone(),
                    from_props.clone(),
                ),
            );
            merge_node(
                &mut ops.nodes,
                NodeUpsert::new(
                    to_identity.clone(),
                    edge.to.key_property.clone(),
                    endpoint_props(&edge.to, doc),
                ),
            );
            merge_edge(
                &mut ops.edges,
                EdgeUpsert {
                    rel_type: edge.rel_type.clone(),
                    from: from_identity.clone(),
                    to: to_identity,
                    props: BTreeMap::new(),
                },
            );
        }
    }

    // Chunk text, when the schema embeds and the strategy selects anything.
    if let Some(embedding) = &schema.descriptor.embedding {
        let texts = chunker::chunk_text(&embedding.chunking, &props);
        if !texts.is_empty() {
            ops.chunks = Some(ChunkPlan { owner, texts });
        }
    }

    Ok(ops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphloom_schema::validate::compile;
    use graphloom_schema::SchemaDescriptor;
    use proptest::prelude::*;
    use serde_json::json;

    fn docs_schema() -> CompiledSchema {
        let raw = json!({
            "kb_id": "docs",
            "embedding": {
                "provider": "hash:32",
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
                    "connector_url": "static://pages",
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
        });
        let descriptor: SchemaDescriptor = serde_json::from_value(raw).unwrap();
        compile(descriptor).unwrap().0
    }

    fn map(doc: Value) -> Result<DocumentOps, DocumentMappingError> {
        let schema = docs_schema();
        let source = schema.source("pages").unwrap();
        apply_mapping(&schema, source, &doc)
    }

    #[test]
    fn extract_node_and_authored_edge() {
        let ops = map(json!({
            "id": "d1",
            "title": "T",
            "author": { "email": "a@x", "name": "Ada" }
        }))
        .unwrap();

        assert_eq!(ops.nodes.len(), 2);
        assert_eq!(ops.nodes[0].identity, NodeIdentity::new("Document", "d1"));
        assert_eq!(ops.nodes[0].props["title"], json!("T"));
        assert_eq!(ops.nodes[0].props["id"], json!("d1"));
        assert_eq!(ops.nodes[1].identity, NodeIdentity::new("Person", "a@x"));
        assert_eq!(ops.nodes[1].props["name"], json!("Ada"));

        assert_eq!(ops.edges.len(), 1);
        assert_eq!(ops.edges[0].rel_type, "AUTHORED_BY");
        assert!(ops.warnings.is_empty());
    }

    #[test]
    fn missing_key_is_the_only_fatal_case() {
        for doc in [
            json!({ "title": "no id" }),
            json!({ "id": null }),
            json!({ "id": "" }),
            json!({ "id": ["composite"] }),
        ] {
            let err = map(doc).unwrap_err();
            assert!(matches!(err, DocumentMappingError::MissingKey { .. }));
        }
        // Numeric keys coerce.
        let ops = map(json!({ "id": 41 })).unwrap();
        assert_eq!(ops.nodes[0].identity.key, "41");
    }

    #[test]
    fn missing_scalar_to_key_produces_no_edge_and_no_warning() {
        let ops = map(json!({ "id": "d1", "title": "T" })).unwrap();
        assert_eq!(ops.edges.len(), 0);
        assert_eq!(ops.nodes.len(), 1);
        assert!(ops.warnings.is_empty());
    }

    #[test]
    fn missing_from_key_skips_edge_with_warning() {
        let raw = json!({
            "kb_id": "refs",
            "nodes": [
                { "label": "Doc", "key_property": "id", "props": ["id"] },
                { "label": "Ref", "key_property": "id", "props": ["id"] }
            ],
            "relationships": [
                { "type": "REFERENCES", "from_label": "Doc", "to_label": "Ref" }
            ],
            "mappings": {
                "sources": [{
                    "source_id": "refs",
                    "connector_url": "static://refs",
                    "extract": { "node": "Doc", "key": "$.id" },
                    "edges": [{
                        "type": "REFERENCES",
                        "from": { "label": "Doc", "key": "$.source.id" },
                        "to": { "label": "Ref", "key": "$.target" }
                    }]
                }]
            }
        });
        let descriptor: SchemaDescriptor = serde_json::from_value(raw).unwrap();
        let schema = compile(descriptor).unwrap().0;
        let source = schema.source("refs").unwrap();

        // `from` resolves to nothing even though `to` would: the edge is
        // skipped and the run hears about it.
        let ops =
            apply_mapping(&schema, source, &json!({ "id": "d1", "target": "r9" })).unwrap();
        assert_eq!(ops.edges.len(), 0);
        assert_eq!(ops.nodes.len(), 1);
        assert_eq!(ops.warnings.len(), 1);
        assert!(ops.warnings[0].contains("REFERENCES"));
    }

    #[test]
    fn multi_valued_to_path_fans_out() {
        let ops = map(json!({
            "id": "d1",
            "labels": ["graphs", "tutorial"]
        }))
        .unwrap();

        let discusses: Vec<_> = ops
            .edges
            .iter()
            .filter(|e| e.rel_type == "DISCUSSES")
            .collect();
        assert_eq!(discusses.len(), 2);
        assert_eq!(discusses[0].to, NodeIdentity::new("Topic", "graphs"));
        assert_eq!(discusses[1].to, NodeIdentity::new("Topic", "tutorial"));
        // One Document + two Topic upserts.
        assert_eq!(ops.nodes.len(), 3);
    }

    #[test]
    fn empty_fanout_entries_are_skipped() {
        let ops = map(json!({
            "id": "d1",
            "labels": ["graphs", "", null, "tutorial"]
        }))
        .unwrap();
        let discusses: Vec<_> = ops
            .edges
            .iter()
            .filter(|e| e.rel_type == "DISCUSSES")
            .collect();
        assert_eq!(discusses.len(), 2);
    }

    #[test]
    fn duplicate_endpoints_merge_within_a_document() {
        let ops = map(json!({
            "id": "d1",
            "labels": ["graphs", "graphs"]
        }))
        .unwrap();
        // Same topic twice: one node upsert, one edge.
        assert_eq!(ops.nodes.len(), 2);
        assert_eq!(ops.edges.len(), 1);
    }

    #[test]
    fn chunk_plan_follows_the_embedding_spec() {
        let ops = map(json!({ "id": "d1", "title": "Intro to graphs" })).unwrap();
        let plan = ops.chunks.unwrap();
        assert_eq!(plan.owner, NodeIdentity::new("Document", "d1"));
        assert_eq!(plan.texts, vec!["Intro to graphs"]);

        // No text selected, no chunk op.
        let ops = map(json!({ "id": "d2" })).unwrap();
        assert!(ops.chunks.is_none());
    }

    #[test]
    fn mapping_is_deterministic() {
        let doc = json!({
            "id": "d1",
            "title": "T",
            "author": { "email": "a@x", "name": "Ada" },
            "labels": ["x", "y"]
        });
        assert_eq!(map(doc.clone()).unwrap(), map(doc).unwrap());
    }

    fn arb_json(depth: u32) -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[a-zA-Z0-9@. ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(depth, 48, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..5)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    proptest! {
        /// Mapping totality: for a schema that validates, any JSON document
        /// either maps or reports a `DocumentMappingError`; it never panics.
        #[test]
        fn mapping_never_panics(doc in arb_json(3)) {
            let schema = docs_schema();
            let source = schema.source("pages").unwrap();
            let _ = apply_mapping(&schema, source, &doc);
        }
    }
}
