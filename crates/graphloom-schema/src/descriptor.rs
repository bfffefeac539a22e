//! Serde shapes of the raw schema JSON.
//!
//! These types are deliberately close to the wire format: no compiled path
//! expressions, no cross-reference resolution. [`crate::validate::compile`]
//! turns a descriptor into a [`crate::CompiledSchema`] after checking the
//! invariants.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Top-level per-KB schema document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SchemaDescriptor {
    /// Tenancy boundary. Non-empty.
    pub kb_id: String,
    /// Optional human-readable name for the KB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Embedding behavior; absent means the KB stores no chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingSpec>,
    /// Declared node labels.
    pub nodes: Vec<NodeDecl>,
    /// Declared relationship types.
    #[serde(default)]
    pub relationships: Vec<RelationshipDecl>,
    /// Source mappings.
    #[serde(default)]
    pub mappings: Mappings,
}

/// How node text becomes chunks and vectors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EmbeddingSpec {
    /// Opaque provider id, conventionally `"<family>:<model>"`.
    pub provider: String,
    /// Chunking strategy applied to the extracted node's text.
    pub chunking: ChunkingSpec,
}

/// Chunking strategies.
///
/// `max_tokens` bounds are approximate: token counting is whitespace-word
/// based throughout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ChunkingSpec {
    /// Concatenate the named fields in declared order; one chunk, split only
    /// when a `max_tokens` bound is present and exceeded.
    ByFields {
        fields: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_tokens: Option<usize>,
    },
    /// Split at markdown heading boundaries; oversize sections re-split at
    /// sentence boundaries.
    ByHeadings { max_tokens: usize },
    /// Sentence segmentation, greedily packed up to `max_tokens`.
    Sentence { max_tokens: usize },
    /// Blank-line segmentation, greedily packed up to `max_tokens`.
    Paragraph { max_tokens: usize },
}

/// A declared node label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct NodeDecl {
    pub label: String,
    /// Natural key; must appear in `props`.
    pub key_property: String,
    /// Allowed property names.
    pub props: Vec<String>,
}

/// A declared relationship type between two node labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RelationshipDecl {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub from_label: String,
    pub to_label: String,
}

/// Container for the per-source mappings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Mappings {
    #[serde(default)]
    pub sources: Vec<SourceMapping>,
}

/// How one source's documents become node and edge operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SourceMapping {
    /// Unique within the KB.
    pub source_id: String,
    /// Pull endpoint; scheme selects the connector implementation.
    pub connector_url: String,
    /// Opaque document-type tag, carried for operators.
    #[serde(default)]
    pub document_type: Option<String>,
    /// The node each document materializes.
    pub extract: ExtractSpec,
    /// Edges fanning out from the extracted node's document.
    #[serde(default)]
    pub edges: Vec<EdgeMapping>,
}

/// Target node of a source mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExtractSpec {
    /// Target node label.
    pub node: String,
    /// Path resolving the natural key. Scalar, required, non-empty.
    pub key: String,
    /// Property name → path expression.
    #[serde(default)]
    pub assign: BTreeMap<String, String>,
}

/// One edge family produced per document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EdgeMapping {
    #[serde(rename = "type")]
    pub rel_type: String,
    pub from: EndpointSpec,
    pub to: EndpointSpec,
}

/// One endpoint of an edge mapping.
///
/// Endpoints materialize their own node upserts so that edges never dangle,
/// even when this source is not authoritative over the endpoint label.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EndpointSpec {
    pub label: String,
    /// Key path. Scalar for `from`; scalar or multi (wildcard) for `to`.
    pub key: String,
    /// Extra properties materialized on the endpoint node.
    #[serde(default)]
    pub props: BTreeMap<String, String>,
}

impl SchemaDescriptor {
    /// Look up a declared node by label.
    pub fn node(&self, label: &str) -> Option<&NodeDecl> {
        self.nodes.iter().find(|n| n.label == label)
    }

    /// Look up a declared relationship by type.
    pub fn relationship(&self, rel_type: &str) -> Option<&RelationshipDecl> {
        self.relationships.iter().find(|r| r.rel_type == rel_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_round_trips_through_json() {
        let raw = serde_json::json!({
            "kb_id": "retail-demo",
            "embedding": {
                "provider": "hash:64",
                "chunking": { "strategy": "by_fields", "fields": ["name"] }
            },
            "nodes": [
                { "label": "Product", "key_property": "sku", "props": ["sku", "name"] }
            ],
            "relationships": [],
            "mappings": {
                "sources": [{
                    "source_id": "products",
                    "connector_url": "http://connector/products",
                    "extract": { "node": "Product", "key": "$.sku", "assign": { "name": "$.name" } }
                }]
            }
        });
        let descriptor: SchemaDescriptor = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(descriptor.kb_id, "retail-demo");
        assert_eq!(descriptor.nodes[0].key_property, "sku");
        assert_eq!(descriptor.mappings.sources.len(), 1);

        let back = serde_json::to_value(&descriptor).unwrap();
        let again: SchemaDescriptor = serde_json::from_value(back).unwrap();
        assert_eq!(descriptor, again);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = serde_json::json!({
            "kb_id": "kb",
            "nodes": [],
            "bogus": true
        });
        assert!(serde_json::from_value::<SchemaDescriptor>(raw).is_err());
    }

    #[test]
    fn chunking_spec_variants_parse() {
        let by_headings: ChunkingSpec =
            serde_json::from_value(serde_json::json!({ "strategy": "by_headings", "max_tokens": 256 }))
                .unwrap();
        assert_eq!(by_headings, ChunkingSpec::ByHeadings { max_tokens: 256 });

        let sentence: ChunkingSpec =
            serde_json::from_value(serde_json::json!({ "strategy": "sentence", "max_tokens": 128 }))
                .unwrap();
        assert!(matches!(sentence, ChunkingSpec::Sentence { max_tokens: 128 }));
    }
}
