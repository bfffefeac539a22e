//! Layered schema validation and compilation.
//!
//! Validation runs in four layers, collecting *every* violation rather than
//! stopping at the first:
//!
//! 1. structural shape (serde deserialization plus non-empty identifiers),
//! 2. semantic cross-references (labels declared, properties allowed, keys
//!    present, source ids unique),
//! 3. path lexical validity (every expression compiles),
//! 4. PII heuristics over property names — warnings only, never fatal.
//!
//! A descriptor that passes layers 1–3 compiles into a [`CompiledSchema`]
//! whose path expressions are parsed exactly once; per-document evaluation
//! during ingestion never touches expression text again.

use crate::descriptor::{
    ChunkingSpec, EdgeMapping, EndpointSpec, SchemaDescriptor, SourceMapping,
};
use crate::paths::PathExpr;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;
use thiserror::Error;

/// Registration / validation failure.
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    /// The descriptor violated one or more invariants. Every detected issue
    /// is listed.
    #[error("schema invalid: {}", issues.join("; "))]
    Invalid { issues: Vec<String> },
}

/// Outcome of a dry-run validation.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    /// Fatal problems; empty means the schema would register.
    pub issues: Vec<String>,
    /// Soft findings (PII heuristics, suspicious chunking fields).
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.issues.is_empty()
    }
}

// ============================================================================
// Compiled forms
// ============================================================================

/// A registered schema with all path expressions pre-compiled.
#[derive(Debug, Clone)]
pub struct CompiledSchema {
    pub descriptor: SchemaDescriptor,
    /// Keyed by `source_id`.
    pub sources: BTreeMap<String, CompiledSource>,
}

impl CompiledSchema {
    pub fn kb_id(&self) -> &str {
        &self.descriptor.kb_id
    }

    pub fn source(&self, source_id: &str) -> Option<&CompiledSource> {
        self.sources.get(source_id)
    }
}

/// One source mapping with compiled paths and resolved key properties.
#[derive(Debug, Clone)]
pub struct CompiledSource {
    pub source_id: String,
    pub connector_url: String,
    /// Label of the extracted node.
    pub node_label: String,
    /// The extracted node's natural-key property name.
    pub node_key_property: String,
    /// Compiled key path (scalar, required).
    pub key: PathExpr,
    /// `(property name, compiled path)` in declared order.
    pub assign: Vec<(String, PathExpr)>,
    pub edges: Vec<CompiledEdge>,
}

/// One compiled edge family.
#[derive(Debug, Clone)]
pub struct CompiledEdge {
    pub rel_type: String,
    pub from: CompiledEndpoint,
    pub to: CompiledEndpoint,
}

/// One compiled edge endpoint.
#[derive(Debug, Clone)]
pub struct CompiledEndpoint {
    pub label: String,
    /// The endpoint label's natural-key property name.
    pub key_property: String,
    pub key: PathExpr,
    pub props: Vec<(String, PathExpr)>,
}

// ============================================================================
// Validation + compilation
// ============================================================================

/// Property-name fragments that trigger a PII warning.
const PII_HEURISTICS: &[&str] = &[
    "ssn",
    "social_security",
    "password",
    "passwd",
    "token",
    "secret",
    "api_key",
    "email",
    "phone",
    "dob",
    "date_of_birth",
    "credit_card",
];

fn pii_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let alternation = PII_HEURISTICS.join("|");
        Regex::new(&format!("(?i)(?:^|[_-])(?:{alternation})(?:$|[_-])")).expect("static pattern")
    })
}

/// Parse a raw JSON value into a descriptor, reporting shape problems as
/// issues instead of a serde error string dump.
pub fn parse_descriptor(raw: &Value) -> Result<SchemaDescriptor, SchemaError> {
    serde_json::from_value(raw.clone()).map_err(|e| SchemaError::Invalid {
        issues: vec![format!("descriptor shape: {e}")],
    })
}

/// Validate a descriptor without compiling. Collects issues and warnings.
pub fn validate_descriptor(descriptor: &SchemaDescriptor) -> ValidationReport {
    let mut report = ValidationReport::default();
    check_identifiers(descriptor, &mut report);
    check_cross_references(descriptor, &mut report);
    check_paths(descriptor, &mut report);
    check_pii(descriptor, &mut report);
    report
}

/// Validate a raw JSON value; shape errors become issues.
pub fn validate_value(raw: &Value) -> ValidationReport {
    match parse_descriptor(raw) {
        Ok(descriptor) => validate_descriptor(&descriptor),
        Err(SchemaError::Invalid { issues }) => ValidationReport {
            issues,
            warnings: Vec::new(),
        },
    }
}

/// Validate and compile. On success returns the compiled schema plus the soft
/// warnings; on failure returns every detected issue.
pub fn compile(descriptor: SchemaDescriptor) -> Result<(CompiledSchema, Vec<String>), SchemaError> {
    let report = validate_descriptor(&descriptor);
    if !report.is_valid() {
        return Err(SchemaError::Invalid {
            issues: report.issues,
        });
    }

    // Paths were proven parseable above, so compilation here cannot fail.
    let mut sources = BTreeMap::new();
    for source in &descriptor.mappings.sources {
        let node = descriptor
            .node(&source.extract.node)
            .expect("validated: extract node declared");
        let compiled = CompiledSource {
            source_id: source.source_id.clone(),
            connector_url: source.connector_url.clone(),
            node_label: node.label.clone(),
            node_key_property: node.key_property.clone(),
            key: PathExpr::parse(&source.extract.key).expect("validated path"),
            assign: source
                .extract
                .assign
                .iter()
                .map(|(prop, path)| (prop.clone(), PathExpr::parse(path).expect("validated path")))
                .collect(),
            edges: source
                .edges
                .iter()
                .map(|edge| compile_edge(&descriptor, edge))
                .collect(),
        };
        sources.insert(source.source_id.clone(), compiled);
    }

    Ok((
        CompiledSchema {
            descriptor,
            sources,
        },
        report.warnings,
    ))
}

fn compile_edge(descriptor: &SchemaDescriptor, edge: &EdgeMapping) -> CompiledEdge {
    CompiledEdge {
        rel_type: edge.rel_type.clone(),
        from: compile_endpoint(descriptor, &edge.from),
        to: compile_endpoint(descriptor, &edge.to),
    }
}

fn compile_endpoint(descriptor: &SchemaDescriptor, endpoint: &EndpointSpec) -> CompiledEndpoint {
    let node = descriptor
        .node(&endpoint.label)
        .expect("validated: endpoint label declared");
    CompiledEndpoint {
        label: endpoint.label.clone(),
        key_property: node.key_property.clone(),
        key: PathExpr::parse(&endpoint.key).expect("validated path"),
        props: endpoint
            .props
            .iter()
            .map(|(prop, path)| (prop.clone(), PathExpr::parse(path).expect("validated path")))
            .collect(),
    }
}

// ----------------------------------------------------------------------------
// Layer 1: identifiers
// ----------------------------------------------------------------------------

fn check_identifiers(descriptor: &SchemaDescriptor, report: &mut ValidationReport) {
    if descriptor.kb_id.trim().is_empty() {
        report.issues.push("kb_id must be non-empty".to_string());
    }

    let mut seen_labels = BTreeSet::new();
    for node in &descriptor.nodes {
        if node.label.trim().is_empty() {
            report.issues.push("node label must be non-empty".to_string());
            continue;
        }
        if !seen_labels.insert(node.label.as_str()) {
            report
                .issues
                .push(format!("node label `{}` declared more than once", node.label));
        }
        if node.key_property.trim().is_empty() {
            report
                .issues
                .push(format!("node `{}`: key_property must be non-empty", node.label));
        }
        let mut seen_props = BTreeSet::new();
        for prop in &node.props {
            if !seen_props.insert(prop.as_str()) {
                report.issues.push(format!(
                    "node `{}`: property `{}` listed more than once",
                    node.label, prop
                ));
            }
        }
    }

    let mut seen_rels = BTreeSet::new();
    for rel in &descriptor.relationships {
        if rel.rel_type.trim().is_empty() {
            report
                .issues
                .push("relationship type must be non-empty".to_string());
        } else if !seen_rels.insert(rel.rel_type.as_str()) {
            report.issues.push(format!(
                "relationship type `{}` declared more than once",
                rel.rel_type
            ));
        }
    }

    if let Some(embedding) = &descriptor.embedding {
        if embedding.provider.trim().is_empty() {
            report
                .issues
                .push("embedding.provider must be non-empty".to_string());
        }
        if let ChunkingSpec::ByFields { fields, .. } = &embedding.chunking {
            if fields.is_empty() {
                report
                    .issues
                    .push("by_fields chunking requires at least one field".to_string());
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Layer 2: cross-references
// ----------------------------------------------------------------------------

fn check_cross_references(descriptor: &SchemaDescriptor, report: &mut ValidationReport) {
    for node in &descriptor.nodes {
        if !node.props.iter().any(|p| p == &node.key_property) {
            report.issues.push(format!(
                "node `{}`: key_property `{}` is not listed in props",
                node.label, node.key_property
            ));
        }
    }

    for rel in &descriptor.relationships {
        for (side, label) in [("from", &rel.from_label), ("to", &rel.to_label)] {
            if descriptor.node(label).is_none() {
                report.issues.push(format!(
                    "relationship `{}`: {side}_label `{label}` is not a declared node",
                    rel.rel_type
                ));
            }
        }
    }

    let mut seen_sources = BTreeSet::new();
    for source in &descriptor.mappings.sources {
        if source.source_id.trim().is_empty() {
            report.issues.push("source_id must be non-empty".to_string());
        } else if !seen_sources.insert(source.source_id.as_str()) {
            report.issues.push(format!(
                "source_id `{}` declared more than once",
                source.source_id
            ));
        }
        if source.connector_url.trim().is_empty() {
            report.issues.push(format!(
                "source `{}`: connector_url must be non-empty",
                source.source_id
            ));
        }
        check_source_refs(descriptor, source, report);
    }
}

fn check_source_refs(
    descriptor: &SchemaDescriptor,
    source: &SourceMapping,
    report: &mut ValidationReport,
) {
    match descriptor.node(&source.extract.node) {
        None => report.issues.push(format!(
            "source `{}`: extract node `{}` is not a declared node",
            source.source_id, source.extract.node
        )),
        Some(node) => {
            for prop in source.extract.assign.keys() {
                if !node.props.iter().any(|p| p == prop) {
                    report.issues.push(format!(
                        "source `{}`: assigned property `{}` is not declared on node `{}`",
                        source.source_id, prop, node.label
                    ));
                }
            }
        }
    }

    for edge in &source.edges {
        let declared = descriptor.relationship(&edge.rel_type);
        if declared.is_none() {
            report.issues.push(format!(
                "source `{}`: edge type `{}` is not a declared relationship",
                source.source_id, edge.rel_type
            ));
        }
        for (side, endpoint) in [("from", &edge.from), ("to", &edge.to)] {
            match descriptor.node(&endpoint.label) {
                None => report.issues.push(format!(
                    "source `{}`: edge `{}` {side} label `{}` is not a declared node",
                    source.source_id, edge.rel_type, endpoint.label
                )),
                Some(node) => {
                    for prop in endpoint.props.keys() {
                        if !node.props.iter().any(|p| p == prop) {
                            report.issues.push(format!(
                                "source `{}`: edge `{}` {side} property `{}` is not declared on node `{}`",
                                source.source_id, edge.rel_type, prop, node.label
                            ));
                        }
                    }
                }
            }
            if let Some(rel) = declared {
                let expected = if side == "from" {
                    &rel.from_label
                } else {
                    &rel.to_label
                };
                if expected != &endpoint.label {
                    report.issues.push(format!(
                        "source `{}`: edge `{}` {side} label `{}` does not match the declared `{}`",
                        source.source_id, edge.rel_type, endpoint.label, expected
                    ));
                }
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Layer 3: path lexical validity
// ----------------------------------------------------------------------------

fn check_paths(descriptor: &SchemaDescriptor, report: &mut ValidationReport) {
    let mut check = |context: String, path: &str| {
        if let Err(e) = PathExpr::parse(path) {
            report.issues.push(format!("{context}: {e}"));
        }
    };

    for source in &descriptor.mappings.sources {
        let sid = &source.source_id;
        check(format!("source `{sid}` extract key"), &source.extract.key);
        for (prop, path) in &source.extract.assign {
            check(format!("source `{sid}` assign `{prop}`"), path);
        }
        for edge in &source.edges {
            let rel = &edge.rel_type;
            check(format!("source `{sid}` edge `{rel}` from key"), &edge.from.key);
            check(format!("source `{sid}` edge `{rel}` to key"), &edge.to.key);
            for (prop, path) in &edge.from.props {
                check(format!("source `{sid}` edge `{rel}` from `{prop}`"), path);
            }
            for (prop, path) in &edge.to.props {
                check(format!("source `{sid}` edge `{rel}` to `{prop}`"), path);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Layer 4: PII heuristics (warnings only)
// ----------------------------------------------------------------------------

fn check_pii(descriptor: &SchemaDescriptor, report: &mut ValidationReport) {
    let re = pii_regex();
    // Pad with separators so the boundary-anchored pattern also matches
    // whole-name hits like "email".
    let hit = |name: &str| re.is_match(&format!("_{name}_"));

    for node in &descriptor.nodes {
        for prop in &node.props {
            if hit(prop) {
                report.warnings.push(format!(
                    "node `{}`: property `{}` matches a PII heuristic",
                    node.label, prop
                ));
            }
        }
    }
}
