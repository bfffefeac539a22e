//! A small read-only pattern query language.
//!
//! The surface is Cypher-shaped but deliberately tiny:
//!
//! ```text
//! MATCH (d:Document)-[:AUTHORED_BY]->(p:Person), (d)-[:DISCUSSES]->(t)
//! WHERE p.name = $author AND t.name = "graphs"
//! RETURN d, p.name
//! LIMIT 10
//! ```
//!
//! - node patterns: `(var)`, `(:Label)`, `(var:Label)`, `(var:Label {prop: term})`
//! - edges: `-[:TYPE]->`, `-->` (directed only)
//! - predicates: conjunctions of `var.prop = term`
//! - terms: string / number / boolean / null literals and `$param` bindings
//! - `RETURN` items: a variable (the whole node) or `var.prop`
//!
//! Everything is parsed by a hand-written scanner; there is no mutating form
//! in the grammar, and mutating keywords are rejected before parsing so the
//! error is [`GraphError::QueryNotReadOnly`] rather than a syntax error.
//!
//! Execution is a backtracking pattern join over one KB's store, so a result
//! row can only ever contain that KB's entities.

use crate::error::GraphError;
use crate::memory::KbState;
use crate::types::{EdgeKey, NodeIdentity, Row};
use serde_json::{json, Value};
use std::collections::BTreeMap;

// ============================================================================
// Lexer
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Param(String),
    Str(String),
    Int(i64),
    Float(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Colon,
    Comma,
    Dot,
    Eq,
    Dash,
    Gt,
}

const MUTATING_KEYWORDS: &[&str] = &[
    "CREATE", "MERGE", "DELETE", "DETACH", "SET", "REMOVE", "DROP", "LOAD", "CALL", "FOREACH",
];

fn lex(input: &str) -> Result<Vec<Token>, GraphError> {
    let mut tokens = Vec::new();
    let bytes = input.as_bytes();
    let mut pos = 0;
    while pos < bytes.len() {
        let b = bytes[pos];
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => pos += 1,
            b'(' => {
                tokens.push(Token::LParen);
                pos += 1;
            }
            b')' => {
                tokens.push(Token::RParen);
                pos += 1;
            }
            b'[' => {
                tokens.push(Token::LBracket);
                pos += 1;
            }
            b']' => {
                tokens.push(Token::RBracket);
                pos += 1;
            }
            b'{' => {
                tokens.push(Token::LBrace);
                pos += 1;
            }
            b'}' => {
                tokens.push(Token::RBrace);
                pos += 1;
            }
            b':' => {
                tokens.push(Token::Colon);
                pos += 1;
            }
            b',' => {
                tokens.push(Token::Comma);
                pos += 1;
            }
            b'.' => {
                tokens.push(Token::Dot);
                pos += 1;
            }
            b'=' => {
                tokens.push(Token::Eq);
                pos += 1;
            }
            b'-' => {
                tokens.push(Token::Dash);
                pos += 1;
            }
            b'>' => {
                tokens.push(Token::Gt);
                pos += 1;
            }
            b'$' => {
                let start = pos + 1;
                let mut end = start;
                while end < bytes.len() && is_ident_byte(bytes[end]) {
                    end += 1;
                }
                if end == start {
                    return Err(GraphError::QueryInvalid(format!(
                        "expected parameter name after `$` at byte {pos}"
                    )));
                }
                tokens.push(Token::Param(input[start..end].to_string()));
                pos = end;
            }
            b'\'' | b'"' => {
                let quote = b;
                let mut end = pos + 1;
                let mut text = String::new();
                loop {
                    if end >= bytes.len() {
                        return Err(GraphError::QueryInvalid(format!(
                            "unterminated string starting at byte {pos}"
                        )));
                    }
                    if bytes[end] == b'\\' && end + 1 < bytes.len() {
                        text.push(bytes[end + 1] as char);
                        end += 2;
                        continue;
                    }
                    if bytes[end] == quote {
                        break;
                    }
                    text.push(bytes[end] as char);
                    end += 1;
                }
                tokens.push(Token::Str(text));
                pos = end + 1;
            }
            b'0'..=b'9' => {
                let start = pos;
                let mut end = pos;
                let mut is_float = false;
                while end < bytes.len()
                    && (bytes[end].is_ascii_digit() || (bytes[end] == b'.' && !is_float))
                {
                    // A `.` must be followed by a digit to belong to the
                    // number; otherwise it is member access.
                    if bytes[end] == b'.' {
                        if end + 1 < bytes.len() && bytes[end + 1].is_ascii_digit() {
                            is_float = true;
                        } else {
                            break;
                        }
                    }
                    end += 1;
                }
                let text = &input[start..end];
                if is_float {
                    tokens.push(Token::Float(text.parse().map_err(|_| {
                        GraphError::QueryInvalid(format!("bad number `{text}`"))
                    })?));
                } else {
                    tokens.push(Token::Int(text.parse().map_err(|_| {
                        GraphError::QueryInvalid(format!("bad number `{text}`"))
                    })?));
                }
                pos = end;
            }
            _ if is_ident_start(b) => {
                let start = pos;
                let mut end = pos;
                while end < bytes.len() && is_ident_byte(bytes[end]) {
                    end += 1;
                }
                tokens.push(Token::Ident(input[start..end].to_string()));
                pos = end;
            }
            other => {
                return Err(GraphError::QueryInvalid(format!(
                    "unexpected character `{}` at byte {pos}",
                    other as char
                )));
            }
        }
    }
    Ok(tokens)
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Reject mutating keywords wherever they appear in statement position.
/// Identifiers in label/type position (after `:`), property-key position
/// (before `:`), or member position (after `.`) are exempt.
fn check_read_only(tokens: &[Token]) -> Result<(), GraphError> {
    for (i, token) in tokens.iter().enumerate() {
        let Token::Ident(word) = token else { continue };
        let upper = word.to_ascii_uppercase();
        if !MUTATING_KEYWORDS.contains(&upper.as_str()) {
            continue;
        }
        let after_dot_or_colon = i > 0 && matches!(tokens[i - 1], Token::Dot | Token::Colon);
        let before_colon = matches!(tokens.get(i + 1), Some(Token::Colon));
        if !after_dot_or_colon && !before_colon {
            return Err(GraphError::QueryNotReadOnly(format!(
                "`{word}` is not permitted"
            )));
        }
    }
    Ok(())
}

// ============================================================================
// AST and parser
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Term {
    Literal(Value),
    Param(String),
}

#[derive(Debug, Clone, Default)]
struct NodeConstraint {
    labels: Vec<String>,
    props: Vec<(String, Term)>,
}

#[derive(Debug, Clone)]
struct EdgeConstraint {
    from: String,
    rel_type: Option<String>,
    to: String,
}

#[derive(Debug, Clone, PartialEq)]
enum ReturnItem {
    Var(String),
    Prop(String, String),
}

#[derive(Debug, Default)]
struct Query {
    nodes: BTreeMap<String, NodeConstraint>,
    var_order: Vec<String>,
    edges: Vec<EdgeConstraint>,
    predicates: Vec<(String, String, Term)>,
    returns: Vec<ReturnItem>,
    limit: Option<usize>,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    anon_counter: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token, context: &str) -> Result<(), GraphError> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            other => Err(GraphError::QueryInvalid(format!(
                "expected {expected:?} {context}, found {other:?}"
            ))),
        }
    }

    fn keyword(&mut self, word: &str) -> bool {
        if let Some(Token::Ident(ident)) = self.peek() {
            if ident.eq_ignore_ascii_case(word) {
                self.pos += 1;
                return true;
            }
        }
        false
    }

    fn ident(&mut self, context: &str) -> Result<String, GraphError> {
        match self.next() {
            Some(Token::Ident(ident)) => Ok(ident),
            other => Err(GraphError::QueryInvalid(format!(
                "expected identifier {context}, found {other:?}"
            ))),
        }
    }

    fn parse(mut self) -> Result<Query, GraphError> {
        let mut query = Query::default();

        if !self.keyword("MATCH") {
            return Err(GraphError::QueryInvalid(
                "query must begin with MATCH".to_string(),
            ));
        }
        loop {
            self.parse_pattern(&mut query)?;
            if !matches!(self.peek(), Some(Token::Comma)) {
                break;
            }
            self.pos += 1;
        }

        if self.keyword("WHERE") {
            loop {
                let var = self.ident("in predicate")?;
                self.expect(&Token::Dot, "in predicate")?;
                let prop = self.ident("after `.`")?;
                self.expect(&Token::Eq, "in predicate")?;
                let term = self.parse_term()?;
                query.predicates.push((var, prop, term));
                if !self.keyword("AND") {
                    break;
                }
            }
        }

        if !self.keyword("RETURN") {
            return Err(GraphError::QueryInvalid(
                "query must have a RETURN clause".to_string(),
            ));
        }
        loop {
            let var = self.ident("in RETURN")?;
            if matches!(self.peek(), Some(Token::Dot)) {
                self.pos += 1;
                let prop = self.ident("after `.` in RETURN")?;
                query.returns.push(ReturnItem::Prop(var, prop));
            } else {
                query.returns.push(ReturnItem::Var(var));
            }
            if !matches!(self.peek(), Some(Token::Comma)) {
                break;
            }
            self.pos += 1;
        }

        if self.keyword("LIMIT") {
            match self.next() {
                Some(Token::Int(n)) if n >= 0 => query.limit = Some(n as usize),
                other => {
                    return Err(GraphError::QueryInvalid(format!(
                        "LIMIT expects a non-negative integer, found {other:?}"
                    )))
                }
            }
        }

        if let Some(extra) = self.peek() {
            return Err(GraphError::QueryInvalid(format!(
                "unexpected trailing input: {extra:?}"
            )));
        }

        // RETURN and WHERE may only reference pattern variables.
        for item in &query.returns {
            let (ReturnItem::Var(var) | ReturnItem::Prop(var, _)) = item;
            if !query.nodes.contains_key(var) {
                return Err(GraphError::QueryInvalid(format!(
                    "RETURN references unknown variable `{var}`"
                )));
            }
        }
        for (var, _, _) in &query.predicates {
            if !query.nodes.contains_key(var) {
                return Err(GraphError::QueryInvalid(format!(
                    "WHERE references unknown variable `{var}`"
                )));
            }
        }

        Ok(query)
    }

    fn parse_pattern(&mut self, query: &mut Query) -> Result<(), GraphError> {
        let mut current = self.parse_node(query)?;
        while matches!(self.peek(), Some(Token::Dash)) {
            let rel_type = self.parse_edge()?;
            let target = self.parse_node(query)?;
            query.edges.push(EdgeConstraint {
                from: current,
                rel_type,
                to: target.clone(),
            });
            current = target;
        }
        Ok(())
    }

    fn parse_node(&mut self, query: &mut Query) -> Result<String, GraphError> {
        self.expect(&Token::LParen, "to open a node pattern")?;

        let var = if let Some(Token::Ident(_)) = self.peek() {
            self.ident("")?
        } else {
            self.anon_counter += 1;
            format!("#anon{}", self.anon_counter)
        };

        let constraint = query.nodes.entry(var.clone()).or_default();
        if !query.var_order.contains(&var) {
            query.var_order.push(var.clone());
        }

        if matches!(self.peek(), Some(Token::Colon)) {
            self.pos += 1;
            let label = self.ident("after `:` in node pattern")?;
            if !constraint.labels.contains(&label) {
                constraint.labels.push(label);
            }
        }

        if matches!(self.peek(), Some(Token::LBrace)) {
            self.pos += 1;
            loop {
                let prop = self.ident("as property key")?;
                self.expect(&Token::Colon, "after property key")?;
                let term = self.parse_term()?;
                constraint.props.push((prop, term));
                if !matches!(self.peek(), Some(Token::Comma)) {
                    break;
                }
                self.pos += 1;
            }
            self.expect(&Token::RBrace, "to close property map")?;
        }

        self.expect(&Token::RParen, "to close node pattern")?;
        Ok(var)
    }

    /// `-[:TYPE]->`, `-[r:TYPE]->`, or `-->`. The edge variable, when
    /// present, is accepted and ignored.
    fn parse_edge(&mut self) -> Result<Option<String>, GraphError> {
        self.expect(&Token::Dash, "to open an edge")?;
        let rel_type = if matches!(self.peek(), Some(Token::LBracket)) {
            self.pos += 1;
            if let Some(Token::Ident(_)) = self.peek() {
                self.pos += 1;
            }
            let rel_type = if matches!(self.peek(), Some(Token::Colon)) {
                self.pos += 1;
                Some(self.ident("after `:` in edge pattern")?)
            } else {
                None
            };
            self.expect(&Token::RBracket, "to close edge pattern")?;
            rel_type
        } else {
            None
        };
        self.expect(&Token::Dash, "before `>`")?;
        self.expect(&Token::Gt, "(only directed edges are supported)")?;
        Ok(rel_type)
    }

    fn parse_term(&mut self) -> Result<Term, GraphError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Term::Literal(Value::String(s))),
            Some(Token::Int(n)) => Ok(Term::Literal(json!(n))),
            Some(Token::Float(f)) => Ok(Term::Literal(json!(f))),
            Some(Token::Param(name)) => Ok(Term::Param(name)),
            Some(Token::Dash) => match self.next() {
                Some(Token::Int(n)) => Ok(Term::Literal(json!(-n))),
                Some(Token::Float(f)) => Ok(Term::Literal(json!(-f))),
                other => Err(GraphError::QueryInvalid(format!(
                    "expected number after `-`, found {other:?}"
                ))),
            },
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("true") => {
                Ok(Term::Literal(Value::Bool(true)))
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("false") => {
                Ok(Term::Literal(Value::Bool(false)))
            }
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("null") => {
                Ok(Term::Literal(Value::Null))
            }
            other => Err(GraphError::QueryInvalid(format!(
                "expected literal or parameter, found {other:?}"
            ))),
        }
    }
}

// ============================================================================
// Execution
// ============================================================================

/// Execute a query against one KB's state.
pub(crate) fn execute(
    state: &KbState,
    query_text: &str,
    params: &BTreeMap<String, Value>,
) -> Result<Vec<Row>, GraphError> {
    let tokens = lex(query_text)?;
    check_read_only(&tokens)?;
    let query = Parser {
        tokens,
        pos: 0,
        anon_counter: 0,
    }
    .parse()?;

    // Resolve parameters up front so a missing binding fails the whole query.
    let resolve = |term: &Term| -> Result<Value, GraphError> {
        match term {
            Term::Literal(value) => Ok(value.clone()),
            Term::Param(name) => params.get(name).cloned().ok_or_else(|| {
                GraphError::QueryInvalid(format!("missing parameter `${name}`"))
            }),
        }
    };

    let mut node_filters: BTreeMap<String, (Vec<String>, Vec<(String, Value)>)> = BTreeMap::new();
    for (var, constraint) in &query.nodes {
        let mut props = Vec::new();
        for (prop, term) in &constraint.props {
            props.push((prop.clone(), resolve(term)?));
        }
        node_filters.insert(var.clone(), (constraint.labels.clone(), props));
    }
    let mut predicates: Vec<(String, String, Value)> = Vec::new();
    for (var, prop, term) in &query.predicates {
        predicates.push((var.clone(), prop.clone(), resolve(term)?));
    }

    let mut rows = Vec::new();
    let mut bindings: BTreeMap<String, NodeIdentity> = BTreeMap::new();
    solve(
        state,
        &query,
        &node_filters,
        &predicates,
        0,
        &mut bindings,
        &mut rows,
    );

    if let Some(limit) = query.limit {
        rows.truncate(limit);
    }
    Ok(rows)
}

fn node_matches(
    state: &KbState,
    identity: &NodeIdentity,
    labels: &[String],
    props: &[(String, Value)],
) -> bool {
    if !labels.iter().all(|l| l == &identity.label) {
        return false;
    }
    let Some(node) = state.nodes.get(identity) else {
        return false;
    };
    props
        .iter()
        .all(|(prop, expected)| node.props.get(prop).is_some_and(|v| values_equal(v, expected)))
}

/// Equality with numeric widening: `1` and `1.0` compare equal.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn solve(
    state: &KbState,
    query: &Query,
    node_filters: &BTreeMap<String, (Vec<String>, Vec<(String, Value)>)>,
    predicates: &[(String, String, Value)],
    depth: usize,
    bindings: &mut BTreeMap<String, NodeIdentity>,
    rows: &mut Vec<Row>,
) {
    if depth == query.var_order.len() {
        rows.push(project(state, query, bindings));
        return;
    }

    let var = &query.var_order[depth];
    let (labels, props) = &node_filters[var];

    // Prefer edge-guided candidates: if an already-bound variable connects to
    // this one, only its neighbors can match.
    let candidates: Vec<NodeIdentity> = if let Some(edge) = query
        .edges
        .iter()
        .find(|e| e.to == *var && bindings.contains_key(&e.from))
    {
        let from = bindings[&edge.from].clone();
        edge_targets(state, &from, edge.rel_type.as_deref())
    } else if let Some(edge) = query
        .edges
        .iter()
        .find(|e| e.from == *var && bindings.contains_key(&e.to))
    {
        let to = bindings[&edge.to].clone();
        edge_sources(state, &to, edge.rel_type.as_deref())
    } else {
        state.nodes.keys().cloned().collect()
    };

    'candidate: for identity in candidates {
        if !node_matches(state, &identity, labels, props) {
            continue;
        }
        for (pred_var, prop, expected) in predicates {
            if pred_var == var {
                let Some(node) = state.nodes.get(&identity) else {
                    continue 'candidate;
                };
                if !node.props.get(prop).is_some_and(|v| values_equal(v, expected)) {
                    continue 'candidate;
                }
            }
        }
        bindings.insert(var.clone(), identity.clone());
        // Every edge whose endpoints are now both bound must exist.
        let satisfied = query.edges.iter().all(|edge| {
            match (bindings.get(&edge.from), bindings.get(&edge.to)) {
                (Some(from), Some(to)) => edge_exists(state, from, to, edge.rel_type.as_deref()),
                _ => true,
            }
        });
        if satisfied {
            solve(state, query, node_filters, predicates, depth + 1, bindings, rows);
        }
        bindings.remove(var);
    }
}

fn edge_targets(state: &KbState, from: &NodeIdentity, rel_type: Option<&str>) -> Vec<NodeIdentity> {
    state
        .edges
        .keys()
        .filter(|key| &key.from == from && rel_type.map_or(true, |rt| key.rel_type == rt))
        .map(|key| key.to.clone())
        .collect()
}

fn edge_sources(state: &KbState, to: &NodeIdentity, rel_type: Option<&str>) -> Vec<NodeIdentity> {
    state
        .edges
        .keys()
        .filter(|key| &key.to == to && rel_type.map_or(true, |rt| key.rel_type == rt))
        .map(|key| key.from.clone())
        .collect()
}

fn edge_exists(
    state: &KbState,
    from: &NodeIdentity,
    to: &NodeIdentity,
    rel_type: Option<&str>,
) -> bool {
    match rel_type {
        Some(rt) => state.edges.contains_key(&EdgeKey {
            rel_type: rt.to_string(),
            from: from.clone(),
            to: to.clone(),
        }),
        None => state
            .edges
            .keys()
            .any(|key| &key.from == from && &key.to == to),
    }
}

fn project(state: &KbState, query: &Query, bindings: &BTreeMap<String, NodeIdentity>) -> Row {
    let mut row = Row::new();
    for item in &query.returns {
        match item {
            ReturnItem::Var(var) => {
                let identity = &bindings[var];
                let value = state
                    .nodes
                    .get(identity)
                    .map(|node| {
                        json!({
                            "label": identity.label,
                            "key": identity.key,
                            "properties": node.props,
                            "provenance": node.provenance,
                        })
                    })
                    .unwrap_or(Value::Null);
                row.insert(var.clone(), value);
            }
            ReturnItem::Prop(var, prop) => {
                let identity = &bindings[var];
                let value = state
                    .nodes
                    .get(identity)
                    .and_then(|node| node.props.get(prop).cloned())
                    .unwrap_or(Value::Null);
                row.insert(format!("{var}.{prop}"), value);
            }
        }
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{KbState, NodeState};
    use crate::types::{EdgeKey, Provenance};
    use chrono::Utc;

    fn provenance() -> Provenance {
        Provenance {
            kb_id: "docs".to_string(),
            source_id: "pages".to_string(),
            run_id: "run-1".to_string(),
            updated_at: Utc::now(),
        }
    }

    fn fixture() -> KbState {
        let mut state = KbState::default();
        for (label, key, props) in [
            ("Document", "d1", json!({"id": "d1", "title": "Intro"})),
            ("Document", "d2", json!({"id": "d2", "title": "Advanced"})),
            ("Person", "a@x", json!({"email": "a@x", "name": "Ada"})),
        ] {
            let props = props
                .as_object()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            state.nodes.insert(
                NodeIdentity::new(label, key),
                NodeState {
                    key_property: if label == "Person" { "email" } else { "id" }.to_string(),
                    props,
                    provenance: provenance(),
                },
            );
        }
        for doc in ["d1", "d2"] {
            state.edges.insert(
                EdgeKey {
                    rel_type: "AUTHORED_BY".to_string(),
                    from: NodeIdentity::new("Document", doc),
                    to: NodeIdentity::new("Person", "a@x"),
                },
                crate::memory::EdgeState {
                    props: BTreeMap::new(),
                    provenance: provenance(),
                },
            );
        }
        state
    }

    fn run(state: &KbState, text: &str) -> Vec<Row> {
        execute(state, text, &BTreeMap::new()).unwrap()
    }

    #[test]
    fn matches_single_label() {
        let state = fixture();
        let rows = run(&state, "MATCH (d:Document) RETURN d.title");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["d.title"], json!("Intro"));
    }

    #[test]
    fn matches_edge_patterns() {
        let state = fixture();
        let rows = run(
            &state,
            "MATCH (d:Document)-[:AUTHORED_BY]->(p:Person) RETURN d.id, p.name",
        );
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r["p.name"] == json!("Ada")));
    }

    #[test]
    fn anonymous_and_untyped_edges_match() {
        let state = fixture();
        let rows = run(&state, "MATCH (d:Document)-->(:Person) RETURN d.id");
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn inline_props_and_where_filter() {
        let state = fixture();
        let rows = run(
            &state,
            "MATCH (d:Document {id: 'd1'})-[:AUTHORED_BY]->(p) WHERE p.name = 'Ada' RETURN p",
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["p"]["label"], json!("Person"));
        assert_eq!(rows[0]["p"]["properties"]["name"], json!("Ada"));
    }

    #[test]
    fn parameters_bind_and_missing_params_fail() {
        let state = fixture();
        let mut params = BTreeMap::new();
        params.insert("id".to_string(), json!("d2"));
        let rows = execute(
            &state,
            "MATCH (d:Document) WHERE d.id = $id RETURN d.title",
            &params,
        )
        .unwrap();
        assert_eq!(rows, vec![Row::from([("d.title".to_string(), json!("Advanced"))])]);

        let err = execute(
            &state,
            "MATCH (d:Document) WHERE d.id = $nope RETURN d",
            &BTreeMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, GraphError::QueryInvalid(_)));
    }

    #[test]
    fn limit_truncates() {
        let state = fixture();
        let rows = run(&state, "MATCH (d:Document) RETURN d.id LIMIT 1");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn shared_variable_joins_patterns() {
        let state = fixture();
        let rows = run(
            &state,
            "MATCH (d:Document), (d)-[:AUTHORED_BY]->(p:Person) RETURN d.id, p.email",
        );
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn mutating_queries_are_rejected_before_parse() {
        let state = fixture();
        for text in [
            "CREATE (n:Document) RETURN n",
            "MATCH (n) DELETE n",
            "match (n) set n.x = 1 return n",
            "MERGE (n:Person {email: 'x'}) RETURN n",
        ] {
            let err = execute(&state, text, &BTreeMap::new()).unwrap_err();
            assert!(
                matches!(err, GraphError::QueryNotReadOnly(_)),
                "`{text}` gave {err:?}"
            );
        }
    }

    #[test]
    fn mutating_words_are_fine_as_labels_and_props() {
        let mut state = KbState::default();
        state.nodes.insert(
            NodeIdentity::new("Set", "s1"),
            NodeState {
                key_property: "id".to_string(),
                props: BTreeMap::from([
                    ("id".to_string(), json!("s1")),
                    ("delete".to_string(), json!(true)),
                ]),
                provenance: provenance(),
            },
        );
        let rows = run(&state, "MATCH (s:Set) WHERE s.delete = true RETURN s.id");
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn unknown_return_variable_is_invalid() {
        let state = fixture();
        let err = execute(&state, "MATCH (d:Document) RETURN x", &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, GraphError::QueryInvalid(_)));
    }

    #[test]
    fn syntax_errors_are_query_invalid() {
        let state = fixture();
        for text in ["", "MATCH", "MATCH (d RETURN d", "MATCH (d) RETURN", "MATCH (a)-[:R]-(b) RETURN a"] {
            let err = execute(&state, text, &BTreeMap::new()).unwrap_err();
            assert!(matches!(err, GraphError::QueryInvalid(_)), "`{text}`");
        }
    }

    #[test]
    fn numeric_widening_in_comparisons() {
        let mut state = KbState::default();
        state.nodes.insert(
            NodeIdentity::new("Item", "i1"),
            NodeState {
                key_property: "id".to_string(),
                props: BTreeMap::from([
                    ("id".to_string(), json!("i1")),
                    ("qty".to_string(), json!(3)),
                ]),
                provenance: provenance(),
            },
        );
        let rows = run(&state, "MATCH (i:Item) WHERE i.qty = 3.0 RETURN i.id");
        assert_eq!(rows.len(), 1);
    }
}
