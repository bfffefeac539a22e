//! Chunking strategies.
//!
//! Token counts are whitespace-word approximations throughout; `max_tokens`
//! is a soft bound that individual oversize sentences may still exceed.

use graphloom_schema::ChunkingSpec;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;

fn sentence_boundary() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)[.!?]+(?:\s+|$)|\n").expect("static pattern"))
}

fn heading_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^#{1,6}\s").expect("static pattern"))
}

fn token_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Produce the chunk texts for one node's properties.
///
/// `by_fields` reads exactly the named fields in declared order; the other
/// strategies operate on all string-valued properties joined in property
/// order. Empty output means the node has nothing to embed.
pub fn chunk_text(spec: &ChunkingSpec, props: &BTreeMap<String, Value>) -> Vec<String> {
    match spec {
        ChunkingSpec::ByFields { fields, max_tokens } => by_fields(fields, *max_tokens, props),
        ChunkingSpec::ByHeadings { max_tokens } => by_headings(&joined_text(props), *max_tokens),
        ChunkingSpec::Sentence { max_tokens } => {
            pack(split_sentences(&joined_text(props)), *max_tokens)
        }
        ChunkingSpec::Paragraph { max_tokens } => {
            pack(split_paragraphs(&joined_text(props)), *max_tokens)
        }
    }
}

fn joined_text(props: &BTreeMap<String, Value>) -> String {
    let parts: Vec<&str> = props
        .values()
        .filter_map(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .collect();
    parts.join("\n\n")
}

fn by_fields(
    fields: &[String],
    max_tokens: Option<usize>,
    props: &BTreeMap<String, Value>,
) -> Vec<String> {
    let parts: Vec<String> = fields
        .iter()
        .filter_map(|field| props.get(field))
        .filter_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return Vec::new();
    }
    let text = parts.join("\n\n");
    match max_tokens {
        Some(max) if token_count(&text) > max => pack(split_sentences(&text), max),
        _ => vec![text],
    }
}

fn by_headings(text: &str, max_tokens: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let mut sections = Vec::new();
    let mut last = 0;
    for hit in heading_line().find_iter(text) {
        if hit.start() > last {
            sections.push(&text[last..hit.start()]);
        }
        last = hit.start();
    }
    sections.push(&text[last..]);

    let mut chunks = Vec::new();
    for section in sections {
        let section = section.trim();
        if section.is_empty() {
            continue;
        }
        if token_count(section) <= max_tokens {
            chunks.push(section.to_string());
        } else {
            chunks.extend(pack(split_sentences(section), max_tokens));
        }
    }
    chunks
}

fn split_sentences(text: &str) -> Vec<String> {
    sentence_boundary()
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn split_paragraphs(text: &str) -> Vec<String> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Greedily group segments into chunks of at most `max_tokens` words. A
/// single segment longer than the bound becomes its own chunk.
fn pack(segments: Vec<String>, max_tokens: usize) -> Vec<String> {
    let max_tokens = max_tokens.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0;
    for segment in segments {
        let tokens = token_count(&segment);
        if current_tokens > 0 && current_tokens + tokens > max_tokens {
            chunks.push(std::mem::take(&mut current));
            current_tokens = 0;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&segment);
        current_tokens += tokens;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn by_fields_joins_in_declared_order() {
        let spec = ChunkingSpec::ByFields {
            fields: vec!["title".to_string(), "body".to_string()],
            max_tokens: None,
        };
        let chunks = chunk_text(
            &spec,
            &props(&[("body", json!("the body")), ("title", json!("The Title"))]),
        );
        assert_eq!(chunks, vec!["The Title\n\nthe body"]);
    }

    #[test]
    fn by_fields_skips_missing_and_non_text() {
        let spec = ChunkingSpec::ByFields {
            fields: vec!["title".to_string(), "ghost".to_string(), "stars".to_string()],
            max_tokens: None,
        };
        let chunks = chunk_text(&spec, &props(&[("title", json!("T")), ("stars", json!(5))]));
        assert_eq!(chunks, vec!["T\n\n5"]);

        let empty = chunk_text(&spec, &props(&[("other", json!("x"))]));
        assert!(empty.is_empty());
    }

    #[test]
    fn by_fields_splits_when_over_budget() {
        let spec = ChunkingSpec::ByFields {
            fields: vec!["body".to_string()],
            max_tokens: Some(4),
        };
        let text = "one two three. four five six. seven eight nine.";
        let chunks = chunk_text(&spec, &props(&[("body", json!(text))]));
        assert!(chunks.len() > 1, "chunks: {chunks:?}");
        for chunk in &chunks {
            assert!(chunk.split_whitespace().count() <= 4);
        }
    }

    #[test]
    fn headings_split_sections() {
        let spec = ChunkingSpec::ByHeadings { max_tokens: 50 };
        let text = "# Intro\nwelcome here\n## Details\nmore text\nstill details";
        let chunks = chunk_text(&spec, &props(&[("body", json!(text))]));
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].starts_with("# Intro"));
        assert!(chunks[1].starts_with("## Details"));
    }

    #[test]
    fn preamble_before_first_heading_is_its_own_chunk() {
        let spec = ChunkingSpec::ByHeadings { max_tokens: 50 };
        let text = "preamble text\n# First\nsection body";
        let chunks = chunk_text(&spec, &props(&[("body", json!(text))]));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0], "preamble text");
    }

    #[test]
    fn sentences_pack_up_to_budget() {
        let spec = ChunkingSpec::Sentence { max_tokens: 6 };
        let text = "One two three. Four five. Six seven eight nine.";
        let chunks = chunk_text(&spec, &props(&[("body", json!(text))]));
        assert_eq!(chunks, vec!["One two three Four five", "Six seven eight nine"]);
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        let spec = ChunkingSpec::Paragraph { max_tokens: 100 };
        let text = "first para\n\nsecond para\n\n\n\nthird";
        let chunks = chunk_text(&spec, &props(&[("body", json!(text))]));
        assert_eq!(chunks, vec!["first para second para third"]);

        let tight = ChunkingSpec::Paragraph { max_tokens: 2 };
        let chunks = chunk_text(&tight, &props(&[("body", json!(text))]));
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn empty_properties_produce_no_chunks() {
        for spec in [
            ChunkingSpec::ByHeadings { max_tokens: 10 },
            ChunkingSpec::Sentence { max_tokens: 10 },
            ChunkingSpec::Paragraph { max_tokens: 10 },
        ] {
            assert!(chunk_text(&spec, &props(&[("n", json!(42))])).is_empty());
            assert!(chunk_text(&spec, &BTreeMap::new()).is_empty());
        }
    }
}
