//! Turns per-token label predictions into entity spans.
//!
//! Tags follow the IOB scheme: `B-X` opens a span of category `X`, `I-X`
//! continues one, anything else (normally `O`) is its own category. Spans
//! labelled `O` are never reported.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Entity;

const OUTSIDE: &str = "O";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationStrategy {
    /// One entity per token, raw IOB label.
    None,
    /// Adjacent tokens of the same category merge into one span.
    #[default]
    Simple,
}

/// Classifier output for one non-special token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenPrediction {
    /// Position of the token in the encoded sequence.
    pub index: usize,
    pub id: u32,
    pub label: String,
    pub score: f32,
    /// Character offsets into the input text.
    pub start: usize,
    pub end: usize,
}

/// Splits an IOB tag into (opens a new span, category).
fn split_tag(label: &str) -> (bool, &str) {
    if let Some(tag) = label.strip_prefix("B-") {
        (true, tag)
    } else if let Some(tag) = label.strip_prefix("I-") {
        (false, tag)
    } else {
        (false, label)
    }
}

/// Converts a byte offset reported by the tokenizer into a character offset.
pub fn char_offset(text: &str, byte: usize) -> usize {
    match text.get(..byte) {
        Some(prefix) => prefix.chars().count(),
        None => text.char_indices().take_while(|(i, _)| *i < byte).count(),
    }
}

/// `decode` renders token ids back to text with the tagger's decoder.
pub fn aggregate<F>(
    tokens: &[TokenPrediction],
    strategy: AggregationStrategy,
    mut decode: F,
) -> Result<Vec<Entity>>
where
    F: FnMut(&[u32]) -> Result<String>,
{
    match strategy {
        AggregationStrategy::None => tokens
            .iter()
            .filter(|t| t.label != OUTSIDE)
            .map(|t| -> Result<Entity> {
                let mut entity = Entity::new();
                entity.insert("entity".into(), Value::from(t.label.clone()));
                entity.insert("score".into(), Value::from(t.score));
                entity.insert("index".into(), Value::from(t.index));
                entity.insert("word".into(), Value::from(decode(&[t.id])?));
                entity.insert("start".into(), Value::from(t.start));
                entity.insert("end".into(), Value::from(t.end));
                Ok(entity)
            })
            .collect(),
        AggregationStrategy::Simple => {
            let mut entities = Vec::new();
            for group in group_tokens(tokens) {
                let (_, tag) = split_tag(&group[0].label);
                if tag == OUTSIDE {
                    continue;
                }
                entities.push(group_entity(tag, &group, &mut decode)?);
            }
            Ok(entities)
        }
    }
}

fn group_tokens(tokens: &[TokenPrediction]) -> Vec<Vec<&TokenPrediction>> {
    let mut groups: Vec<Vec<&TokenPrediction>> = Vec::new();
    for token in tokens {
        let (opens, tag) = split_tag(&token.label);
        match groups.last_mut() {
            Some(group) if !opens && split_tag(&group[group.len() - 1].label).1 == tag => {
                group.push(token)
            }
            _ => groups.push(vec![token]),
        }
    }
    groups
}

fn group_entity<F>(tag: &str, group: &[&TokenPrediction], decode: &mut F) -> Result<Entity>
where
    F: FnMut(&[u32]) -> Result<String>,
{
    let ids: Vec<u32> = group.iter().map(|t| t.id).collect();
    let score = group.iter().map(|t| t.score).sum::<f32>() / group.len() as f32;

    let mut entity = Entity::new();
    entity.insert("entity_group".into(), Value::from(tag));
    entity.insert("score".into(), Value::from(score));
    entity.insert("word".into(), Value::from(decode(&ids)?));
    entity.insert("start".into(), Value::from(group[0].start));
    entity.insert("end".into(), Value::from(group[group.len() - 1].end));
    Ok(entity)
}
