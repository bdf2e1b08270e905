//! Validation of raw oracle replies into a typed [`Decision`].
//!
//! The reply is tainted input. It must contain a JSON object that conforms to
//! `schemas/decision.schema.json`, every action kind must belong to the closed
//! set, and every target must name a candidate that was shown to the oracle.
//! Anything else rejects the whole reply.

use std::collections::HashSet;

use jsonschema::{Draft, Validator};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::core::types::{Decision, ProposedAction};

pub const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MalformedReply {
    #[error("no JSON object found in oracle reply")]
    NoJson,
    #[error("schema validation failed: {}", .0.join("; "))]
    Schema(Vec<String>),
    #[error("unexpected decision shape: {0}")]
    Shape(String),
    #[error("action {index} has empty {field}")]
    EmptyField { index: usize, field: &'static str },
    #[error("action {index} references unknown candidate '{target}'")]
    UnknownTarget { index: usize, target: String },
}

/// Compiled schema and extraction patterns, built once per process.
pub struct DecisionParser {
    schema: Validator,
    fenced: Regex,
    braces: Regex,
}

impl DecisionParser {
    pub fn new() -> anyhow::Result<Self> {
        let schema_json: Value = serde_json::from_str(DECISION_SCHEMA)?;
        let schema = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema_json)
            .map_err(|err| anyhow::anyhow!("compile decision schema: {err}"))?;
        Ok(Self {
            schema,
            fenced: Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)\n?\s*```")?,
            braces: Regex::new(r"(?s)\{.*\}")?,
        })
    }

    /// Parse `raw` and cross-check targets against `candidate_ids`.
    pub fn parse(
        &self,
        raw: &str,
        candidate_ids: &HashSet<&str>,
    ) -> Result<Decision, MalformedReply> {
        let value = self.extract_json(raw).ok_or(MalformedReply::NoJson)?;

        let errors: Vec<String> = self
            .schema
            .iter_errors(&value)
            .map(|err| err.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(MalformedReply::Schema(errors));
        }

        let decision: Decision =
            serde_json::from_value(value).map_err(|err| MalformedReply::Shape(err.to_string()))?;

        let mut actions = Vec::with_capacity(decision.actions.len());
        for (index, action) in decision.actions.into_iter().enumerate() {
            let action = normalize(index, action)?;
            if let Some(target) = action.target() {
                if !candidate_ids.contains(target) {
                    return Err(MalformedReply::UnknownTarget {
                        index,
                        target: target.to_string(),
                    });
                }
            }
            actions.push(action);
        }
        Ok(Decision { actions })
    }

    /// Locate a JSON object in free-form model output.
    ///
    /// Tries the whole reply, then a fenced code block, then the widest `{...}` span.
    fn extract_json(&self, raw: &str) -> Option<Value> {
        let as_object = |text: &str| {
            serde_json::from_str::<Value>(text.trim())
                .ok()
                .filter(Value::is_object)
        };

        if let Some(value) = as_object(raw) {
            return Some(value);
        }
        if let Some(value) = self
            .fenced
            .captures(raw)
            .and_then(|caps| caps.get(1))
            .and_then(|m| as_object(m.as_str()))
        {
            return Some(value);
        }
        self.braces.find(raw).and_then(|m| as_object(m.as_str()))
    }
}

fn normalize(index: usize, action: ProposedAction) -> Result<ProposedAction, MalformedReply> {
    let non_empty = |value: String, field: &'static str| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            return Err(MalformedReply::EmptyField { index, field });
        }
        Ok(trimmed)
    };
    let optional = |value: Option<String>| {
        value
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    Ok(match action {
        ProposedAction::Comment { target, text } => ProposedAction::Comment {
            target: non_empty(target, "target")?,
            text: non_empty(text, "text")?,
        },
        ProposedAction::Vote { target } => ProposedAction::Vote {
            target: non_empty(target, "target")?,
        },
        ProposedAction::CreatePost {
            title,
            text,
            community,
        } => ProposedAction::CreatePost {
            title: optional(title),
            text: non_empty(text, "text")?,
            community: optional(community),
        },
        ProposedAction::Skip { reason } => ProposedAction::Skip {
            reason: optional(reason),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parser() -> DecisionParser {
        DecisionParser::new().expect("parser")
    }

    fn ids<'a>(items: &[&'a str]) -> HashSet<&'a str> {
        items.iter().copied().collect()
    }

    #[test]
    fn parses_plain_json_reply() {
        let raw = r#"{"actions":[
            {"kind":"comment","target":"A","text":"  nice point  "},
            {"kind":"vote","target":"B"},
            {"kind":"create_post","text":"hello","community":"general"},
            {"kind":"skip"}
        ]}"#;
        let decision = parser().parse(raw, &ids(&["A", "B"])).expect("parse");
        assert_eq!(
            decision.actions,
            vec![
                ProposedAction::Comment {
                    target: "A".to_string(),
                    text: "nice point".to_string(),
                },
                ProposedAction::Vote {
                    target: "B".to_string()
                },
                ProposedAction::CreatePost {
                    title: None,
                    text: "hello".to_string(),
                    community: Some("general".to_string()),
                },
                ProposedAction::Skip { reason: None },
            ]
        );
    }

    #[test]
    fn extracts_fenced_block_after_preamble() {
        let raw = "Sure! Here you go:\n```json\n{\"actions\":[{\"kind\":\"vote\",\"target\":\"A\"}]}\n```\nEnjoy.";
        let decision = parser().parse(raw, &ids(&["A"])).expect("parse");
        assert_eq!(decision.actions.len(), 1);
    }

    #[test]
    fn extracts_bare_object_from_prose() {
        let raw = "I pick {\"actions\": []} for now";
        let decision = parser().parse(raw, &ids(&[])).expect("parse");
        assert!(decision.actions.is_empty());
    }

    #[test]
    fn rejects_text_without_json() {
        assert_eq!(
            parser().parse("I would rather not.", &ids(&["A"])),
            Err(MalformedReply::NoJson)
        );
    }

    #[test]
    fn rejects_kind_outside_closed_set() {
        let raw = r#"{"actions":[{"kind":"delete_account","target":"A"}]}"#;
        let err = parser().parse(raw, &ids(&["A"])).unwrap_err();
        assert!(matches!(err, MalformedReply::Schema(_)));
    }

    #[test]
    fn rejects_missing_required_field() {
        let raw = r#"{"actions":[{"kind":"comment","target":"A"}]}"#;
        let err = parser().parse(raw, &ids(&["A"])).unwrap_err();
        assert!(matches!(err, MalformedReply::Schema(_)));
    }

    #[test]
    fn rejects_wrong_types() {
        let raw = r#"{"actions":[{"kind":"vote","target":42}]}"#;
        let err = parser().parse(raw, &ids(&["42"])).unwrap_err();
        assert!(matches!(err, MalformedReply::Schema(_)));
    }

    #[test]
    fn rejects_missing_actions_array() {
        let err = parser().parse(r#"{"choice":"A"}"#, &ids(&["A"])).unwrap_err();
        assert!(matches!(err, MalformedReply::Schema(_)));
    }

    #[test]
    fn rejects_whitespace_only_text() {
        let raw = r#"{"actions":[{"kind":"comment","target":"A","text":"   "}]}"#;
        assert_eq!(
            parser().parse(raw, &ids(&["A"])),
            Err(MalformedReply::EmptyField {
                index: 0,
                field: "text"
            })
        );
    }

    #[test]
    fn rejects_target_never_shown() {
        let raw = r#"{"actions":[{"kind":"vote","target":"A"},{"kind":"vote","target":"Z"}]}"#;
        assert_eq!(
            parser().parse(raw, &ids(&["A"])),
            Err(MalformedReply::UnknownTarget {
                index: 1,
                target: "Z".to_string()
            })
        );
    }
}
