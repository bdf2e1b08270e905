//! Decision engine: prompt the oracle and turn its reply into a [`Decision`].
//!
//! Failures never escape the cycle. The caller treats any [`DecideError`] as a
//! decision with zero actions and tries again next cycle.

use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::core::budget::RemainingBudget;
use crate::core::decision::DecisionParser;
use crate::core::types::{Candidate, Decision};
use crate::error::DecideError;
use crate::io::config::AgentConfig;
use crate::io::oracle::{OracleGateway, SamplingParams};
use crate::io::prompt::{PromptBuilder, PromptInputs};

/// Identity and interests the oracle speaks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub text: String,
    pub topics: Vec<String>,
    pub communities: Vec<String>,
}

impl From<&AgentConfig> for Persona {
    fn from(config: &AgentConfig) -> Self {
        Self {
            text: config.persona.clone(),
            topics: config.topics.clone(),
            communities: config.communities.clone(),
        }
    }
}

/// Prompt templates, reply parser, and sampling settings, built once at startup.
pub struct DecisionEngine {
    prompts: PromptBuilder,
    parser: DecisionParser,
    sampling: SamplingParams,
}

impl DecisionEngine {
    pub fn new(sampling: SamplingParams) -> anyhow::Result<Self> {
        Ok(Self {
            prompts: PromptBuilder::new()?,
            parser: DecisionParser::new()?,
            sampling,
        })
    }

    /// Ask the oracle for a decision over `candidates` within `budget`.
    ///
    /// A single attempt; no retry on failure.
    pub async fn decide<O: OracleGateway + ?Sized>(
        &self,
        oracle: &O,
        candidates: &[Candidate],
        persona: &Persona,
        budget: RemainingBudget,
    ) -> Result<Decision, DecideError> {
        let prompt = self
            .prompts
            .build(&PromptInputs {
                persona: &persona.text,
                topics: &persona.topics,
                communities: &persona.communities,
                candidates,
                budget,
            })
            .map_err(|err| DecideError::Prompt(err.to_string()))?;

        let raw = oracle.complete(&prompt, &self.sampling).await?;
        debug!(reply = %raw, "oracle reply");

        let ids: HashSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        match self.parser.parse(&raw, &ids) {
            Ok(decision) => {
                info!(
                    candidates = candidates.len(),
                    proposed = decision.actions.len(),
                    "oracle decided"
                );
                Ok(decision)
            }
            Err(err) => {
                warn!(error = %err, "oracle reply rejected");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::decision::MalformedReply;
    use crate::core::types::ProposedAction;
    use crate::error::GatewayError;
    use crate::io::config::OracleConfig;
    use crate::test_support::{ScriptedOracle, topic_candidate};

    fn engine() -> DecisionEngine {
        DecisionEngine::new(SamplingParams::from(&OracleConfig::default())).expect("engine")
    }

    fn budget() -> RemainingBudget {
        RemainingBudget {
            comments: 1,
            posts: 1,
            cooldown_remaining: None,
        }
    }

    #[tokio::test]
    async fn valid_reply_becomes_decision_and_prompt_lists_candidates() {
        let oracle = ScriptedOracle::new([
            r#"Sure! {"actions":[{"kind":"vote","target":"a"},{"kind":"skip"}]}"#,
        ]);
        let persona = Persona::from(&AgentConfig::default());
        let candidates = vec![topic_candidate("a", "AI")];

        let decision = engine()
            .decide(&oracle, &candidates, &persona, budget())
            .await
            .expect("decision");

        assert_eq!(
            decision.actions,
            vec![
                ProposedAction::Vote {
                    target: "a".to_string()
                },
                ProposedAction::Skip { reason: None },
            ]
        );
        let prompts = oracle.prompts();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].user.contains("id: a"));
        assert!(prompts[0].system.contains(&persona.text));
    }

    #[tokio::test]
    async fn unparsable_reply_is_malformed() {
        let oracle = ScriptedOracle::new(["I would rather not."]);
        let err = engine()
            .decide(
                &oracle,
                &[topic_candidate("a", "AI")],
                &Persona::from(&AgentConfig::default()),
                budget(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DecideError::OracleMalformed(MalformedReply::NoJson)
        ));
        assert_eq!(err.label(), "oracle_malformed");
    }

    #[tokio::test]
    async fn gateway_failure_is_unavailable() {
        let oracle = ScriptedOracle::default();
        oracle.push(Err(GatewayError::Timeout));
        let err = engine()
            .decide(
                &oracle,
                &[],
                &Persona::from(&AgentConfig::default()),
                budget(),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DecideError::OracleUnavailable(GatewayError::Timeout)
        ));
    }
}
