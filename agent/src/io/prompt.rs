//! Oracle prompt rendering.

use minijinja::{Environment, context};
use tracing::debug;

use crate::core::budget::RemainingBudget;
use crate::core::types::Candidate;
use crate::io::oracle::OraclePrompt;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");
const DECIDE_TEMPLATE: &str = include_str!("prompts/decide.md");

/// Everything a decision prompt is rendered from.
#[derive(Debug, Clone)]
pub struct PromptInputs<'a> {
    pub persona: &'a str,
    pub topics: &'a [String],
    pub communities: &'a [String],
    pub candidates: &'a [Candidate],
    pub budget: RemainingBudget,
}

/// Template engine wrapper around minijinja.
pub struct PromptBuilder {
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template("system", SYSTEM_TEMPLATE)?;
        env.add_template("decide", DECIDE_TEMPLATE)?;
        Ok(Self { env })
    }

    pub fn build(&self, input: &PromptInputs<'_>) -> Result<OraclePrompt, minijinja::Error> {
        let system = self.env.get_template("system")?.render(context! {
            persona => input.persona.trim(),
            topics => input.topics,
        })?;
        let cooldown_minutes = input
            .budget
            .cooldown_remaining
            .map(|left| left.as_secs().div_ceil(60));
        let user = self.env.get_template("decide")?.render(context! {
            candidates => input.candidates,
            budget => input.budget,
            cooldown_minutes => cooldown_minutes,
            communities => input.communities,
        })?;
        debug!(
            system_bytes = system.len(),
            user_bytes = user.len(),
            "rendered oracle prompt"
        );
        Ok(OraclePrompt { system, user })
    }
}
