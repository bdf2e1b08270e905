//! Test-only helpers: candidate/action builders and scripted gateways.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::core::types::{Candidate, CandidateSource, FeedSort, ProposedAction};
use crate::error::GatewayError;
use crate::io::content::{ContentGateway, NewPost};
use crate::io::oracle::{OracleGateway, OraclePrompt, SamplingParams};

/// Candidate discovered through a topic search.
pub fn topic_candidate(id: &str, topic: &str) -> Candidate {
    Candidate {
        id: id.to_string(),
        source: CandidateSource::Topic {
            topic: topic.to_string(),
        },
        summary: format!("[author] post {id} about {topic}"),
    }
}

/// Candidate discovered through the hot feed of `community`.
pub fn feed_candidate(id: &str, community: &str) -> Candidate {
    Candidate {
        id: id.to_string(),
        source: CandidateSource::Feed {
            community: community.to_string(),
            sort: FeedSort::Hot,
        },
        summary: format!("[author] post {id} in {community}"),
    }
}

pub fn comment(target: &str, text: &str) -> ProposedAction {
    ProposedAction::Comment {
        target: target.to_string(),
        text: text.to_string(),
    }
}

pub fn vote(target: &str) -> ProposedAction {
    ProposedAction::Vote {
        target: target.to_string(),
    }
}

pub fn create_post(text: &str) -> ProposedAction {
    ProposedAction::CreatePost {
        title: None,
        text: text.to_string(),
        community: None,
    }
}

pub fn skip() -> ProposedAction {
    ProposedAction::Skip { reason: None }
}

/// Every call a [`ScriptedContent`] received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentCall {
    Search(String),
    Feed(String, FeedSort),
    Comment(String, String),
    Vote(String),
    CreatePost(NewPost),
    Whoami,
}

impl ContentCall {
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            ContentCall::Comment(..) | ContentCall::Vote(_) | ContentCall::CreatePost(_)
        )
    }
}

/// Content gateway returning canned listings and failing on request.
#[derive(Default)]
pub struct ScriptedContent {
    search: HashMap<String, Vec<Candidate>>,
    feeds: HashMap<(String, FeedSort), Vec<Candidate>>,
    failing_reads: HashSet<String>,
    failing_targets: HashSet<String>,
    fail_posts: bool,
    cancel_on_write: Option<CancellationToken>,
    calls: Mutex<Vec<ContentCall>>,
}

impl ScriptedContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_search(mut self, topic: &str, results: Vec<Candidate>) -> Self {
        self.search.insert(topic.to_string(), results);
        self
    }

    pub fn with_feed(mut self, community: &str, sort: FeedSort, results: Vec<Candidate>) -> Self {
        self.feeds.insert((community.to_string(), sort), results);
        self
    }

    /// Searches for this topic and feeds of this community fail with a transport error.
    pub fn failing_read(mut self, topic_or_community: &str) -> Self {
        self.failing_reads.insert(topic_or_community.to_string());
        self
    }

    /// Comments and votes on this candidate are rejected by the platform.
    pub fn failing_target(mut self, candidate_id: &str) -> Self {
        self.failing_targets.insert(candidate_id.to_string());
        self
    }

    pub fn failing_posts(mut self) -> Self {
        self.fail_posts = true;
        self
    }

    /// Cancel `token` while the first write is in flight.
    pub fn cancel_on_write(mut self, token: CancellationToken) -> Self {
        self.cancel_on_write = Some(token);
        self
    }

    pub fn calls(&self) -> Vec<ContentCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn writes(&self) -> Vec<ContentCall> {
        self.calls().into_iter().filter(ContentCall::is_write).collect()
    }

    fn record(&self, call: ContentCall) {
        if call.is_write() {
            if let Some(token) = &self.cancel_on_write {
                token.cancel();
            }
        }
        self.calls.lock().expect("calls lock").push(call);
    }

    fn read_failure(&self, key: &str) -> Result<(), GatewayError> {
        if self.failing_reads.contains(key) {
            return Err(GatewayError::Transport(format!("scripted failure for {key}")));
        }
        Ok(())
    }

    fn write_result(&self, target: &str) -> Result<(), GatewayError> {
        if self.failing_targets.contains(target) {
            return Err(GatewayError::Status {
                status: 503,
                body: format!("scripted rejection for {target}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ContentGateway for ScriptedContent {
    async fn search(&self, topic: &str) -> Result<Vec<Candidate>, GatewayError> {
        self.record(ContentCall::Search(topic.to_string()));
        self.read_failure(topic)?;
        Ok(self.search.get(topic).cloned().unwrap_or_default())
    }

    async fn feed(&self, community: &str, sort: FeedSort) -> Result<Vec<Candidate>, GatewayError> {
        self.record(ContentCall::Feed(community.to_string(), sort));
        self.read_failure(community)?;
        Ok(self
            .feeds
            .get(&(community.to_string(), sort))
            .cloned()
            .unwrap_or_default())
    }

    async fn comment(&self, candidate_id: &str, text: &str) -> Result<(), GatewayError> {
        self.record(ContentCall::Comment(
            candidate_id.to_string(),
            text.to_string(),
        ));
        self.write_result(candidate_id)
    }

    async fn vote(&self, candidate_id: &str) -> Result<(), GatewayError> {
        self.record(ContentCall::Vote(candidate_id.to_string()));
        self.write_result(candidate_id)
    }

    async fn create_post(&self, post: &NewPost) -> Result<(), GatewayError> {
        self.record(ContentCall::CreatePost(post.clone()));
        if self.fail_posts {
            return Err(GatewayError::Timeout);
        }
        Ok(())
    }

    async fn whoami(&self) -> Result<String, GatewayError> {
        self.record(ContentCall::Whoami);
        Ok("scripted-agent".to_string())
    }
}

/// Oracle that replays queued replies; an empty queue answers with no actions.
#[derive(Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<String, GatewayError>>>,
    prompts: Mutex<Vec<OraclePrompt>>,
    probe_failures: AtomicU32,
    latency: Option<Duration>,
}

impl ScriptedOracle {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            ..Self::default()
        }
    }

    /// Queue a reply, or a failure, after the existing ones.
    pub fn push(&self, reply: Result<String, GatewayError>) {
        self.replies.lock().expect("replies lock").push_back(reply);
    }

    /// Fail the first `count` probes.
    pub fn with_probe_failures(self, count: u32) -> Self {
        self.probe_failures.store(count, Ordering::SeqCst);
        self
    }

    /// Take `latency` to answer each completion.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn prompts(&self) -> Vec<OraclePrompt> {
        self.prompts.lock().expect("prompts lock").clone()
    }
}

#[async_trait]
impl OracleGateway for ScriptedOracle {
    async fn complete(
        &self,
        prompt: &OraclePrompt,
        _sampling: &SamplingParams,
    ) -> Result<String, GatewayError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.prompts.lock().expect("prompts lock").push(prompt.clone());
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Ok(r#"{"actions":[]}"#.to_string()))
    }

    async fn probe(&self) -> Result<(), GatewayError> {
        let remaining = self.probe_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.probe_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(GatewayError::Transport("connection refused".to_string()));
        }
        Ok(())
    }
}
