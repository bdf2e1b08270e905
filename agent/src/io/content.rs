//! Content platform gateway.
//!
//! The [`ContentGateway`] trait decouples the loop from the platform's HTTP
//! API. Tests use scripted gateways; [`HttpContentGateway`] talks to the real
//! endpoint with a static bearer credential.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, RETRY_AFTER};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::core::types::{Candidate, CandidateSource, FeedSort};
use crate::error::GatewayError;
use crate::io::config::{ContentConfig, Credentials};

pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);
const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);
const ERROR_BODY_LIMIT: usize = 200;

/// A new top-level post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub title: String,
    pub body: String,
    pub community: String,
}

/// Read and write operations the loop needs from the content platform.
#[async_trait]
pub trait ContentGateway: Send + Sync {
    /// Items matching `topic`, in platform rank order.
    async fn search(&self, topic: &str) -> Result<Vec<Candidate>, GatewayError>;
    /// Items listed in `community`, in platform rank order.
    async fn feed(&self, community: &str, sort: FeedSort) -> Result<Vec<Candidate>, GatewayError>;
    async fn comment(&self, candidate_id: &str, text: &str) -> Result<(), GatewayError>;
    async fn vote(&self, candidate_id: &str) -> Result<(), GatewayError>;
    async fn create_post(&self, post: &NewPost) -> Result<(), GatewayError>;
    /// Name of the authenticated account.
    async fn whoami(&self) -> Result<String, GatewayError>;
}

/// Gateway backed by the platform's JSON HTTP API.
#[derive(Debug, Clone)]
pub struct HttpContentGateway {
    client: Client,
    base_url: String,
    search_limit: u32,
    feed_limit: u32,
    rate_limit_retries: u32,
    summary_body_chars: usize,
    cancel: CancellationToken,
}

impl HttpContentGateway {
    pub fn new(config: &ContentConfig, credentials: &Credentials) -> Result<Self, GatewayError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", credentials.api_key()))
            .map_err(|_| GatewayError::Transport("credential is not a valid header".to_string()))?;
        auth.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            search_limit: config.search_limit,
            feed_limit: config.feed_limit,
            rate_limit_retries: config.rate_limit_retries.max(1),
            summary_body_chars: config.summary_body_chars,
            cancel: CancellationToken::new(),
        })
    }

    /// Abort rate-limit waits when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// `{base}/posts/{candidate_id}/{action}` with the id escaped as one path segment.
    fn post_url(&self, candidate_id: &str, action: &str) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|err| GatewayError::Transport(format!("invalid base url: {err}")))?;
        url.path_segments_mut()
            .map_err(|()| GatewayError::Transport("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["posts", candidate_id, action]);
        Ok(url)
    }

    /// GET with bounded waiting on HTTP 429.
    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, GatewayError> {
        let url = self.url(path);
        let mut attempt = 1;
        loop {
            let response = self.client.get(&url).query(query).send().await?;
            if response.status() != StatusCode::TOO_MANY_REQUESTS {
                return read_json(response).await;
            }
            let wait = retry_after(&response);
            if attempt >= self.rate_limit_retries {
                warn!(path, attempts = attempt, "giving up after repeated rate limiting");
                return Err(GatewayError::RateLimited { retry_after: wait });
            }
            warn!(path, wait_secs = wait.as_secs(), "rate limited, waiting");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    return Err(GatewayError::RateLimited { retry_after: wait });
                }
                _ = tokio::time::sleep(wait) => {}
            }
            attempt += 1;
        }
    }

    /// Writes are never retried; a 429 is reported to the caller as-is.
    ///
    /// Success is decided by the status alone. The body of an accepted write is ignored.
    async fn post_json(&self, request: RequestBuilder) -> Result<(), GatewayError> {
        let response = request.send().await?;
        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(GatewayError::RateLimited {
                retry_after: retry_after(&response),
            });
        }
        check_status(response).await.map(|_| ())
    }

    fn candidates(
        &self,
        value: Value,
        source: &CandidateSource,
    ) -> Result<Vec<Candidate>, GatewayError> {
        let list: PostList =
            serde_json::from_value(value).map_err(|err| GatewayError::Decode(err.to_string()))?;
        Ok(list
            .posts
            .into_iter()
            .filter_map(|post| post.into_candidate(source.clone(), self.summary_body_chars))
            .collect())
    }
}

#[async_trait]
impl ContentGateway for HttpContentGateway {
    #[instrument(skip(self))]
    async fn search(&self, topic: &str) -> Result<Vec<Candidate>, GatewayError> {
        let value = self
            .get_json(
                "/search",
                &[("q", topic.to_string()), ("limit", self.search_limit.to_string())],
            )
            .await?;
        let found = self.candidates(
            value,
            &CandidateSource::Topic {
                topic: topic.to_string(),
            },
        )?;
        debug!(count = found.len(), "search complete");
        Ok(found)
    }

    #[instrument(skip(self), fields(sort = sort.as_str()))]
    async fn feed(&self, community: &str, sort: FeedSort) -> Result<Vec<Candidate>, GatewayError> {
        let value = self
            .get_json(
                "/feed",
                &[
                    ("submolt", community.to_string()),
                    ("sort", sort.as_str().to_string()),
                    ("limit", self.feed_limit.to_string()),
                ],
            )
            .await?;
        let found = self.candidates(
            value,
            &CandidateSource::Feed {
                community: community.to_string(),
                sort,
            },
        )?;
        debug!(count = found.len(), "feed complete");
        Ok(found)
    }

    #[instrument(skip(self, text))]
    async fn comment(&self, candidate_id: &str, text: &str) -> Result<(), GatewayError> {
        let request = self
            .client
            .post(self.post_url(candidate_id, "comments")?)
            .json(&json!({ "body": text }));
        self.post_json(request).await
    }

    #[instrument(skip(self))]
    async fn vote(&self, candidate_id: &str) -> Result<(), GatewayError> {
        let request = self
            .client
            .post(self.post_url(candidate_id, "upvote")?)
            .json(&json!({}));
        self.post_json(request).await
    }

    #[instrument(skip(self, post), fields(community = %post.community))]
    async fn create_post(&self, post: &NewPost) -> Result<(), GatewayError> {
        let request = self.client.post(self.url("/posts")).json(&json!({
            "title": post.title,
            "body": post.body,
            "submolt": post.community,
        }));
        self.post_json(request).await
    }

    async fn whoami(&self) -> Result<String, GatewayError> {
        let value = self.get_json("/agents/me", &[]).await?;
        Ok(value
            .get("username")
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_string())
    }
}

async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(GatewayError::Status {
        status: status.as_u16(),
        body: body.chars().take(ERROR_BODY_LIMIT).collect(),
    })
}

async fn read_json(response: Response) -> Result<Value, GatewayError> {
    let bytes = check_status(response).await?.bytes().await?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&bytes).map_err(|err| GatewayError::Decode(err.to_string()))
}

fn retry_after(response: &Response) -> Duration {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
        .min(MAX_RETRY_AFTER)
}

#[derive(Debug, Default, Deserialize)]
struct PostList {
    #[serde(default)]
    posts: Vec<PostWire>,
}

#[derive(Debug, Deserialize)]
struct PostWire {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    author: Option<AuthorWire>,
}

#[derive(Debug, Deserialize)]
struct AuthorWire {
    #[serde(default)]
    username: Option<String>,
}

impl PostWire {
    fn into_candidate(self, source: CandidateSource, body_chars: usize) -> Option<Candidate> {
        let id = match self.id? {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        if id.trim().is_empty() {
            return None;
        }
        let author = self
            .author
            .and_then(|a| a.username)
            .unwrap_or_else(|| "unknown".to_string());
        let title = self.title.unwrap_or_else(|| "(no title)".to_string());
        let body: String = self.body.unwrap_or_default().chars().take(body_chars).collect();
        let summary = if body.trim().is_empty() {
            format!("[{author}] {title}")
        } else {
            format!("[{author}] {title}\n{}", body.trim())
        };
        Some(Candidate {
            id,
            source,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topic() -> CandidateSource {
        CandidateSource::Topic {
            topic: "ai".to_string(),
        }
    }

    #[test]
    fn post_becomes_candidate_with_truncated_body() {
        let post: PostWire = serde_json::from_value(json!({
            "id": "p1",
            "title": "Hello",
            "body": "abcdefghij",
            "author": {"username": "molt"}
        }))
        .expect("post");
        let candidate = post.into_candidate(topic(), 4).expect("candidate");
        assert_eq!(candidate.id, "p1");
        assert_eq!(candidate.summary, "[molt] Hello\nabcd");
    }

    #[test]
    fn numeric_ids_are_accepted_and_missing_ids_skipped() {
        let list: PostList = serde_json::from_value(json!({
            "posts": [{"id": 42}, {"title": "no id"}, {"id": ""}, {"id": {"x": 1}}]
        }))
        .expect("list");
        let candidates: Vec<Candidate> = list
            .posts
            .into_iter()
            .filter_map(|p| p.into_candidate(topic(), 10))
            .collect();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id, "42");
        assert_eq!(candidates[0].summary, "[unknown] (no title)");
    }

    #[test]
    fn candidate_ids_are_escaped_as_one_path_segment() {
        let config = ContentConfig {
            base_url: "http://platform.test/api/v1/".to_string(),
            ..ContentConfig::default()
        };
        let gateway = HttpContentGateway::new(&config, &Credentials::new("k")).expect("gateway");

        let url = gateway.post_url("a/b?c#d", "comments").expect("url");
        assert_eq!(
            url.as_str(),
            "http://platform.test/api/v1/posts/a%2Fb%3Fc%23d/comments"
        );
        let plain = gateway.post_url("p1", "upvote").expect("url");
        assert_eq!(plain.as_str(), "http://platform.test/api/v1/posts/p1/upvote");
    }

    #[test]
    fn missing_posts_key_is_empty() {
        let list: PostList = serde_json::from_value(json!({"results": []})).expect("list");
        assert!(list.posts.is_empty());
    }
}
