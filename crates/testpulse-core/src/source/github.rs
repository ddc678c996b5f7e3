//! GitHub REST client.
//!
//! Used for branch resolution before a clone and for repository activity
//! totals. Every request goes through [`retry_with_backoff`] with the run's
//! shared [`RateLimitState`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::domain::{SourceError, SourceResult};
use crate::retry::{retry_with_backoff, RateLimitState, RetryPolicy};

const USER_AGENT: &str = concat!("testpulse/", env!("CARGO_PKG_VERSION"));

/// Repository activity totals included in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryStats {
    pub total_pull_requests: u64,
    pub total_issues: u64,
}

#[derive(Deserialize)]
struct SearchTotal {
    total_count: u64,
}

/// Thin GitHub REST client.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: Url,
    token: Option<String>,
    retry: RetryPolicy,
    limiter: Arc<RateLimitState>,
}

impl std::fmt::Debug for GithubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubClient")
            .field("api_base", &self.api_base.as_str())
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl GithubClient {
    pub fn new(
        api_base: &str,
        token: Option<String>,
        retry: RetryPolicy,
        limiter: Arc<RateLimitState>,
    ) -> SourceResult<Self> {
        let mut base = api_base.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let api_base = Url::parse(&base)
            .map_err(|e| {
                SourceError::InvalidTarget(format!("bad GitHub API url {api_base}: {e}"))
            })?;
        let mut builder = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30));
        if matches!(api_base.host_str(), Some("127.0.0.1" | "localhost")) {
            builder = builder.no_proxy();
        }
        let http = builder
            .build()
            .map_err(|e| SourceError::Transient(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_base,
            token,
            retry,
            limiter,
        })
    }

    /// Fail with `TargetNotFound` / `BranchNotFound` unless `owner/repo` has
    /// `branch`.
    pub async fn ensure_branch(&self, owner: &str, repo: &str, branch: &str) -> SourceResult<()> {
        let target = format!("{owner}/{repo}");
        let repo_url = self.endpoint(&format!("repos/{owner}/{repo}"))?;
        match self.get_json::<serde_json::Value>("repository lookup", repo_url).await {
            Err(SourceError::TargetNotFound(_)) => return Err(SourceError::TargetNotFound(target)),
            other => {
                other?;
            }
        }

        let branch_url = self.endpoint(&format!("repos/{owner}/{repo}/branches/{branch}"))?;
        match self.get_json::<serde_json::Value>("branch lookup", branch_url).await {
            Ok(_) => Ok(()),
            Err(SourceError::TargetNotFound(_)) => Err(SourceError::BranchNotFound {
                target,
                branch: branch.to_string(),
            }),
            Err(e) => Err(e),
        }
    }

    /// Pull request and issue totals from the search API.
    pub async fn repository_stats(&self, owner: &str, repo: &str) -> SourceResult<RepositoryStats> {
        let total_pull_requests = self.search_total(owner, repo, "pr").await?;
        let total_issues = self.search_total(owner, repo, "issue").await?;
        Ok(RepositoryStats {
            total_pull_requests,
            total_issues,
        })
    }

    async fn search_total(&self, owner: &str, repo: &str, kind: &str) -> SourceResult<u64> {
        let mut url = self.endpoint("search/issues")?;
        url.query_pairs_mut()
            .append_pair("q", &format!("repo:{owner}/{repo} type:{kind}"))
            .append_pair("per_page", "1");
        let total: SearchTotal = self.get_json("search", url).await?;
        Ok(total.total_count)
    }

    fn endpoint(&self, path: &str) -> SourceResult<Url> {
        self.api_base
            .join(path)
            .map_err(|e| SourceError::InvalidTarget(format!("bad API path {path}: {e}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        operation: &str,
        url: Url,
    ) -> SourceResult<T> {
        retry_with_backoff(operation, &self.retry, &self.limiter, |_| {
            let url = url.clone();
            async move {
                let mut request = self
                    .http
                    .get(url)
                    .header(ACCEPT, "application/vnd.github+json");
                if let Some(token) = &self.token {
                    request = request.header(AUTHORIZATION, format!("Bearer {token}"));
                }
                let response = request.send().await.map_err(|e| {
                    SourceError::Transient(format!("request failed: {}", e.without_url()))
                })?;

                if let Some(remaining) = header_u64(response.headers(), "x-ratelimit-remaining") {
                    self.limiter.record_remaining(remaining);
                }
                let status = response.status();
                if !status.is_success() {
                    let headers = response.headers().clone();
                    let body = response.text().await.unwrap_or_default();
                    return Err(classify_status(status, &headers, &body));
                }
                response.json::<T>().await.map_err(|e| {
                    SourceError::Transient(format!("bad API response: {}", e.without_url()))
                })
            }
        })
        .await
    }
}

/// Map a non-success API status onto the source taxonomy.
pub(crate) fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> SourceError {
    let detail = format!("GitHub API returned {status}");
    match status {
        StatusCode::UNAUTHORIZED => SourceError::AuthRejected(detail),
        StatusCode::NOT_FOUND => SourceError::TargetNotFound(detail),
        StatusCode::TOO_MANY_REQUESTS => SourceError::RateLimited {
            detail,
            retry_after: retry_after(headers),
        },
        StatusCode::FORBIDDEN
            if header_u64(headers, "x-ratelimit-remaining") == Some(0)
                || body.to_lowercase().contains("rate limit") =>
        {
            SourceError::RateLimited {
                detail,
                retry_after: retry_after(headers),
            }
        }
        StatusCode::FORBIDDEN => SourceError::AuthRejected(detail),
        s if s.is_server_error() => SourceError::Transient(detail),
        _ => SourceError::GitError(detail),
    }
}

fn header_u64(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}

/// `retry-after` seconds, else the distance to `x-ratelimit-reset`.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    if let Some(secs) = header_u64(headers, "retry-after") {
        return Some(Duration::from_secs(secs));
    }
    let reset = header_u64(headers, "x-ratelimit-reset")?;
    let now = chrono::Utc::now().timestamp().max(0) as u64;
    Some(Duration::from_secs(reset.saturating_sub(now)))
}

/// `(owner, repo)` for a github.com remote, `None` for any other host.
pub fn parse_github_repo(target: &str) -> Option<(String, String)> {
    let path = if let Some(rest) = target.strip_prefix("git@github.com:") {
        rest.to_string()
    } else {
        let url = Url::parse(target).ok()?;
        let host = url.host_str()?;
        if host != "github.com" && host != "www.github.com" {
            return None;
        }
        url.path().trim_start_matches('/').to_string()
    };
    let mut parts = path.trim_end_matches('/').splitn(3, '/');
    let owner = parts.next().filter(|s| !s.is_empty())?;
    let repo = parts.next().filter(|s| !s.is_empty())?;
    let repo = repo.strip_suffix(".git").unwrap_or(repo);
    Some((owner.to_string(), repo.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_github_repo() {
        assert_eq!(
            parse_github_repo("https://github.com/psf/requests"),
            Some(("psf".into(), "requests".into()))
        );
        assert_eq!(
            parse_github_repo("https://github.com/psf/requests.git/"),
            Some(("psf".into(), "requests".into()))
        );
        assert_eq!(
            parse_github_repo("git@github.com:org/tool.git"),
            Some(("org".into(), "tool".into()))
        );
        assert_eq!(parse_github_repo("https://gitlab.com/org/tool"), None);
        assert_eq!(parse_github_repo("https://github.com/org"), None);
    }

    #[test]
    fn test_classify_status() {
        let empty = HeaderMap::new();
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED, &empty, ""),
            SourceError::AuthRejected(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, &empty, "Resource not accessible"),
            SourceError::AuthRejected(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_GATEWAY, &empty, ""),
            SourceError::Transient(_)
        ));

        let mut limited = HeaderMap::new();
        limited.insert("x-ratelimit-remaining", HeaderValue::from_static("0"));
        limited.insert("retry-after", HeaderValue::from_static("7"));
        match classify_status(StatusCode::FORBIDDEN, &limited, "") {
            SourceError::RateLimited { retry_after, .. } => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)));
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn test_debug_redacts_token() {
        let client = GithubClient::new(
            "https://api.github.com",
            Some("ghp_secret".into()),
            RetryPolicy::default(),
            Arc::new(RateLimitState::new()),
        )
        .unwrap();
        let rendered = format!("{client:?}");
        assert!(!rendered.contains("ghp_secret"));
        assert!(rendered.contains("<redacted>"));
    }

    /// Serve canned responses keyed by request path.
    async fn serve(routes: Vec<(&'static str, &'static str, &'static str)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let routes = routes.clone();
                tokio::spawn(async move {
                    let mut buf = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => buf.extend_from_slice(&chunk[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&buf);
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let (status, body) = routes
                        .iter()
                        .find(|(p, _, _)| path.starts_with(p))
                        .map(|(_, s, b)| (*s, *b))
                        .unwrap_or(("404 Not Found", "{}"));
                    let response = format!(
                        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = socket.write_all(response.as_bytes()).await;
                });
            }
        });
        format!("http://{addr}")
    }

    fn client(base: &str) -> GithubClient {
        let policy = RetryPolicy {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 2,
        };
        GithubClient::new(base, None, policy, Arc::new(RateLimitState::new())).unwrap()
    }

    #[tokio::test]
    async fn test_missing_branch_is_branch_not_found() {
        let base = serve(vec![
            ("/repos/org/repo/branches/main", "200 OK", "{\"name\":\"main\"}"),
            ("/repos/org/repo/branches/", "404 Not Found", "{}"),
            ("/repos/org/repo", "200 OK", "{\"full_name\":\"org/repo\"}"),
        ])
        .await;
        let gh = client(&base);

        gh.ensure_branch("org", "repo", "main").await.unwrap();
        let err = gh.ensure_branch("org", "repo", "feature").await.unwrap_err();
        assert!(matches!(
            err,
            SourceError::BranchNotFound { ref branch, .. } if branch == "feature"
        ));
    }

    #[tokio::test]
    async fn test_missing_repository_is_target_not_found() {
        let base = serve(vec![]).await;
        let err = client(&base)
            .ensure_branch("org", "ghost", "main")
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::TargetNotFound(ref t) if t == "org/ghost"));
    }

    #[tokio::test]
    async fn test_repository_stats_from_search_totals() {
        let body = "{\"total_count\":12,\"items\":[]}";
        let base = serve(vec![("/search/issues", "200 OK", body)]).await;
        let stats = client(&base).repository_stats("org", "repo").await.unwrap();
        assert_eq!(stats.total_pull_requests, 12);
        assert_eq!(stats.total_issues, 12);
    }
}
