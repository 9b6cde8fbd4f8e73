//! Source-control collaborator: commits the page, its media and the updated
//! navigation on a fresh branch and opens the pull request.

use crate::error::{ChangelogError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{NaiveDate, NaiveDateTime};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;

const FILE_MODE_REGULAR: &str = "100644";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("changelog-bot/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One file to land in a commit, at a repository-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitFile {
    pub path: String,
    pub content: Vec<u8>,
}

impl CommitFile {
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PullRequest {
    pub title: String,
    pub head: String,
    pub base: String,
    pub body: String,
    pub draft: bool,
    #[serde(skip)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    pub number: u64,
    #[serde(rename = "html_url")]
    pub url: String,
}

// ---------------------------------------------------------------------------
// SourceControl
// ---------------------------------------------------------------------------

pub trait SourceControl: Send + Sync {
    /// Contents of `path` at `reference`, or `None` if it does not exist there.
    fn read_file(
        &self,
        path: &str,
        reference: &str,
    ) -> impl Future<Output = Result<Option<Vec<u8>>>> + Send;

    /// Create branch `name` at the head of `from`. Returns the head sha.
    fn create_branch(&self, name: &str, from: &str) -> impl Future<Output = Result<String>> + Send;

    /// Land all `files` on `branch` as a single commit. Returns the commit sha.
    fn commit_files(
        &self,
        branch: &str,
        files: &[CommitFile],
        message: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn open_pull_request(
        &self,
        pr: &PullRequest,
    ) -> impl Future<Output = Result<PullRequestRef>> + Send;
}

// ---------------------------------------------------------------------------
// Branch / PR text
// ---------------------------------------------------------------------------

pub fn branch_name(now: NaiveDateTime) -> String {
    format!("changelog/{}", now.format("%Y%m%d-%H%M%S"))
}

pub fn pr_title(date: NaiveDate) -> String {
    format!("[BOT] Changelog: {}", date.format("%Y-%m-%d"))
}

pub fn pr_body(date: NaiveDate, changelog_path: &str, media_count: usize, labels: &[String]) -> String {
    let mut changes = format!("- Added new changelog file: `{changelog_path}`\n");
    if media_count > 0 {
        changes.push_str(&format!("- Added {media_count} media file(s)\n"));
    }
    changes.push_str("- Updated docs.json with new changelog entry\n");

    let label_lines: String = labels.iter().map(|l| format!("/label {l}\n")).collect();

    format!(
        "This is an auto-generated pull request from the Changelog Bot

## Summary
This PR contains an automated changelog for:
**{date}**

## Changes
{changes}
## Review Guidelines
Please check:
- [ ] Content accuracy and completeness
- [ ] Formatting and structure (follows changelog template)
- [ ] Links and references are valid
- [ ] Media files are correctly referenced
- [ ] Sensitive information exposure
- [ ] Brand voice and tone consistency

## Note
This PR is created as a draft to allow for human review before publishing.

{label_lines}",
        date = date.format("%Y-%m-%d"),
    )
}

// ---------------------------------------------------------------------------
// GitHubClient
// ---------------------------------------------------------------------------

pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
    /// `owner/name`
    repo: String,
}

#[derive(Deserialize)]
struct Sha {
    sha: String,
}

#[derive(Deserialize)]
struct RefObject {
    object: Sha,
}

#[derive(Deserialize)]
struct CommitObject {
    tree: Sha,
}

#[derive(Deserialize)]
struct Contents {
    #[serde(default)]
    content: String,
    #[serde(default)]
    encoding: String,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

impl GitHubClient {
    pub fn new(
        http: reqwest::Client,
        api_url: impl Into<String>,
        token: impl Into<String>,
        repo: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            repo: repo.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/repos/{}/{path}", self.api_url, self.repo)
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<reqwest::Response> {
        let mut req = self
            .http
            .request(method, self.url(path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .header("User-Agent", USER_AGENT);
        if let Some(body) = body {
            req = req.json(body);
        }
        Ok(req.send().await?)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let label = format!("{method} {path}");
        let resp = self.send(method, path, body).await?;
        let resp = check(&label, resp).await?;
        Ok(resp.json().await?)
    }

    async fn branch_head(&self, branch: &str) -> Result<String> {
        let r: RefObject = self
            .call(Method::GET, &format!("git/ref/heads/{branch}"), None)
            .await?;
        Ok(r.object.sha)
    }

    async fn add_labels(&self, number: u64, labels: &[String]) -> Result<()> {
        let body = json!({ "labels": labels });
        let _: Value = self
            .call(Method::POST, &format!("issues/{number}/labels"), Some(&body))
            .await?;
        Ok(())
    }
}

async fn check(label: &str, resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiError>(&text)
        .map(|e| e.message)
        .ok()
        .filter(|m| !m.is_empty())
        .unwrap_or(text);
    Err(ChangelogError::github(format!("{label}: {status} {message}")))
}

impl SourceControl for GitHubClient {
    async fn read_file(&self, path: &str, reference: &str) -> Result<Option<Vec<u8>>> {
        let endpoint = format!("contents/{path}?ref={reference}");
        let resp = self.send(Method::GET, &endpoint, None).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let contents: Contents = check(&format!("GET {endpoint}"), resp).await?.json().await?;
        if contents.encoding != "base64" {
            return Err(ChangelogError::github(format!(
                "{path}: unsupported content encoding '{}'",
                contents.encoding
            )));
        }
        let packed: String = contents.content.split_whitespace().collect();
        BASE64
            .decode(packed)
            .map(Some)
            .map_err(|e| ChangelogError::github(format!("{path}: {e}")))
    }

    async fn create_branch(&self, name: &str, from: &str) -> Result<String> {
        let sha = self.branch_head(from).await?;
        let body = json!({ "ref": format!("refs/heads/{name}"), "sha": sha });
        let _: Value = self.call(Method::POST, "git/refs", Some(&body)).await?;
        tracing::info!(branch = name, from, "created branch");
        Ok(sha)
    }

    async fn commit_files(&self, branch: &str, files: &[CommitFile], message: &str) -> Result<String> {
        let parent = self.branch_head(branch).await?;
        let parent_commit: CommitObject = self
            .call(Method::GET, &format!("git/commits/{parent}"), None)
            .await?;

        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let body = json!({ "content": BASE64.encode(&file.content), "encoding": "base64" });
            let blob: Sha = self.call(Method::POST, "git/blobs", Some(&body)).await?;
            tracing::debug!(path = %file.path, sha = %blob.sha, "created blob");
            entries.push(json!({
                "path": file.path,
                "mode": FILE_MODE_REGULAR,
                "type": "blob",
                "sha": blob.sha,
            }));
        }

        let tree_body = json!({ "base_tree": parent_commit.tree.sha, "tree": entries });
        let tree: Sha = self.call(Method::POST, "git/trees", Some(&tree_body)).await?;

        let commit_body = json!({ "message": message, "tree": tree.sha, "parents": [parent] });
        let commit: Sha = self.call(Method::POST, "git/commits", Some(&commit_body)).await?;

        let ref_body = json!({ "sha": commit.sha });
        let _: Value = self
            .call(Method::PATCH, &format!("git/refs/heads/{branch}"), Some(&ref_body))
            .await?;

        tracing::info!(branch, files = files.len(), sha = %commit.sha, "committed files");
        Ok(commit.sha)
    }

    async fn open_pull_request(&self, pr: &PullRequest) -> Result<PullRequestRef> {
        let body = serde_json::to_value(pr)?;
        let created: PullRequestRef = self.call(Method::POST, "pulls", Some(&body)).await?;
        tracing::info!(number = created.number, url = %created.url, "opened pull request");

        if !pr.labels.is_empty() {
            if let Err(e) = self.add_labels(created.number, &pr.labels).await {
                tracing::warn!(number = created.number, error = %e, "could not apply labels");
            }
        }
        Ok(created)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::Server) -> GitHubClient {
        GitHubClient::new(reqwest::Client::new(), server.url(), "ghp-test", "acme/docs")
    }

    #[test]
    fn branch_and_title_formats() {
        let now = NaiveDate::from_ymd_opt(2025, 1, 15)
            .unwrap()
            .and_hms_opt(9, 5, 7)
            .unwrap();
        assert_eq!(branch_name(now), "changelog/20250115-090507");
        assert_eq!(
            pr_title(NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()),
            "[BOT] Changelog: 2025-01-15"
        );
    }

    #[test]
    fn body_mentions_media_and_labels() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let labels = vec!["bot".to_string(), "changelog".to_string()];
        let body = pr_body(date, "docs/updates/2025/01/15/changelog.mdx", 3, &labels);
        assert!(body.starts_with("This is an auto-generated pull request from the Changelog Bot"));
        assert!(body.contains("**2025-01-15**"));
        assert!(body.contains("- Added 3 media file(s)"));
        assert!(body.contains("/label bot\n/label changelog\n"));

        let none = pr_body(date, "x.mdx", 0, &[]);
        assert!(!none.contains("media file"));
        assert!(!none.contains("/label"));
    }

    #[tokio::test]
    async fn read_file_decodes_and_handles_missing() {
        let mut server = mockito::Server::new_async().await;
        let encoded = BASE64.encode(br#"{"navigation":{}}"#);
        let wrapped = format!("{}\n{}", &encoded[..8], &encoded[8..]);
        server
            .mock("GET", "/repos/acme/docs/contents/docs/docs.json")
            .match_query(Matcher::UrlEncoded("ref".into(), "main".into()))
            .match_header("authorization", "Bearer ghp-test")
            .with_body(json!({ "content": wrapped, "encoding": "base64" }).to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/docs/contents/missing.json")
            .match_query(Matcher::Any)
            .with_status(404)
            .with_body(r#"{"message":"Not Found"}"#)
            .create_async()
            .await;

        let gh = client(&server);
        let bytes = gh.read_file("docs/docs.json", "main").await.unwrap().unwrap();
        assert_eq!(bytes, br#"{"navigation":{}}"#);
        assert!(gh.read_file("missing.json", "main").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_goes_blobs_tree_commit_ref() {
        let mut server = mockito::Server::new_async().await;
        let head = server
            .mock("GET", "/repos/acme/docs/git/ref/heads/changelog/20250115-090507")
            .with_body(r#"{"object":{"sha":"parent1"}}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/repos/acme/docs/git/commits/parent1")
            .with_body(r#"{"sha":"parent1","tree":{"sha":"basetree"}}"#)
            .create_async()
            .await;
        let blobs = server
            .mock("POST", "/repos/acme/docs/git/blobs")
            .match_body(Matcher::PartialJson(json!({ "encoding": "base64" })))
            .with_status(201)
            .with_body(r#"{"sha":"blob"}"#)
            .expect(2)
            .create_async()
            .await;
        let tree = server
            .mock("POST", "/repos/acme/docs/git/trees")
            .match_body(Matcher::PartialJson(json!({ "base_tree": "basetree" })))
            .with_status(201)
            .with_body(r#"{"sha":"newtree"}"#)
            .create_async()
            .await;
        let commit = server
            .mock("POST", "/repos/acme/docs/git/commits")
            .match_body(Matcher::PartialJson(json!({
                "tree": "newtree",
                "parents": ["parent1"],
                "message": "Add changelog for 2025-01-15"
            })))
            .with_status(201)
            .with_body(r#"{"sha":"commit1"}"#)
            .create_async()
            .await;
        let update = server
            .mock("PATCH", "/repos/acme/docs/git/refs/heads/changelog/20250115-090507")
            .match_body(Matcher::PartialJson(json!({ "sha": "commit1" })))
            .with_body(r#"{"object":{"sha":"commit1"}}"#)
            .create_async()
            .await;

        let files = vec![
            CommitFile::new("docs/updates/2025/01/15/changelog.mdx", "# hi"),
            CommitFile::new("docs/images/changelog/2025-01-15/a.png", vec![0u8, 1, 2]),
        ];
        let sha = client(&server)
            .commit_files("changelog/20250115-090507", &files, "Add changelog for 2025-01-15")
            .await
            .unwrap();

        assert_eq!(sha, "commit1");
        head.assert_async().await;
        blobs.assert_async().await;
        tree.assert_async().await;
        commit.assert_async().await;
        update.assert_async().await;
    }

    #[tokio::test]
    async fn create_branch_points_at_base_head() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/docs/git/ref/heads/main")
            .with_body(r#"{"object":{"sha":"mainhead"}}"#)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/repos/acme/docs/git/refs")
            .match_body(Matcher::Json(json!({
                "ref": "refs/heads/changelog/x",
                "sha": "mainhead"
            })))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        let sha = client(&server).create_branch("changelog/x", "main").await.unwrap();
        assert_eq!(sha, "mainhead");
        create.assert_async().await;
    }

    #[tokio::test]
    async fn opens_draft_pr_and_labels_it() {
        let mut server = mockito::Server::new_async().await;
        let pulls = server
            .mock("POST", "/repos/acme/docs/pulls")
            .match_body(Matcher::PartialJson(json!({
                "title": "[BOT] Changelog: 2025-01-15",
                "head": "changelog/x",
                "base": "main",
                "draft": true
            })))
            .with_status(201)
            .with_body(r#"{"number":42,"html_url":"https://github.com/acme/docs/pull/42"}"#)
            .create_async()
            .await;
        let labels = server
            .mock("POST", "/repos/acme/docs/issues/42/labels")
            .match_body(Matcher::Json(json!({ "labels": ["bot", "changelog"] })))
            .with_body("[]")
            .create_async()
            .await;

        let pr = PullRequest {
            title: "[BOT] Changelog: 2025-01-15".into(),
            head: "changelog/x".into(),
            base: "main".into(),
            body: "body".into(),
            draft: true,
            labels: vec!["bot".into(), "changelog".into()],
        };
        let opened = client(&server).open_pull_request(&pr).await.unwrap();
        assert_eq!(opened.number, 42);
        assert_eq!(opened.url, "https://github.com/acme/docs/pull/42");
        pulls.assert_async().await;
        labels.assert_async().await;
    }

    #[tokio::test]
    async fn label_failure_does_not_fail_the_pr() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/repos/acme/docs/pulls")
            .with_status(201)
            .with_body(r#"{"number":7,"html_url":"https://github.com/acme/docs/pull/7"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/repos/acme/docs/issues/7/labels")
            .with_status(403)
            .with_body(r#"{"message":"Resource not accessible"}"#)
            .create_async()
            .await;

        let pr = PullRequest {
            title: "t".into(),
            head: "h".into(),
            base: "main".into(),
            body: String::new(),
            draft: true,
            labels: vec!["bot".into()],
        };
        assert_eq!(client(&server).open_pull_request(&pr).await.unwrap().number, 7);
    }

    #[tokio::test]
    async fn api_errors_carry_status_and_message() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/repos/acme/docs/git/ref/heads/main")
            .with_status(401)
            .with_body(r#"{"message":"Bad credentials"}"#)
            .create_async()
            .await;

        let err = client(&server).create_branch("b", "main").await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.starts_with("github error"), "{msg}");
        assert!(msg.contains("401"));
        assert!(msg.contains("Bad credentials"));
    }
}
