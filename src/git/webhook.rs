//! # Webhook Events
//!
//! Turns GitHub and GitLab webhook deliveries into [`WebhookEvent`]s.
//!
//! Deliveries are authenticated against the Application's webhook secret:
//! GitHub signs the body with HMAC-SHA256 (`X-Hub-Signature-256`), GitLab
//! echoes the secret in `X-Gitlab-Token`.

use super::RepoLocation;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

const GITHUB_EVENT_HEADER: &str = "x-github-event";
const GITHUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";
const GITLAB_EVENT_HEADER: &str = "x-gitlab-event";
const GITLAB_TOKEN_HEADER: &str = "x-gitlab-token";

#[derive(Debug, Error)]
pub enum WebhookParseError {
    #[error("webhook signature validation failed: {0}")]
    Signature(&'static str),
    #[error("cannot decode {provider} webhook payload: {message}")]
    Decode {
        provider: WebhookProvider,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookProvider {
    GitHub,
    GitLab,
}

impl WebhookProvider {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookProvider::GitHub => "github",
            WebhookProvider::GitLab => "gitlab",
        }
    }
}

impl fmt::Display for WebhookProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Push,
    PullRequest,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    /// Full ref, e.g. `refs/heads/main`
    pub git_ref: String,
    /// Commit the ref now points at
    pub after: String,
}

impl PushEvent {
    /// Branch or tag name without the `refs/heads/` / `refs/tags/` prefix
    #[must_use]
    pub fn short_ref(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .or_else(|| self.git_ref.strip_prefix("refs/tags/"))
            .unwrap_or(&self.git_ref)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub provider: WebhookProvider,
    pub event_type: EventType,
    /// `host/owner/repo` of the repository that sent the event
    pub repository: Option<String>,
    pub push: Option<PushEvent>,
}

#[derive(Deserialize)]
struct GitHubRepository {
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    clone_url: Option<String>,
}

#[derive(Deserialize)]
struct GitHubPayload {
    #[serde(default, rename = "ref")]
    git_ref: Option<String>,
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    repository: Option<GitHubRepository>,
}

#[derive(Deserialize)]
struct GitLabProject {
    #[serde(default)]
    web_url: Option<String>,
    #[serde(default)]
    git_http_url: Option<String>,
}

#[derive(Deserialize)]
struct GitLabPayload {
    #[serde(default, rename = "ref")]
    git_ref: Option<String>,
    #[serde(default)]
    after: Option<String>,
    #[serde(default)]
    checkout_sha: Option<String>,
    #[serde(default)]
    project: Option<GitLabProject>,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn canonical_repo(urls: [Option<&String>; 2]) -> Option<String> {
    urls.into_iter()
        .flatten()
        .find_map(|url| RepoLocation::parse(url).ok())
        .map(|repo| repo.canonical())
}

/// Parse a delivery. Requests from neither GitHub nor GitLab yield `Ok(None)`.
///
/// When `secret` is set the delivery must authenticate against it.
pub fn parse_webhook(
    headers: &HeaderMap,
    body: &[u8],
    secret: Option<&str>,
) -> Result<Option<WebhookEvent>, WebhookParseError> {
    let secret = secret.filter(|s| !s.is_empty());
    if let Some(event) = header(headers, GITHUB_EVENT_HEADER) {
        if let Some(secret) = secret {
            verify_github_signature(secret, header(headers, GITHUB_SIGNATURE_HEADER), body)?;
        }
        return parse_github(event, body).map(Some);
    }
    if let Some(event) = header(headers, GITLAB_EVENT_HEADER) {
        if let Some(secret) = secret {
            verify_gitlab_token(secret, header(headers, GITLAB_TOKEN_HEADER))?;
        }
        return parse_gitlab(event, body).map(Some);
    }
    Ok(None)
}

fn parse_github(event: &str, body: &[u8]) -> Result<WebhookEvent, WebhookParseError> {
    let event_type = match event {
        "push" => EventType::Push,
        "pull_request" => EventType::PullRequest,
        _ => EventType::Other,
    };
    let payload: GitHubPayload =
        serde_json::from_slice(body).map_err(|e| WebhookParseError::Decode {
            provider: WebhookProvider::GitHub,
            message: e.to_string(),
        })?;
    let repository = payload
        .repository
        .as_ref()
        .and_then(|r| canonical_repo([r.html_url.as_ref(), r.clone_url.as_ref()]));
    let push = match (event_type, payload.git_ref) {
        (EventType::Push, Some(git_ref)) => Some(PushEvent {
            git_ref,
            after: payload.after.unwrap_or_default(),
        }),
        _ => None,
    };
    Ok(WebhookEvent {
        provider: WebhookProvider::GitHub,
        event_type,
        repository,
        push,
    })
}

fn parse_gitlab(event: &str, body: &[u8]) -> Result<WebhookEvent, WebhookParseError> {
    let event_type = match event {
        "Push Hook" | "Tag Push Hook" => EventType::Push,
        "Merge Request Hook" => EventType::PullRequest,
        _ => EventType::Other,
    };
    let payload: GitLabPayload =
        serde_json::from_slice(body).map_err(|e| WebhookParseError::Decode {
            provider: WebhookProvider::GitLab,
            message: e.to_string(),
        })?;
    let repository = payload
        .project
        .as_ref()
        .and_then(|p| canonical_repo([p.web_url.as_ref(), p.git_http_url.as_ref()]));
    let push = match (event_type, payload.git_ref) {
        (EventType::Push, Some(git_ref)) => Some(PushEvent {
            git_ref,
            after: payload
                .after
                .or(payload.checkout_sha)
                .unwrap_or_default(),
        }),
        _ => None,
    };
    Ok(WebhookEvent {
        provider: WebhookProvider::GitLab,
        event_type,
        repository,
        push,
    })
}

/// Check `sha256=<hex>` against the HMAC of `body`
pub fn verify_github_signature(
    secret: &str,
    signature: Option<&str>,
    body: &[u8],
) -> Result<(), WebhookParseError> {
    let signature = signature.ok_or(WebhookParseError::Signature("missing X-Hub-Signature-256"))?;
    let hex_digest = signature
        .strip_prefix("sha256=")
        .ok_or(WebhookParseError::Signature("signature is not sha256"))?;
    let expected = hex::decode(hex_digest)
        .map_err(|_e| WebhookParseError::Signature("signature is not hex"))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_e| WebhookParseError::Signature("invalid secret"))?;
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_e| WebhookParseError::Signature("signature mismatch"))
}

fn verify_gitlab_token(secret: &str, token: Option<&str>) -> Result<(), WebhookParseError> {
    let token = token.ok_or(WebhookParseError::Signature("missing X-Gitlab-Token"))?;
    let equal = token.len() == secret.len()
        && token
            .bytes()
            .zip(secret.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0;
    if equal {
        Ok(())
    } else {
        Err(WebhookParseError::Signature("token mismatch"))
    }
}

/// `sha256=<hex>` signature GitHub would send for `body`
pub fn github_signature(secret: &str, body: &[u8]) -> Result<String, WebhookParseError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_e| WebhookParseError::Signature("invalid secret"))?;
    mac.update(body);
    Ok(format!("sha256={}", hex::encode(mac.finalize().into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const PUSH_BODY: &str = r#"{
        "ref": "refs/heads/main",
        "after": "0d1a26e67d8f5eaf1f6ba5c57fc3c7d91ac0fd1c",
        "repository": {
            "full_name": "Owner/Repo",
            "html_url": "https://github.com/Owner/Repo",
            "clone_url": "https://github.com/Owner/Repo.git"
        }
    }"#;

    fn github_headers(event: &str, signature: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(GITHUB_EVENT_HEADER, HeaderValue::from_str(event).unwrap());
        if let Some(sig) = signature {
            headers.insert(GITHUB_SIGNATURE_HEADER, HeaderValue::from_str(sig).unwrap());
        }
        headers
    }

    #[test]
    fn test_github_push_with_valid_signature() {
        let signature = github_signature("s3cr3t", PUSH_BODY.as_bytes()).unwrap();
        let event = parse_webhook(
            &github_headers("push", Some(&signature)),
            PUSH_BODY.as_bytes(),
            Some("s3cr3t"),
        )
        .unwrap()
        .unwrap();
        assert_eq!(event.event_type, EventType::Push);
        assert_eq!(event.repository.as_deref(), Some("github.com/owner/repo"));
        let push = event.push.unwrap();
        assert_eq!(push.short_ref(), "main");
        assert!(push.after.starts_with("0d1a26"));
    }

    #[test]
    fn test_github_bad_signature_rejected() {
        let signature = github_signature("other", PUSH_BODY.as_bytes()).unwrap();
        let err = parse_webhook(
            &github_headers("push", Some(&signature)),
            PUSH_BODY.as_bytes(),
            Some("s3cr3t"),
        )
        .unwrap_err();
        assert!(matches!(err, WebhookParseError::Signature(_)));

        let err = parse_webhook(&github_headers("push", None), PUSH_BODY.as_bytes(), Some("s3cr3t"))
            .unwrap_err();
        assert!(matches!(err, WebhookParseError::Signature(_)));
    }

    #[test]
    fn test_github_without_secret_skips_validation() {
        let event = parse_webhook(&github_headers("ping", None), b"{}", None)
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type, EventType::Other);
        assert!(event.push.is_none());
    }

    #[test]
    fn test_gitlab_push_hook() {
        let mut headers = HeaderMap::new();
        headers.insert(GITLAB_EVENT_HEADER, HeaderValue::from_static("Tag Push Hook"));
        headers.insert(GITLAB_TOKEN_HEADER, HeaderValue::from_static("s3cr3t"));
        let body = br#"{
            "ref": "refs/tags/v1.0.0",
            "checkout_sha": "abc123",
            "project": {"web_url": "https://gitlab.example.com/group/app"}
        }"#;
        let event = parse_webhook(&headers, body, Some("s3cr3t"))
            .unwrap()
            .unwrap();
        assert_eq!(event.provider, WebhookProvider::GitLab);
        assert_eq!(event.event_type, EventType::Push);
        assert_eq!(
            event.repository.as_deref(),
            Some("gitlab.example.com/group/app")
        );
        let push = event.push.unwrap();
        assert_eq!(push.short_ref(), "v1.0.0");
        assert_eq!(push.after, "abc123");
    }

    #[test]
    fn test_gitlab_wrong_token_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(GITLAB_EVENT_HEADER, HeaderValue::from_static("Push Hook"));
        headers.insert(GITLAB_TOKEN_HEADER, HeaderValue::from_static("nope"));
        assert!(parse_webhook(&headers, b"{}", Some("s3cr3t")).is_err());
    }

    #[test]
    fn test_unknown_sender_is_ignored() {
        assert!(parse_webhook(&HeaderMap::new(), b"{}", Some("s"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_malformed_body_is_decode_error() {
        let err = parse_webhook(&github_headers("push", None), b"not json", None).unwrap_err();
        assert!(matches!(err, WebhookParseError::Decode { .. }));
    }
}
