//! Template-input validators shared by the Compose Renderer and the Deploy
//! State Machine's `validate` step. These exist so identifiers never carry
//! shell metacharacters even before the universal quoting rule in
//! [`crate::ssh::quote`] is applied — defense in depth, not a substitute.

use std::net::IpAddr;
use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("app name '{0}' is invalid: must match [A-Za-z0-9][A-Za-z0-9._-]*")]
    AppName(String),
    #[error("branch '{0}' is invalid")]
    Branch(String),
    #[error("commit '{0}' is not a valid hex commit hash")]
    Commit(String),
    #[error("domain '{0}' is invalid")]
    Domain(String),
    #[error("repository URL '{0}' is invalid: {1}")]
    RepoUrl(String, String),
    #[error("cron expression '{0}' is invalid: expected 5 whitespace-separated fields")]
    Cron(String),
}

fn app_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").unwrap())
}

fn branch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9._/-]+$").unwrap())
}

fn commit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9a-f]{7,40}$").unwrap())
}

fn domain_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\*\.)?([A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)+[A-Za-z]{2,}$")
            .unwrap()
    })
}

pub fn app_name(value: &str) -> Result<(), ValidationError> {
    if app_name_re().is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::AppName(value.to_string()))
    }
}

pub fn branch(value: &str) -> Result<(), ValidationError> {
    if branch_re().is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::Branch(value.to_string()))
    }
}

pub fn commit(value: &str) -> Result<(), ValidationError> {
    if commit_re().is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::Commit(value.to_string()))
    }
}

pub fn domain(value: &str) -> Result<(), ValidationError> {
    if domain_re().is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::Domain(value.to_string()))
    }
}

/// `https://...git`; hostname must not be loopback, link-local, private, or
/// a bare `.local`/`localhost` name. Resolution is purely syntactic here —
/// no DNS lookup — matching the renderer's "pure function" contract.
pub fn repo_url(value: &str) -> Result<(), ValidationError> {
    let url = url_lite::parse(value)
        .ok_or_else(|| ValidationError::RepoUrl(value.to_string(), "not a URL".into()))?;

    if url.scheme != "https" {
        return Err(ValidationError::RepoUrl(
            value.to_string(),
            "must use https://".into(),
        ));
    }
    if !url.path.ends_with(".git") {
        return Err(ValidationError::RepoUrl(
            value.to_string(),
            "must end in .git".into(),
        ));
    }

    let host = url.host.to_ascii_lowercase();
    if host == "localhost" || host.ends_with(".local") {
        return Err(ValidationError::RepoUrl(
            value.to_string(),
            "hostname must not be localhost or .local".into(),
        ));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_disallowed_ip(&ip) {
            return Err(ValidationError::RepoUrl(
                value.to_string(),
                "hostname resolves to a loopback/link-local/private address".into(),
            ));
        }
    }

    Ok(())
}

/// Extracts just the hostname from a URL, for callers that need to gate a
/// behavior on a host allow-list (e.g. deciding whether to inject a source
/// integration's credentials into a clone URL) without re-validating the
/// whole thing as a repo URL.
pub fn hostname(value: &str) -> Option<String> {
    url_lite::parse(value).map(|p| p.host)
}

fn is_disallowed_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_link_local() || v4.is_private() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00,
    }
}

pub fn cron(value: &str) -> Result<(), ValidationError> {
    let fields: Vec<&str> = value.split_whitespace().collect();
    if fields.len() == 5 {
        Ok(())
    } else {
        Err(ValidationError::Cron(value.to_string()))
    }
}

/// A deliberately tiny URL splitter: we only need scheme/host/path for the
/// loopback/private checks above, and pulling in a full URL crate for three
/// fields would be disproportionate to what the renderer needs.
mod url_lite {
    pub struct Parsed<'a> {
        pub scheme: &'a str,
        pub host: String,
        pub path: &'a str,
    }

    pub fn parse(value: &str) -> Option<Parsed<'_>> {
        let (scheme, rest) = value.split_once("://")?;
        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        let host = authority.rsplit_once('@').map(|(_, h)| h).unwrap_or(authority);
        let host = host.split(':').next().unwrap_or(host).to_string();
        if host.is_empty() {
            return None;
        }
        Some(Parsed {
            scheme,
            host,
            path: if path.is_empty() { "" } else { path } ,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn app_name_accepts_and_rejects() {
        assert!(app_name("api").is_ok());
        assert!(app_name("api-v2.1_x").is_ok());
        assert!(app_name("-api").is_err());
        assert!(app_name("api; rm -rf /").is_err());
    }

    #[test]
    fn commit_requires_hex() {
        assert!(commit("abc123def456").is_ok());
        assert!(commit("not-a-hash!").is_err());
        assert!(commit("abc12").is_err());
    }

    #[test]
    fn domain_allows_wildcard_prefix() {
        assert!(domain("api.example.com").is_ok());
        assert!(domain("*.example.com").is_ok());
        assert!(domain("not a domain").is_err());
    }

    #[test]
    fn repo_url_rejects_local_and_non_git() {
        assert!(repo_url("https://github.com/org/repo.git").is_ok());
        assert!(repo_url("http://github.com/org/repo.git").is_err());
        assert!(repo_url("https://github.com/org/repo").is_err());
        assert!(repo_url("https://localhost/org/repo.git").is_err());
        assert!(repo_url("https://127.0.0.1/org/repo.git").is_err());
        assert!(repo_url("https://192.168.1.5/org/repo.git").is_err());
    }

    #[test]
    fn cron_requires_five_fields() {
        assert!(cron("0 3 * * *").is_ok());
        assert!(cron("0 3 * *").is_err());
        assert!(cron("0 3 * * * *").is_err());
    }
}
