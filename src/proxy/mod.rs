//! Reverse-proxy configuration store. Model: the proxy on the remote host
//! runs as a container with a file provider watching `<base>/traefik/conf.d/`;
//! any file written there is picked up within a short debounce window — no
//! reload signal required.

use serde::Serialize;
use thiserror::Error;

use crate::config::validate::{self, ValidationError};
use crate::ssh::{quote, ExecError, SshSession};

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("malformed proxy config file: {0}")]
    Malformed(String),
}

/// domain → replace any non `[A-Za-z0-9-]` with `-`, trim leading/trailing
/// `-`. Two distinct domains cannot collide after sanitisation in practice
/// because DNS label syntax already guarantees the reverse.
pub fn sanitise_filename(domain: &str) -> String {
    let replaced: String = domain
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    replaced.trim_matches('-').to_string()
}

fn conf_dir(base: &str) -> String {
    format!("{}/traefik/conf.d", base)
}

fn conf_path(base: &str, domain: &str) -> String {
    format!("{}/{}.yml", conf_dir(base), sanitise_filename(domain))
}

#[derive(Serialize)]
struct RouterDoc {
    http: HttpBlock,
}

#[derive(Serialize)]
struct HttpBlock {
    routers: std::collections::BTreeMap<String, Router>,
    services: std::collections::BTreeMap<String, Service>,
}

#[derive(Serialize)]
struct Router {
    rule: String,
    service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    entrypoints: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<TlsBlock>,
}

#[derive(Serialize)]
struct TlsBlock {
    #[serde(rename = "certResolver")]
    cert_resolver: String,
}

#[derive(Serialize)]
struct Service {
    #[serde(rename = "loadBalancer")]
    load_balancer: LoadBalancer,
}

#[derive(Serialize)]
struct LoadBalancer {
    servers: Vec<ServerUrl>,
}

#[derive(Serialize)]
struct ServerUrl {
    url: String,
}

fn build_doc(domain: &str, port: u16, app_name: Option<&str>) -> RouterDoc {
    let router_key = sanitise_filename(domain);
    let upstream = match app_name {
        Some(name) => format!("http://dockhand-{}:{}", name, port),
        None => format!("http://host.docker.internal:{}", port),
    };

    let mut routers = std::collections::BTreeMap::new();
    routers.insert(
        format!("{}-https", router_key),
        Router {
            rule: format!("Host(`{}`)", domain),
            service: router_key.clone(),
            entrypoints: Some(vec!["websecure".into()]),
            tls: Some(TlsBlock {
                cert_resolver: "letsencrypt".into(),
            }),
        },
    );
    routers.insert(
        format!("{}-http", router_key),
        Router {
            rule: format!("Host(`{}`)", domain),
            service: router_key.clone(),
            entrypoints: Some(vec!["web".into()]),
            tls: None,
        },
    );

    let mut services = std::collections::BTreeMap::new();
    services.insert(
        router_key,
        Service {
            load_balancer: LoadBalancer {
                servers: vec![ServerUrl { url: upstream }],
            },
        },
    );

    RouterDoc {
        http: HttpBlock { routers, services },
    }
}

/// Writes a YAML-serialised document declaring two routers (HTTPS with
/// auto-issued cert, and HTTP) on `Host(\`<domain>\`)` rules, and one
/// load-balancer service pointing at the app container (or a host-gateway
/// alias when `app_name` is absent). Also performs a non-fatal DNS
/// pre-check: resolution failure only logs a warning, it never blocks the
/// write — wildcard domains are never resolved.
pub async fn add_domain(
    session: &SshSession,
    base: &str,
    domain: &str,
    port: u16,
    app_name: Option<&str>,
) -> Result<(), ProxyError> {
    validate::domain(domain)?;

    if !domain.starts_with("*.") {
        if tokio::net::lookup_host((domain, 0)).await.is_err() {
            tracing::warn!(%domain, "DNS does not yet resolve — the route will work once it does");
        }
    }

    let doc = build_doc(domain, port, app_name);
    let yaml = serde_yaml::to_string(&doc).map_err(|e| ProxyError::Malformed(e.to_string()))?;

    session
        .run_checked(
            &format!("mkdir -p {}", quote(&conf_dir(base))),
            std::time::Duration::from_secs(15),
        )
        .await?;
    session.upload_string(&yaml, &conf_path(base, domain)).await?;
    Ok(())
}

/// Deletes the corresponding file. Tolerates a missing file (idempotent
/// destroy) — this was undocumented in the source behaviour; it is
/// intentional here and recorded as such.
pub async fn remove_domain(session: &SshSession, base: &str, domain: &str) -> Result<(), ProxyError> {
    let path = conf_path(base, domain);
    session
        .run(&format!("rm -f {}", quote(&path)), std::time::Duration::from_secs(15))
        .await?;
    Ok(())
}

/// Globs `conf.d/*.yml`, parses each YAML, and extracts the first
/// load-balancer URL and host rule. Malformed files are skipped rather than
/// failing the whole listing.
pub async fn list_domains(session: &SshSession, base: &str) -> Result<Vec<(String, u16)>, ProxyError> {
    let dir = conf_dir(base);
    let (listing, _, code) = session
        .run(
            &format!("ls {}/*.yml 2>/dev/null", quote(&dir)),
            std::time::Duration::from_secs(15),
        )
        .await?;
    if code != 0 {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    for path in listing.lines().filter(|l| !l.trim().is_empty()) {
        let content = match session.read_remote_file(path.trim()).await {
            Ok(c) => c,
            Err(_) => continue,
        };
        if let Some((domain, port)) = parse_domain_file(&content) {
            out.push((domain, port));
        }
    }
    Ok(out)
}

fn parse_domain_file(content: &str) -> Option<(String, u16)> {
    let doc: serde_yaml::Value = serde_yaml::from_str(content).ok()?;
    let routers = doc.get("http")?.get("routers")?.as_mapping()?;
    let rule = routers.values().find_map(|r| r.get("rule")?.as_str())?;
    let domain = rule.strip_prefix("Host(`")?.strip_suffix("`)")?.to_string();

    let services = doc.get("http")?.get("services")?.as_mapping()?;
    let url = services
        .values()
        .next()?
        .get("loadBalancer")?
        .get("servers")?
        .as_sequence()?
        .first()?
        .get("url")?
        .as_str()?;
    let port: u16 = url.rsplit(':').next()?.parse().ok()?;

    Some((domain, port))
}

/// Polls the proxy's admin API at `127.0.0.1:8080/api/http/routers/<sanitised>@file`;
/// presence of the domain in the response is success.
pub async fn validate_domain_config(session: &SshSession, domain: &str) -> Result<bool, ProxyError> {
    let router_key = sanitise_filename(domain);
    let url = format!(
        "http://127.0.0.1:8080/api/http/routers/{}-https@file",
        router_key
    );
    let (stdout, _, code) = session
        .run(
            &format!("curl -s -o /dev/null -w '%{{http_code}}' {}", quote(&url)),
            std::time::Duration::from_secs(10),
        )
        .await?;
    Ok(code == 0 && stdout.trim() == "200")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitise_replaces_metacharacters() {
        assert_eq!(sanitise_filename("api.example.com"), "api-example-com");
        assert_eq!(sanitise_filename("-weird-.com-"), "weird--com");
    }

    #[test]
    fn add_domain_output_round_trips() {
        let doc = build_doc("api.example.com", 8001, Some("api"));
        let yaml = serde_yaml::to_string(&doc).unwrap();
        let (domain, port) = parse_domain_file(&yaml).unwrap();
        assert_eq!(domain, "api.example.com");
        assert_eq!(port, 8001);
    }

    #[test]
    fn identical_inputs_serialise_identically() {
        let a = serde_yaml::to_string(&build_doc("api.example.com", 8001, Some("api"))).unwrap();
        let b = serde_yaml::to_string(&build_doc("api.example.com", 8001, Some("api"))).unwrap();
        assert_eq!(a, b);
    }
}
