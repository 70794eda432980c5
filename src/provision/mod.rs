//! Host Provisioner: turns a bare Ubuntu/Debian box into a ready control
//! plane target — Docker, fail2ban, UFW, the shared network, and a Traefik
//! instance with the file provider pointed at the Proxy Store's directory.
//! Every step runs as an ordered (name, command) pair so a caller can
//! report granular progress without the step table itself knowing about
//! any particular UI.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::ssh::{ExecError, SshSession};

#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Exec(#[from] ExecError),
}

const BASE_DIR: &str = "/opt/dockhand";

/// Firewall rules are opened for SSH/HTTP/HTTPS *before* `ufw enable` runs,
/// in the same step — reversing the order would risk locking the
/// operator out of a freshly provisioned host.
const PROVISION_STEPS: &[(&str, &str)] = &[
    (
        "Updating packages",
        "apt-get update -qq && DEBIAN_FRONTEND=noninteractive apt-get upgrade -y -qq",
    ),
    (
        "Installing Docker",
        "if ! command -v docker &>/dev/null; then curl -fsSL https://get.docker.com | sh; systemctl enable docker && systemctl start docker; fi",
    ),
    (
        "Installing fail2ban",
        "apt-get install -y -qq fail2ban && systemctl enable fail2ban && systemctl start fail2ban",
    ),
    (
        "Configuring UFW firewall",
        "apt-get install -y -qq ufw && ufw allow 22/tcp && ufw allow 80/tcp && ufw allow 443/tcp && ufw default deny incoming && ufw default allow outgoing && echo 'y' | ufw enable",
    ),
    (
        "Creating dockhand directories",
        "mkdir -p /opt/dockhand/apps /opt/dockhand/traefik/conf.d /opt/dockhand/traefik/letsencrypt /opt/dockhand/backups",
    ),
    (
        "Installing awscli",
        "pip3 install -q awscli 2>/dev/null || apt-get install -y -qq awscli 2>/dev/null || true",
    ),
    (
        "Creating Docker network",
        "docker network create dockhand 2>/dev/null || true",
    ),
];

const TRAEFIK_STEP_NAMES: &[&str] = &[
    "Setting up Traefik static config",
    "Writing Traefik docker-compose.yml",
    "Initializing ACME storage",
    "Starting Traefik",
];

const WIPE_STEPS: &[(&str, &str)] = &[
    (
        "Uninstalling k3s (if present)",
        "if [ -x /usr/local/bin/k3s-killall.sh ]; then /usr/local/bin/k3s-killall.sh; fi && if [ -x /usr/local/bin/k3s-uninstall.sh ]; then /usr/local/bin/k3s-uninstall.sh; fi && if [ -x /usr/local/bin/k3s-agent-uninstall.sh ]; then /usr/local/bin/k3s-agent-uninstall.sh; fi || true",
    ),
    (
        "Removing Rancher (if present)",
        "docker rm -f $(docker ps -a --filter name=rancher -q) 2>/dev/null || true && rm -rf /var/lib/rancher /etc/rancher 2>/dev/null || true",
    ),
    (
        "Removing snap packages (if present)",
        "if command -v snap &>/dev/null; then snap list 2>/dev/null | awk 'NR>1{print $1}' | while read pkg; do snap remove --purge \"$pkg\" 2>/dev/null || true; done; systemctl stop snapd 2>/dev/null || true; apt-get purge -y -qq snapd 2>/dev/null || true; rm -rf /snap /var/snap /var/lib/snapd ~/snap 2>/dev/null || true; fi || true",
    ),
    ("Stopping all Docker containers", "docker stop $(docker ps -aq) 2>/dev/null || true"),
    ("Removing all Docker data", "docker system prune -af --volumes 2>/dev/null || true"),
    (
        "Uninstalling Docker (full removal)",
        "systemctl stop docker docker.socket containerd 2>/dev/null || true && apt-get purge -y -qq docker-ce docker-ce-cli containerd.io docker-buildx-plugin docker-compose-plugin docker.io 2>/dev/null || true && rm -rf /var/lib/docker /var/lib/containerd /etc/docker 2>/dev/null || true",
    ),
    (
        "Stopping and removing common services",
        "systemctl stop nginx apache2 caddy traefik haproxy 2>/dev/null || true && apt-get purge -y -qq nginx* apache2* caddy 2>/dev/null || true",
    ),
    ("Cleaning up unused packages", "apt-get autoremove -y -qq && apt-get clean -qq"),
    ("Deleting /opt/dockhand", "rm -rf /opt/dockhand"),
];

#[derive(Debug, Clone, Serialize)]
pub struct StepProgress {
    pub name: String,
    pub index: usize,
    pub total: usize,
}

fn traefik_static_config(acme_email: &str) -> String {
    format!(
        r#"api:
  dashboard: true
  insecure: true
entryPoints:
  web:
    address: ':80'
    http:
      redirections:
        entryPoint:
          to: websecure
          scheme: https
          permanent: true
  websecure:
    address: ':443'
certificatesResolvers:
  letsencrypt:
    acme:
      email: '{acme_email}'
      storage: /letsencrypt/acme.json
      httpChallenge:
        entryPoint: web
providers:
  file:
    directory: /opt/dockhand/traefik/conf.d
    watch: true
log:
  level: INFO
"#,
        acme_email = acme_email
    )
}

fn traefik_compose() -> &'static str {
    r#"services:
  traefik:
    image: traefik:v3.2
    container_name: dockhand-traefik
    restart: unless-stopped
    ports:
      - '80:80'
      - '443:443'
      - '127.0.0.1:8080:8080'
    volumes:
      - /opt/dockhand/traefik/traefik.yml:/etc/traefik/traefik.yml:ro
      - /opt/dockhand/traefik/conf.d:/opt/dockhand/traefik/conf.d:ro
      - /opt/dockhand/traefik/letsencrypt:/letsencrypt
    extra_hosts:
      - 'host.docker.internal:host-gateway'
    networks:
      - dockhand
networks:
  dockhand:
    external: true
"#
}

/// Runs every provisioning step in order, then lays down and starts
/// Traefik. `on_step` is called before each step (including the four
/// Traefik steps) with its name, zero-based index, and the grand total —
/// callers typically forward this straight into the Log Broadcaster.
pub async fn provision_server(
    session: &SshSession,
    acme_email: &str,
    mut on_step: impl FnMut(StepProgress),
) -> Result<(), ProvisionError> {
    let total = PROVISION_STEPS.len() + TRAEFIK_STEP_NAMES.len();
    let mut idx = 0;

    for (name, command) in PROVISION_STEPS {
        on_step(StepProgress { name: name.to_string(), index: idx, total });
        session.run_checked(command, Duration::from_secs(300)).await?;
        idx += 1;
    }

    on_step(StepProgress { name: TRAEFIK_STEP_NAMES[0].to_string(), index: idx, total });
    let static_config = traefik_static_config(acme_email);
    session.upload_string(&static_config, &format!("{}/traefik/traefik.yml", BASE_DIR)).await?;
    idx += 1;

    on_step(StepProgress { name: TRAEFIK_STEP_NAMES[1].to_string(), index: idx, total });
    session
        .upload_string(traefik_compose(), &format!("{}/traefik/docker-compose.yml", BASE_DIR))
        .await?;
    idx += 1;

    on_step(StepProgress { name: TRAEFIK_STEP_NAMES[2].to_string(), index: idx, total });
    session
        .run_checked(
            "touch /opt/dockhand/traefik/letsencrypt/acme.json && chmod 600 /opt/dockhand/traefik/letsencrypt/acme.json",
            Duration::from_secs(15),
        )
        .await?;
    idx += 1;

    on_step(StepProgress { name: TRAEFIK_STEP_NAMES[3].to_string(), index: idx, total });
    session
        .run_checked("cd /opt/dockhand/traefik && docker compose up -d", Duration::from_secs(120))
        .await?;

    Ok(())
}

/// Tears a host back down to bare metal: removes any prior orchestrator
/// (k3s, Rancher, snap packages), purges Docker and common reverse
/// proxies, and deletes the control plane's own directory. Every command
/// tolerates already-absent state (`|| true`) since a wipe is expected to
/// run against hosts in an unknown, possibly half-provisioned condition.
pub async fn wipe_server(
    session: &SshSession,
    mut on_step: impl FnMut(StepProgress),
) -> Result<(), ProvisionError> {
    let total = WIPE_STEPS.len();
    for (idx, (name, command)) in WIPE_STEPS.iter().enumerate() {
        on_step(StepProgress { name: name.to_string(), index: idx, total });
        session.run(command, Duration::from_secs(120)).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_config_embeds_acme_email() {
        let config = traefik_static_config("ops@example.com");
        assert!(config.contains("ops@example.com"));
        let doc: serde_yaml::Value = serde_yaml::from_str(&config).unwrap();
        assert_eq!(
            doc["providers"]["file"]["directory"].as_str().unwrap(),
            "/opt/dockhand/traefik/conf.d"
        );
    }

    #[test]
    fn compose_is_valid_yaml_with_external_network() {
        let doc: serde_yaml::Value = serde_yaml::from_str(traefik_compose()).unwrap();
        assert!(doc["networks"]["dockhand"]["external"].as_bool().unwrap());
    }

    #[test]
    fn step_tables_are_non_empty() {
        assert!(!PROVISION_STEPS.is_empty());
        assert!(!WIPE_STEPS.is_empty());
    }
}
