//! CLI surface: a command tree that mirrors the HTTP API one-to-one,
//! sharing every module with the `serve` subcommand —
//! there is no separate "agent" binary. Command groups: `server`, `app`,
//! `env`, `db`, `proxy`, `key`, `webhook`, `ci`, plus top-level `init` and
//! `serve`.

pub mod app;
pub mod ci;
pub mod db;
pub mod env;
pub mod init;
pub mod key;
pub mod monitor;
pub mod proxy;
pub mod server;
pub mod serve;
pub mod webhook;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "dockhand", version, about = "Self-hosted PaaS control plane")]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv); overridden by RUST_LOG if set.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bootstrap the control-plane home directory and platform key.
    Init,

    /// Run the HTTP API, the push-webhook/self-update ingest, and the
    /// periodic metric sampler.
    Serve,

    /// Manage registered remote hosts.
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },

    /// Manage deployable apps.
    App {
        #[command(subcommand)]
        action: AppAction,
    },

    /// Manage an app's encrypted environment variables.
    Env {
        #[command(subcommand)]
        action: EnvAction,
    },

    /// Database app backup, restore, and scheduled-backup management.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },

    /// Reverse-proxy domain routes (Proxy Store).
    Proxy {
        #[command(subcommand)]
        action: ProxyAction,
    },

    /// Scoped deploy-key management.
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Outbound webhook subscriptions (deploy/backup notifications).
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },

    /// CI pipeline entrypoint: trigger/rollback/watch a deploy over the
    /// HTTP API using a deploy key, rather than touching local state
    /// directly — the shape a runner without SSH keys or local sqlite
    /// access actually has available.
    Ci {
        #[command(subcommand)]
        action: CiAction,
    },

    /// Live TUI dashboard of container and resource state on a server.
    Monitor {
        /// Registered server name.
        server: String,
        /// Polling interval in seconds.
        #[arg(short, long, default_value = "3")]
        interval: u64,
    },
}

#[derive(Subcommand)]
pub enum ServerAction {
    /// Register a remote host.
    Add {
        name: String,
        #[arg(long)]
        host: String,
        #[arg(long, default_value = "22")]
        port: i64,
        #[arg(long, default_value = "root")]
        user: String,
        #[arg(long)]
        key_path: Option<String>,
        #[arg(long)]
        provider: Option<String>,
    },
    /// List registered hosts.
    List,
    /// Show one host.
    Show { name: String },
    /// Remove a host and cascade-delete its apps.
    Remove { name: String },
    /// Bootstrap packages, firewall, and the reverse proxy on a host.
    Provision {
        name: String,
        #[arg(long)]
        acme_email: String,
    },
    /// Tear a host back down to bare metal. Destructive — only run
    /// against hosts not already managed by another control plane.
    Wipe {
        name: String,
        #[arg(long)]
        yes: bool,
    },
    /// Open a one-off SSH connectivity check.
    Test { name: String },
}

#[derive(Subcommand)]
pub enum AppAction {
    /// Declare a new app on a server.
    #[allow(clippy::too_many_arguments)]
    Add {
        name: String,
        #[arg(long)]
        server: String,
        #[arg(long)]
        domain: Option<String>,
        #[arg(long)]
        port: Option<i64>,
        #[arg(long)]
        image: Option<String>,
        #[arg(long)]
        repo: Option<String>,
        #[arg(long, default_value = "main")]
        branch: String,
        /// Path to an inline compose manifest, uploaded verbatim instead of
        /// being rendered. Mutually exclusive with `--image`/`--repo`.
        #[arg(long)]
        compose_file: Option<String>,
        #[arg(long)]
        auto_deploy: bool,
        #[arg(long, value_enum, default_value = "restart")]
        strategy: StrategyArg,
    },
    /// List apps (database apps are excluded — see `dockhand db list`).
    List {
        #[arg(long)]
        server: Option<String>,
    },
    /// Show one app.
    Show { name: String, #[arg(long)] server: String },
    /// Remove an app and its deployment history.
    Remove { name: String, #[arg(long)] server: String },
    /// Trigger a deploy.
    Deploy {
        name: String,
        #[arg(long)]
        server: String,
        /// Pin to a specific commit instead of the branch tip (rollback path).
        #[arg(long)]
        commit: Option<String>,
        /// Deploy a specific image instead of the app's declared one.
        #[arg(long)]
        image: Option<String>,
    },
    /// Re-deploy the last successful commit.
    Rollback { name: String, #[arg(long)] server: String },
    /// Reconcile and print live container status.
    Status { name: String, #[arg(long)] server: String },
    /// List deployment history.
    Deployments { name: String, #[arg(long)] server: String },
    /// Stream a deployment's log to stdout until it finishes.
    Logs {
        /// Deployment id (defaults to the most recent for this app).
        #[arg(long)]
        deployment: Option<i64>,
        name: String,
        #[arg(long)]
        server: String,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum StrategyArg {
    Restart,
    Rolling,
}

#[derive(Subcommand)]
pub enum EnvAction {
    /// Set one or more KEY=VALUE pairs.
    Set { name: String, #[arg(long)] server: String, pairs: Vec<String> },
    /// Unset a variable.
    Unset { name: String, #[arg(long)] server: String, key: String },
    /// List variables (values masked by default).
    List {
        name: String,
        #[arg(long)]
        server: String,
        #[arg(long)]
        reveal: bool,
    },
}

#[derive(Subcommand)]
pub enum DbAction {
    /// Declare a new database app.
    Add {
        name: String,
        #[arg(long)]
        server: String,
        #[arg(long, value_enum)]
        engine: EngineArg,
        #[arg(long)]
        port: Option<i64>,
    },
    /// List database apps.
    List {
        #[arg(long)]
        server: Option<String>,
    },
    /// Run an on-demand backup, optionally replicating to the configured
    /// object store.
    Backup { name: String, #[arg(long)] server: String },
    /// List backup files on the remote host.
    Backups { name: String, #[arg(long)] server: String },
    /// Restore from a named remote backup file.
    Restore { name: String, #[arg(long)] server: String, file: String },
    /// Install a cron-driven backup schedule.
    Schedule {
        name: String,
        #[arg(long)]
        server: String,
        #[arg(long)]
        cron: String,
        #[arg(long, default_value = "7")]
        retention_days: i64,
    },
    /// Remove the cron-driven backup schedule.
    Unschedule { name: String, #[arg(long)] server: String },
}

#[derive(Clone, Copy, clap::ValueEnum)]
pub enum EngineArg {
    Postgres,
    Mysql,
    Redis,
    Mongo,
}

#[derive(Subcommand)]
pub enum ProxyAction {
    /// List every domain route across every registered server.
    List,
    /// Add or update a domain route for an app.
    Add {
        domain: String,
        #[arg(long)]
        app: String,
        #[arg(long)]
        server: String,
    },
    /// Remove a domain route.
    Remove {
        domain: String,
        #[arg(long)]
        server: String,
    },
}

#[derive(Subcommand)]
pub enum KeyAction {
    /// Generate a new deploy key; the plaintext is printed exactly once.
    Create { label: String },
    /// List deploy keys (hashes only, never the plaintext).
    List,
    /// Revoke a deploy key.
    Revoke { label: String },
}

#[derive(Subcommand)]
pub enum WebhookAction {
    /// Subscribe a URL to one or more events.
    Add {
        url: String,
        /// Comma-separated event names, e.g. `deploy.success,deploy.failure`.
        #[arg(long)]
        events: String,
        #[arg(long)]
        secret: Option<String>,
    },
    /// List outbound webhook subscriptions.
    List,
    /// Remove a subscription.
    Remove { id: i64 },
}

#[derive(Subcommand)]
pub enum CiAction {
    /// Trigger a deploy over the HTTP API and exit non-zero on failure.
    Deploy {
        /// Base URL of a running `dockhand serve` instance.
        #[arg(long, env = "DOCKHAND_API_URL")]
        api_url: String,
        /// Deploy key (or the platform key).
        #[arg(long, env = "DOCKHAND_API_KEY")]
        api_key: String,
        /// App id to deploy.
        app_id: i64,
        #[arg(long)]
        commit: Option<String>,
        #[arg(long)]
        image: Option<String>,
        /// Stream logs and block until the deployment finishes.
        #[arg(long)]
        wait: bool,
    },
    /// Roll back the given app to its last successful commit.
    Rollback {
        #[arg(long, env = "DOCKHAND_API_URL")]
        api_url: String,
        #[arg(long, env = "DOCKHAND_API_KEY")]
        api_key: String,
        app_id: i64,
        #[arg(long)]
        wait: bool,
    },
    /// Print a deployment's current status.
    Status {
        #[arg(long, env = "DOCKHAND_API_URL")]
        api_url: String,
        #[arg(long, env = "DOCKHAND_API_KEY")]
        api_key: String,
        deployment_id: i64,
    },
}
