//! Command string builders for the remote shell. Every interpolated value
//! is run through [`super::quote`] before it reaches a format string —
//! no caller is allowed to interpolate an identifier directly.

use super::quote;

pub fn mkdir_p(path: &str) -> String {
    format!("mkdir -p {}", quote(path))
}

pub fn rm_rf(path: &str) -> String {
    format!("rm -rf {}", quote(path))
}

pub fn git_clone(url: &str, branch: &str, dest: &str) -> String {
    format!(
        "git clone -b {} {} {}",
        quote(branch),
        quote(url),
        quote(dest)
    )
}

pub fn git_fetch_reset(repo_dir: &str, target: &str) -> String {
    format!(
        "cd {} && git fetch origin && git reset --hard {}",
        quote(repo_dir),
        quote(target)
    )
}

pub fn git_rev_parse_head(repo_dir: &str) -> String {
    format!("cd {} && git rev-parse HEAD", quote(repo_dir))
}

pub fn compose_up(app_dir: &str, pull: Option<&str>) -> String {
    let pull_flag = match pull {
        Some(policy) => format!("--pull {} ", quote(policy)),
        None => String::new(),
    };
    format!(
        "cd {} && docker compose up -d {}--remove-orphans",
        quote(app_dir),
        pull_flag
    )
}

pub fn compose_build(app_dir: &str) -> String {
    format!("cd {} && docker compose build", quote(app_dir))
}

pub fn compose_down(app_dir: &str) -> String {
    format!("cd {} && docker compose down", quote(app_dir))
}

pub fn compose_ps_json(app_dir: &str) -> String {
    format!(
        "cd {} && docker compose ps --format json",
        quote(app_dir)
    )
}

pub fn docker_exec_printenv(container: &str, var: &str) -> String {
    format!(
        "docker exec {} printenv {}",
        quote(container),
        quote(var)
    )
}

pub fn curl_health(port: u16, path: &str) -> String {
    format!(
        "curl -s -o /dev/null -w '%{{http_code}} %{{time_total}}' --max-time 10 {}",
        quote(&format!("http://127.0.0.1:{}{}", port, path))
    )
}

/// `(crontab -l | grep -v '<marker>'; echo <new line>) | crontab -`
/// Idempotent: installing the same marker twice leaves exactly one line.
pub fn install_cron_line(marker: &str, line: &str) -> String {
    format!(
        "(crontab -l 2>/dev/null | grep -vF {marker} ; echo {line}) | crontab -",
        marker = quote(marker),
        line = quote(line),
    )
}

pub fn test_file_exists(path: &str) -> String {
    format!("test -f {}", quote(path))
}

pub fn chmod_executable(path: &str) -> String {
    format!("chmod +x {}", quote(path))
}
