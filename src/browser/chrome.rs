use crate::config::RelayConfig;
use anyhow::{bail, Context, Result};
use log::info;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::Duration;

const READY_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug, Deserialize)]
struct CdpTarget {
    #[serde(rename = "type")]
    target_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChromeSessionMode {
    ReusedExisting,
    LaunchedNew,
}

impl ChromeSessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReusedExisting => "reused_existing",
            Self::LaunchedNew => "launched_new",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChromeSession {
    pub port: u16,
    pub mode: ChromeSessionMode,
}

/// Detect Chrome installation path on the current OS
pub fn detect_chrome() -> Result<PathBuf> {
    #[cfg(target_os = "macos")]
    let (paths, names): (&[&str], &[&str]) = (
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ],
        &["google-chrome", "chromium"],
    );

    #[cfg(target_os = "windows")]
    let (paths, names): (&[&str], &[&str]) = (
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ],
        &["chrome"],
    );

    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let (paths, names): (&[&str], &[&str]) = (
        &[],
        &[
            "google-chrome",
            "google-chrome-stable",
            "chromium-browser",
            "chromium",
        ],
    );

    if let Some(path) = paths.iter().map(PathBuf::from).find(|p| p.exists()) {
        return Ok(path);
    }
    for name in names {
        if let Ok(path) = which::which(name) {
            return Ok(path);
        }
    }

    bail!("Could not find Chrome browser. Please install Google Chrome.")
}

/// Dedicated profile so the relay Chrome never fights the user's own.
pub fn profile_dir(data_dir: &Path) -> Result<PathBuf> {
    let dir = data_dir.join("profile");
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create profile dir {}", dir.display()))?;
    Ok(dir)
}

fn chrome_args(profile_dir: &Path, port: u16, urls: &[&str]) -> Vec<String> {
    let mut args = vec![
        format!("--user-data-dir={}", profile_dir.display()),
        format!("--remote-debugging-port={}", port),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-default-apps".to_string(),
        // Background chat tabs must keep rendering for polling to see updates
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
    ];
    args.extend(urls.iter().map(|url| url.to_string()));
    args
}

/// Launch Chrome with a debugging port and the given start tabs.
pub fn launch_chrome_with_debug(
    chrome_path: &Path,
    profile_dir: &Path,
    port: u16,
    urls: &[&str],
) -> Result<Child> {
    info!(
        "[Chrome launch] profile={} port={} urls={:?}",
        profile_dir.display(),
        port,
        urls
    );

    let child = Command::new(chrome_path)
        .args(chrome_args(profile_dir, port, urls))
        .spawn()
        .context("Failed to launch Chrome")?;

    info!("Launched Chrome (PID: {}, port: {})", child.id(), port);
    Ok(child)
}

/// Reuse a Chrome already listening on the configured port, or start one.
pub async fn prepare_chrome_session(config: &RelayConfig, urls: &[&str]) -> Result<ChromeSession> {
    let port = config.chrome_debug_port;
    if is_port_version_ready(port).await {
        info!("[Chrome session] reusing debuggable session on port {}", port);
        return Ok(ChromeSession {
            port,
            mode: ChromeSessionMode::ReusedExisting,
        });
    }

    if !config.launch_chrome {
        bail!(
            "CHROME_NOT_READY: nothing listens on debug port {} and launch_chrome is off",
            port
        );
    }

    let profile = profile_dir(&config.data_dir()?)?;
    if is_profile_busy(&profile) {
        bail!(
            "PROFILE_BUSY: the relay profile {} is open in a Chrome without debug port {}. Close it and retry.",
            profile.display(),
            port
        );
    }

    let chrome = detect_chrome()?;
    launch_chrome_with_debug(&chrome, &profile, port, urls)?;
    wait_for_chrome_ready(port, READY_TIMEOUT).await?;
    Ok(ChromeSession {
        port,
        mode: ChromeSessionMode::LaunchedNew,
    })
}

/// Wait until the version endpoint answers and at least one page exists.
pub async fn wait_for_chrome_ready(port: u16, timeout: Duration) -> Result<()> {
    let start = std::time::Instant::now();
    let mut saw_version = false;

    loop {
        if start.elapsed() > timeout {
            if saw_version {
                bail!(
                    "CHROME_NOT_READY: debug port {} answers but no page appeared within {}s",
                    port,
                    timeout.as_secs()
                );
            }
            bail!(
                "CHROME_NOT_READY: Chrome did not open debug port {} within {}s",
                port,
                timeout.as_secs()
            );
        }

        if is_port_version_ready(port).await {
            saw_version = true;
            match has_page_target(port).await {
                Ok(true) => {
                    info!("Chrome is ready on port {}", port);
                    return Ok(());
                }
                Ok(false) => info!("Chrome on port {} has no page yet, waiting...", port),
                Err(e) => info!("Chrome on port {} page check failed: {:#}", port, e),
            }
        }

        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

pub async fn is_port_version_ready(port: u16) -> bool {
    let version_url = format!("http://127.0.0.1:{}/json/version", port);
    match reqwest::get(&version_url).await {
        Ok(resp) => resp.status().is_success(),
        Err(_) => false,
    }
}

async fn has_page_target(port: u16) -> Result<bool> {
    let list_url = format!("http://127.0.0.1:{}/json/list", port);
    let resp = reqwest::get(&list_url)
        .await
        .context("Failed to request Chrome json/list")?;

    if !resp.status().is_success() {
        return Ok(false);
    }

    let targets: Vec<CdpTarget> = resp.json().await.unwrap_or_default();
    Ok(targets.iter().any(|target| target.target_type == "page"))
}

fn has_singleton_artifacts(profile_dir: &Path) -> bool {
    ["SingletonLock", "SingletonCookie", "SingletonSocket"]
        .iter()
        .any(|name| profile_dir.join(name).exists())
}

/// `SingletonLock` links to `<host>-<pid>`.
fn singleton_lock_pid(profile_dir: &Path) -> Option<u32> {
    let target = std::fs::read_link(profile_dir.join("SingletonLock")).ok()?;
    let name = target.file_name()?.to_string_lossy();
    name.rsplit('-').next()?.parse::<u32>().ok()
}

#[cfg(unix)]
fn is_pid_running(pid: u32) -> bool {
    Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "pid="])
        .output()
        .map(|out| out.status.success() && !String::from_utf8_lossy(&out.stdout).trim().is_empty())
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_pid_running(_pid: u32) -> bool {
    false
}

pub fn is_profile_busy(profile_dir: &Path) -> bool {
    if !has_singleton_artifacts(profile_dir) {
        return false;
    }

    match singleton_lock_pid(profile_dir) {
        Some(pid) => is_pid_running(pid),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_args_carry_port_profile_and_tabs() {
        let args = chrome_args(
            Path::new("/tmp/relay-profile"),
            9333,
            &["https://claude.ai/new", "https://gemini.google.com/app"],
        );

        assert_eq!(args[0], "--user-data-dir=/tmp/relay-profile");
        assert_eq!(args[1], "--remote-debugging-port=9333");
        assert_eq!(
            &args[args.len() - 2..],
            ["https://claude.ai/new", "https://gemini.google.com/app"]
        );
    }

    #[test]
    fn fresh_profile_is_not_busy() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_profile_busy(dir.path()));
    }

    #[test]
    fn singleton_without_lock_counts_as_busy() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("SingletonCookie"), "").unwrap();
        assert!(is_profile_busy(dir.path()));
    }

    #[cfg(unix)]
    #[test]
    fn stale_lock_is_not_busy() {
        let dir = tempfile::tempdir().unwrap();
        std::os::unix::fs::symlink("somehost-4294967", dir.path().join("SingletonLock")).unwrap();
        assert_eq!(singleton_lock_pid(dir.path()), Some(4294967));
        assert!(!is_profile_busy(dir.path()));
    }

    #[tokio::test]
    async fn closed_port_is_not_ready() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        assert!(!is_port_version_ready(port).await);
    }
}
