//! Pool configuration and browser executable discovery.

use std::{
    env,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use which::which;

/// Tuning knobs for the session pool and the underlying browser launch.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Hard ceiling on pooled connections.
    pub max_connections: usize,
    /// Protocol domains enabled, in order, when a connection is created.
    pub enabled_domains: Vec<String>,
    /// Interval between liveness probe passes.
    pub health_check_interval_ms: u64,
    /// Consecutive probe failures that flip a connection inactive.
    pub failure_threshold: u32,
    /// Deadline applied to every protocol command round-trip.
    pub command_deadline_ms: u64,
    /// Keep-alive interval on the browser channel, 0 disables it.
    pub heartbeat_interval_ms: u64,
    pub executable: PathBuf,
    pub user_data_dir: PathBuf,
    pub headless: bool,
    /// Attach to an already-running browser instead of launching one.
    pub websocket_url: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            enabled_domains: default_domains(),
            health_check_interval_ms: 30_000,
            failure_threshold: 3,
            command_deadline_ms: 30_000,
            heartbeat_interval_ms: 15_000,
            executable: default_chrome_path(),
            user_data_dir: default_profile_dir(),
            headless: resolve_headless_default(),
            websocket_url: None,
        }
    }
}

impl PoolConfig {
    /// True when a real browser can be reached, either by launch or attach.
    pub fn has_browser(&self) -> bool {
        self.websocket_url.is_some() || !self.executable.as_os_str().is_empty()
    }
}

fn default_domains() -> Vec<String> {
    ["Page", "DOM", "CSS", "Runtime", "Network"]
        .iter()
        .map(|d| d.to_string())
        .collect()
}

fn resolve_headless_default() -> bool {
    // WEBHELM_HEADLESS: "0", "false", "no", "off" means headful
    match env::var("WEBHELM_HEADLESS") {
        Ok(value) => {
            let lower = value.to_ascii_lowercase();
            !matches!(lower.as_str(), "0" | "false" | "no" | "off")
        }
        Err(_) => true,
    }
}

fn default_chrome_path() -> PathBuf {
    detect_chrome_executable().unwrap_or_default()
}

fn default_profile_dir() -> PathBuf {
    if let Ok(path) = env::var("WEBHELM_CHROME_PROFILE") {
        return PathBuf::from(path);
    }

    Path::new("./.webhelm-profile").into()
}

/// Locate a usable Chrome/Chromium binary.
///
/// Order: `WEBHELM_CHROME` override, `$PATH` lookup, OS install locations
/// (the last step is skipped when `WEBHELM_SKIP_OS_PATHS` is set).
pub fn detect_chrome_executable() -> Option<PathBuf> {
    let override_path = env::var("WEBHELM_CHROME")
        .ok()
        .map(|raw| PathBuf::from(raw.trim()))
        .filter(|p| !p.as_os_str().is_empty() && p.exists());
    if override_path.is_some() {
        return override_path;
    }

    if let Some(found) = executable_names().iter().find_map(|name| which(name).ok()) {
        return Some(found);
    }

    let probe_os_paths = !env::var("WEBHELM_SKIP_OS_PATHS")
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);

    probe_os_paths
        .then(os_install_paths)?
        .into_iter()
        .find(|candidate| candidate.exists())
}

fn executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome.exe", "chromium.exe", "msedge.exe"]
    }

    #[cfg(any(target_os = "macos", target_os = "linux", target_os = "freebsd"))]
    {
        &[
            "google-chrome-stable",
            "google-chrome",
            "chromium",
            "chromium-browser",
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        &["chrome"]
    }
}

fn os_install_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        ["C:/Program Files", "C:/Program Files (x86)"]
            .into_iter()
            .map(PathBuf::from)
            .flat_map(|root| {
                [
                    root.join("Google/Chrome/Application/chrome.exe"),
                    root.join("Chromium/Application/chrome.exe"),
                    root.join("Microsoft/Edge/Application/msedge.exe"),
                ]
            })
            .collect()
    }

    #[cfg(target_os = "macos")]
    {
        vec![
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            PathBuf::from("/Applications/Chromium.app/Contents/MacOS/Chromium"),
        ]
    }

    #[cfg(any(target_os = "linux", target_os = "freebsd"))]
    {
        vec![
            PathBuf::from("/usr/bin/google-chrome-stable"),
            PathBuf::from("/usr/bin/google-chrome"),
            PathBuf::from("/usr/bin/chromium"),
            PathBuf::from("/usr/bin/chromium-browser"),
            PathBuf::from("/snap/bin/chromium"),
        ]
    }

    #[cfg(not(any(
        target_os = "windows",
        target_os = "macos",
        target_os = "linux",
        target_os = "freebsd"
    )))]
    {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_the_protocol_domains() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.max_connections, 10);
        assert_eq!(cfg.failure_threshold, 3);
        assert_eq!(cfg.health_check_interval_ms, 30_000);
        assert_eq!(cfg.command_deadline_ms, 30_000);
        assert_eq!(
            cfg.enabled_domains,
            vec!["Page", "DOM", "CSS", "Runtime", "Network"]
        );
    }

    #[test]
    fn headless_override_accepts_off_values() {
        let saved = env::var("WEBHELM_HEADLESS").ok();

        env::set_var("WEBHELM_HEADLESS", "off");
        assert!(!resolve_headless_default());
        env::set_var("WEBHELM_HEADLESS", "1");
        assert!(resolve_headless_default());
        env::remove_var("WEBHELM_HEADLESS");
        assert!(resolve_headless_default());

        if let Some(value) = saved {
            env::set_var("WEBHELM_HEADLESS", value);
        }
    }

    #[test]
    fn websocket_attach_counts_as_browser() {
        let cfg = PoolConfig {
            websocket_url: Some("ws://127.0.0.1:9222/devtools/browser/abc".into()),
            executable: PathBuf::new(),
            ..PoolConfig::default()
        };
        assert!(cfg.has_browser());
    }
}
