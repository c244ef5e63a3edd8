//! Manifest location resolution, driven by the embedded `browsers.toml`.

use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Which allowlist field a browser's manifest uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// `allowed_origins` (`chrome-extension://<id>/`).
    Chromium,
    /// `allowed_extensions` (addon IDs).
    Firefox,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowsLocation {
    /// Environment variable the path is rooted at (APPDATA/LOCALAPPDATA).
    pub base: String,
    pub dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserInfo {
    pub family: Family,
    pub registry: Option<String>,
    pub linux: Option<String>,
    pub darwin: Option<String>,
    pub windows: Option<WindowsLocation>,
}

static BROWSERS: Lazy<HashMap<String, BrowserInfo>> = Lazy::new(|| {
    toml::from_str(include_str!("browsers.toml")).expect("embedded browsers.toml is valid")
});

/// Browsers the installer knows about.
pub fn known_browsers() -> Vec<&'static str> {
    let mut names: Vec<&'static str> = BROWSERS.keys().map(|k| k.as_str()).collect();
    names.sort_unstable();
    names
}

pub fn browser_info(browser: &str) -> Option<&'static BrowserInfo> {
    BROWSERS.get(browser)
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
}

/// Directory the manifest goes into for `browser` on the current OS, if the
/// browser has a location here.
pub fn manifest_dir(browser: &str) -> Option<PathBuf> {
    let info = browser_info(browser)?;

    #[cfg(target_os = "linux")]
    {
        info.linux.as_ref().map(|rel| home_dir().join(rel))
    }
    #[cfg(target_os = "macos")]
    {
        info.darwin.as_ref().map(|rel| home_dir().join(rel))
    }
    #[cfg(windows)]
    {
        let loc = info.windows.as_ref()?;
        let base = std::env::var_os(&loc.base)?;
        Some(PathBuf::from(base).join(&loc.dir))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
    {
        None
    }
}

/// Full manifest file path for `browser` and host `name` on the current OS.
pub fn manifest_file(browser: &str, name: &str) -> Option<PathBuf> {
    Some(manifest_dir(browser)?.join(format!("{name}.json")))
}

/// Windows registry key (without hive) for `browser` and host `name`.
pub fn registry_key(browser: &str, name: &str) -> Option<String> {
    let registry = browser_info(browser)?.registry.as_ref()?;
    Some(format!(r"{registry}\{name}"))
}
