//! Install, verify and remove the bridge's native-messaging-host manifest.
//!
//! Browsers discover a native host through a small JSON manifest placed in a
//! browser-specific directory (plus, on Windows, a registry value pointing
//! at it). The manifest must reference the bridge executable by absolute
//! path, and its allowlist field differs by browser family: Chromium-family
//! browsers take `allowed_origins`, Firefox-family take
//! `allowed_extensions`.

use crate::install::paths::{manifest_dir, manifest_file, Family};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Host name the extension connects to.
pub const HOST_NAME: &str = "com.anthropic.claude_bridge";

/// Default manifest description.
pub const HOST_DESCRIPTION: &str = "Claude Bridge - Native Messaging Host";

/// A native messaging manifest, as serialized to disk.
#[derive(Serialize, Deserialize, Debug)]
pub struct Manifest {
    pub name: String,
    pub description: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_origins: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_extensions: Option<Vec<String>>,
}

impl Manifest {
    /// Manifest for one browser family. `extension_ids` are raw Chromium
    /// extension ids (converted to origins) or Firefox addon ids, depending
    /// on the family.
    pub fn for_family(
        family: Family,
        executable: &Path,
        chromium_ids: &[String],
        firefox_ids: &[String],
    ) -> Manifest {
        let (allowed_origins, allowed_extensions) = match family {
            Family::Chromium => (
                Some(
                    chromium_ids
                        .iter()
                        .map(|id| format!("chrome-extension://{id}/"))
                        .collect(),
                ),
                None,
            ),
            Family::Firefox => (None, Some(firefox_ids.to_vec())),
        };

        Manifest {
            name: HOST_NAME.to_string(),
            description: HOST_DESCRIPTION.to_string(),
            path: executable.display().to_string(),
            kind: "stdio".to_string(),
            allowed_origins,
            allowed_extensions,
        }
    }
}

/// Install the manifest for the given browsers at user scope.
///
/// `executable` must exist; it is canonicalized so the manifest carries an
/// absolute path (mandatory on macOS/Linux). Browsers with no location on
/// the current OS are skipped.
pub fn install(
    executable: &Path,
    chromium_ids: &[String],
    firefox_ids: &[String],
    browsers: &[&str],
) -> io::Result<()> {
    let executable = fs::canonicalize(executable)?;

    for &browser in browsers {
        let Some(info) = crate::install::paths::browser_info(browser) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unknown browser \"{browser}\""),
            ));
        };
        let Some(dir) = manifest_dir(browser) else {
            continue;
        };

        fs::create_dir_all(&dir)?;
        let manifest = Manifest::for_family(info.family, &executable, chromium_ids, firefox_ids);
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        fs::write(dir.join(format!("{HOST_NAME}.json")), json)?;

        #[cfg(all(windows, feature = "windows-registry"))]
        crate::install::winreg::write_manifest_reg(browser, HOST_NAME)?;
    }

    Ok(())
}

/// Whether any known browser has the manifest installed.
pub fn verify(name: &str) -> io::Result<bool> {
    for browser in crate::install::paths::known_browsers() {
        if let Some(file) = manifest_file(browser, name) {
            if file.exists() {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Remove the manifest for the given browsers. Missing files are fine.
pub fn remove(browsers: &[&str]) -> io::Result<()> {
    for &browser in browsers {
        if let Some(file) = manifest_file(browser, HOST_NAME) {
            if file.exists() {
                fs::remove_file(file)?;
            }
        }

        #[cfg(all(windows, feature = "windows-registry"))]
        crate::install::winreg::remove_manifest_reg(browser, HOST_NAME)?;
    }
    Ok(())
}
