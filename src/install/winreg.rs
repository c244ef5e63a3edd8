use crate::install::paths::{manifest_file, registry_key};
use std::io;
use winreg::{enums::HKEY_CURRENT_USER, RegKey};

/// Write the native-messaging registry value under HKCU so the browser can
/// find the manifest file for host `name`.
pub fn write_manifest_reg(browser: &str, name: &str) -> io::Result<()> {
    let (Some(key_path), Some(manifest_path)) =
        (registry_key(browser, name), manifest_file(browser, name))
    else {
        return Ok(());
    };
    let hkcu = RegKey::predef(HKEY_CURRENT_USER);
    let (key, _) = hkcu.create_subkey(&key_path)?;
    key.set_value("", &manifest_path.to_string_lossy().as_ref())?;
    Ok(())
}

/// Remove the HKCU registry value for the native-messaging host.
pub fn remove_manifest_reg(browser: &str, name: &str) -> io::Result<()> {
    if let Some(key_path) = registry_key(browser, name) {
        let hkcu = RegKey::predef(HKEY_CURRENT_USER);
        hkcu.delete_subkey(&key_path).ok();
    }
    Ok(())
}
