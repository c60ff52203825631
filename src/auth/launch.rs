use std::path::Path;

use super::TokenStore;

/// Marker file created on the first run.
pub const LAUNCH_MARKER: &str = ".launched";

/// Wipe any stored token the first time the app runs in `config_dir`.
///
/// A token left behind by a previous install must not silently sign the new
/// one in. Returns `true` when this was the first launch.
pub fn reset_on_first_launch(config_dir: &Path, tokens: &dyn TokenStore) -> std::io::Result<bool> {
    let marker = config_dir.join(LAUNCH_MARKER);
    if marker.exists() {
        return Ok(false);
    }

    tokens.clear();
    std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&marker)?;
    tracing::info!(path = %marker.display(), "First launch, cleared stored credentials");
    Ok(true)
}
