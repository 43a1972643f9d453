use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("model not found: {name} (looked in {searched:?})")]
    NotFound { name: String, searched: Vec<PathBuf> },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Resolve a detector model by path or bare file name.
///
/// Resolution order:
/// 1. The argument itself, if it names an existing file
/// 2. Bundled directory (for development / pre-packaged installs)
/// 3. User cache directory (platform-specific)
pub fn resolve(model: &str, bundled_dir: Option<&Path>) -> Result<PathBuf, ModelResolveError> {
    let direct = PathBuf::from(model);
    let mut searched = vec![direct.clone()];
    if direct.is_file() {
        return Ok(direct);
    }

    let name = direct
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| model.into());

    if let Some(dir) = bundled_dir {
        let bundled_path = dir.join(&name);
        if bundled_path.is_file() {
            return Ok(bundled_path);
        }
        searched.push(bundled_path);
    }

    let cached_path = model_cache_dir()?.join(&name);
    if cached_path.is_file() {
        return Ok(cached_path);
    }
    searched.push(cached_path);

    Err(ModelResolveError::NotFound {
        name: model.to_string(),
        searched,
    })
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/Vigil/models/`
/// - Linux: `$XDG_CACHE_HOME/Vigil/models/` or `~/.cache/Vigil/models/`
/// - Windows: `%LOCALAPPDATA%/Vigil/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join("Vigil").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join("Vigil").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
}
