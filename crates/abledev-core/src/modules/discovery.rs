//! Function discovery under the conventional `queries/` and `mutations/`
//! directories.

use super::ModuleLoader;
use crate::config::ServerConfig;
use crate::error::{GatewayError, Result};
use crate::function::{FunctionKey, FunctionMapping};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Find every function file below the source root.
///
/// Keys are the path relative to the root with the extension stripped and
/// `/` as separator, e.g. `queries/todos/list`. The result is sorted by key.
/// A missing `queries/` or `mutations/` directory simply contributes nothing.
pub fn discover_functions(src_root: &Path, extension: &str) -> Result<Vec<(FunctionKey, PathBuf)>> {
    let extension = extension.trim_start_matches('.');
    let mut found = Vec::new();

    for dir_name in [ServerConfig::QUERIES_DIR_NAME, ServerConfig::MUTATIONS_DIR_NAME] {
        let dir = src_root.join(dir_name);
        if !dir.is_dir() {
            debug!("No {} directory under {}", dir_name, src_root.display());
            continue;
        }

        for entry in WalkDir::new(&dir).follow_links(true).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", dir.display(), e);
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().map(|e| e != extension).unwrap_or(true)
            {
                continue;
            }

            match key_for(src_root, path) {
                Some(key) => found.push((key, path.to_path_buf())),
                None => warn!("Skipping function file with unusable name: {}", path.display()),
            }
        }
    }

    found.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(found)
}

/// Load every discovered function once and build a production mapping.
///
/// Any module that fails to load aborts the build, so a broken file is
/// reported at startup instead of on the first request.
pub async fn build_mapping(
    src_root: &Path,
    extension: &str,
    loader: &dyn ModuleLoader,
) -> Result<FunctionMapping> {
    if !src_root.is_dir() {
        return Err(GatewayError::Config {
            message: format!("Source directory does not exist: {}", src_root.display()),
        });
    }

    let mut mapping = FunctionMapping::new();
    for (key, path) in discover_functions(src_root, extension)? {
        let export = loader.load(&path).await?;
        if !export.is_callable() {
            warn!("Default export of {} is not a function", path.display());
        }
        mapping.insert(key, export);
    }

    info!(
        "Built function mapping with {} functions from {}",
        mapping.len(),
        src_root.display()
    );
    Ok(mapping)
}

fn key_for(src_root: &Path, path: &Path) -> Option<FunctionKey> {
    let relative = path.strip_prefix(src_root).ok()?.with_extension("");
    let segments = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(FunctionKey::new(segments.join("/")))
}
