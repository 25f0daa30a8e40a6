use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::EnhanceError;
use crate::VideoTask;

/// Suffix appended to the input stem when no explicit output file is given.
pub const OUTPUT_SUFFIX: &str = "_enhanced";

const MAX_COLLISION_ATTEMPTS: u32 = 999;

/// Derive a non-colliding destination path for a task.
///
/// An explicit output file is used verbatim; an explicit output directory
/// gets `{stem}_enhanced{ext}` inside it; otherwise the same scheme lands
/// next to the input. On collision a `_1`, `_2`, ... counter is inserted
/// before the extension. A derived path never points at an existing file; an
/// explicit one is returned as given and checked downstream.
pub fn resolve_output_path(task: &VideoTask) -> Result<PathBuf, EnhanceError> {
    if let Some(explicit) = &task.output_path {
        return Ok(explicit.clone());
    }

    let dir = match &task.output_dir {
        Some(dir) => dir.clone(),
        None => task
            .input_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    let stem = task
        .input_path
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| {
            EnhanceError::Path(format!(
                "input has no usable file name: {}",
                task.input_path.display()
            ))
        })?;
    let ext = task
        .input_path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("");

    let base_name = if ext.is_empty() {
        format!("{stem}{OUTPUT_SUFFIX}")
    } else {
        format!("{stem}{OUTPUT_SUFFIX}.{ext}")
    };
    let base = dir.join(&base_name);
    if !base.exists() {
        return Ok(base);
    }

    for counter in 1..=MAX_COLLISION_ATTEMPTS {
        let name = if ext.is_empty() {
            format!("{stem}{OUTPUT_SUFFIX}_{counter}")
        } else {
            format!("{stem}{OUTPUT_SUFFIX}_{counter}.{ext}")
        };
        let candidate = dir.join(&name);
        if !candidate.exists() {
            debug!(path = %candidate.display(), counter, "collision resolved");
            return Ok(candidate);
        }
    }

    Err(EnhanceError::Path(format!(
        "could not resolve collision for {} after {MAX_COLLISION_ATTEMPTS} attempts",
        base.display()
    )))
}

/// Whether a path already carries the output naming scheme, i.e. its stem
/// ends in `_enhanced` or `_enhanced_N`. Batch enumeration uses this so a
/// run whose outputs land next to the inputs never re-ingests them.
pub fn is_enhanced_output(path: &Path) -> bool {
    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
        return false;
    };
    let Some((_, after)) = stem.rsplit_once(OUTPUT_SUFFIX) else {
        return false;
    };
    after.is_empty()
        || after
            .strip_prefix('_')
            .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}
