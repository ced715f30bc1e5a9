//! Companion file resolution
//!
//! A script artifact can carry up to three companions, matched purely by
//! filename convention:
//!
//! - a deploy override (`<base>-deploy.<ext>` or `<base>.deploy.<ext>`),
//!   forwarded with the script push
//! - a pre-deploy configuration (`<base>.predeploy.json`), applied before
//!   the push and possibly triggering a database configuration sequence
//! - a post-deploy configuration (`<base>.json`), applied only after a
//!   successful push
//!
//! Missing companions are not errors. A companion file never becomes a
//! primary artifact in its own right.

use std::path::{Path, PathBuf};

use crate::classify::sibling;
use crate::error::DeployResult;
use crate::fs::FileSystem;
use crate::models::PreDeployConfig;

/// Companions resolved for one script artifact
#[derive(Debug, Clone, Default)]
pub struct CompanionSet {
    /// Raw deploy override payload, if a marker file exists
    pub deploy_override: Option<String>,
    /// Parsed pre-deploy configuration, if present
    pub pre_deploy: Option<PreDeployConfig>,
    /// Path to the post-deploy configuration; read only after the push
    /// succeeds
    pub post_deploy: Option<PathBuf>,
}

/// Resolve the companion set for a script artifact.
///
/// All lookups are read-only. The `-deploy` marker is checked before the
/// `.deploy` marker; the first match wins.
pub fn resolve<FS: FileSystem + ?Sized>(script: &Path, fs: &FS) -> DeployResult<CompanionSet> {
    let name = script.to_string_lossy();
    let ext = match name.rfind('.') {
        Some(dot) => name[dot..].to_string(),
        None => return Ok(CompanionSet::default()),
    };

    let mut companions = CompanionSet::default();

    for marker in [format!("-deploy{ext}"), format!(".deploy{ext}")] {
        if let Some(candidate) = sibling(script, &marker) {
            if fs.exists(&candidate) {
                companions.deploy_override = Some(fs.read_to_string(&candidate)?);
                break;
            }
        }
    }

    if let Some(pre_path) = sibling(script, ".predeploy.json") {
        if fs.exists(&pre_path) {
            let raw = fs.read_to_string(&pre_path)?;
            companions.pre_deploy = Some(PreDeployConfig::parse(&pre_path, raw)?);
        }
    }

    if let Some(post_path) = sibling(script, ".json") {
        if fs.exists(&post_path) {
            companions.post_deploy = Some(post_path);
        }
    }

    Ok(companions)
}
