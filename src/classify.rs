//! Artifact classification
//!
//! Decides what a file is before anything touches the network. The rules
//! are a fixed, ordered list over the path string and sibling existence:
//!
//! 1. `.xml` that is not `reports.xml` is a screen definition.
//! 2. `.js`/`.py` without a `-deploy`/`.deploy` marker is a script.
//! 3. `.json` that is not a pre-deploy config and has no sibling script of
//!    the same base name is an inspection form. With such a sibling it is
//!    that script's post-deploy config and is never pushed on its own.
//! 4. `.rptdesign` is a report design.
//! 5. Everything else is ignored.

use std::path::{Path, PathBuf};

use crate::fs::FileSystem;
use crate::models::{ArtifactKind, ScriptLanguage};

/// The reserved per-directory report descriptor file name
pub const REPORTS_FILE: &str = "reports.xml";

/// Path with the final extension removed, as a string.
///
/// Files without a dot have no base; they cannot carry companions.
fn base(path: &Path) -> Option<String> {
    let name = path.to_string_lossy();
    name.rfind('.').map(|dot| name[..dot].to_string())
}

/// Sibling path formed by appending `suffix` to the base name
pub(crate) fn sibling(path: &Path, suffix: &str) -> Option<PathBuf> {
    base(path).map(|b| PathBuf::from(format!("{b}{suffix}")))
}

/// A script file whose base name carries a deploy marker is a companion
/// payload, not a deployable script.
fn has_deploy_marker(path: &Path) -> bool {
    match base(path) {
        Some(b) => b.ends_with("-deploy") || b.ends_with(".deploy"),
        None => false,
    }
}

fn is_pre_deploy(name: &str) -> bool {
    name.ends_with(".predeploy.json") || name.ends_with("-predeploy.json")
}

/// Classify a file path.
///
/// Pure function of the path and the existence of sibling files; performs
/// no network calls and never reads file content.
pub fn classify<FS: FileSystem + ?Sized>(path: &Path, fs: &FS) -> ArtifactKind {
    let name = path.to_string_lossy();

    if name.ends_with(".xml") {
        if name.ends_with(REPORTS_FILE) {
            // report descriptor, consumed alongside its .rptdesign siblings
            return ArtifactKind::Ignored;
        }
        return ArtifactKind::Screen;
    }

    if name.ends_with(".js") || name.ends_with(".py") {
        if has_deploy_marker(path) {
            return ArtifactKind::Ignored;
        }
        let language = if name.ends_with(".py") {
            ScriptLanguage::Python
        } else {
            ScriptLanguage::JavaScript
        };
        return ArtifactKind::Script { language };
    }

    if name.ends_with(".json") {
        if is_pre_deploy(&name) {
            return ArtifactKind::Ignored;
        }
        let has_script_sibling = [".js", ".py"].iter().any(|ext| {
            sibling(path, ext)
                .map(|candidate| fs.exists(&candidate))
                .unwrap_or(false)
        });
        if has_script_sibling {
            // post-deploy config for the sibling script
            return ArtifactKind::Ignored;
        }
        return ArtifactKind::Form;
    }

    if name.ends_with(".rptdesign") {
        return ArtifactKind::Report;
    }

    ArtifactKind::Ignored
}

/// File extensions the directory walk considers at all
pub fn has_deployable_extension(path: &Path) -> bool {
    let name = path.to_string_lossy();
    [".js", ".py", ".xml", ".json", ".rptdesign"]
        .iter()
        .any(|ext| name.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;

    fn kind(path: &str, fs: &MockFileSystem) -> ArtifactKind {
        classify(Path::new(path), fs)
    }

    #[test]
    fn xml_is_screen() {
        let fs = MockFileSystem::new();
        assert_eq!(kind("screens/wotrack.xml", &fs), ArtifactKind::Screen);
    }

    #[test]
    fn reports_xml_is_not_a_screen() {
        let fs = MockFileSystem::new();
        assert_eq!(kind("reports/reports.xml", &fs), ArtifactKind::Ignored);
    }

    #[test]
    fn js_and_py_are_scripts_with_language() {
        let fs = MockFileSystem::new();
        assert_eq!(
            kind("scripts/oncreate.js", &fs),
            ArtifactKind::Script {
                language: ScriptLanguage::JavaScript
            }
        );
        assert_eq!(
            kind("scripts/oncreate.py", &fs),
            ArtifactKind::Script {
                language: ScriptLanguage::Python
            }
        );
    }

    #[test]
    fn deploy_markers_are_never_scripts() {
        let fs = MockFileSystem::new();
        assert_eq!(kind("scripts/oncreate-deploy.js", &fs), ArtifactKind::Ignored);
        assert_eq!(kind("scripts/oncreate.deploy.js", &fs), ArtifactKind::Ignored);
        assert_eq!(kind("scripts/oncreate-deploy.py", &fs), ArtifactKind::Ignored);
        assert_eq!(kind("scripts/oncreate.deploy.py", &fs), ArtifactKind::Ignored);
    }

    #[test]
    fn json_without_sibling_is_form() {
        let fs = MockFileSystem::new();
        assert_eq!(kind("forms/inspection.json", &fs), ArtifactKind::Form);
    }

    #[test]
    fn json_with_script_sibling_is_companion() {
        let fs = MockFileSystem::new().with_file("scripts/oncreate.js", "");
        assert_eq!(kind("scripts/oncreate.json", &fs), ArtifactKind::Ignored);

        let fs = MockFileSystem::new().with_file("scripts/oncreate.py", "");
        assert_eq!(kind("scripts/oncreate.json", &fs), ArtifactKind::Ignored);
    }

    #[test]
    fn predeploy_json_is_never_pushed() {
        let fs = MockFileSystem::new();
        assert_eq!(kind("scripts/oncreate.predeploy.json", &fs), ArtifactKind::Ignored);
        assert_eq!(kind("scripts/oncreate-predeploy.json", &fs), ArtifactKind::Ignored);
    }

    #[test]
    fn rptdesign_is_report() {
        let fs = MockFileSystem::new();
        assert_eq!(kind("reports/wo_detail.rptdesign", &fs), ArtifactKind::Report);
    }

    #[test]
    fn unrecognized_extensions_are_ignored() {
        let fs = MockFileSystem::new();
        assert_eq!(kind("README.md", &fs), ArtifactKind::Ignored);
        assert_eq!(kind("notes.txt", &fs), ArtifactKind::Ignored);
        assert_eq!(kind("Makefile", &fs), ArtifactKind::Ignored);
    }

    #[test]
    fn deployable_extension_filter() {
        assert!(has_deployable_extension(Path::new("a.js")));
        assert!(has_deployable_extension(Path::new("a.py")));
        assert!(has_deployable_extension(Path::new("a.xml")));
        assert!(has_deployable_extension(Path::new("a.json")));
        assert!(has_deployable_extension(Path::new("a.rptdesign")));
        assert!(!has_deployable_extension(Path::new("a.md")));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            // classification is deterministic and side-effect-free: the
            // same filesystem state always yields the same answer
            #[test]
            fn classify_is_deterministic(name in "[a-z0-9._-]{1,24}(\\.(js|py|json|xml|rptdesign|md))?") {
                let fs = MockFileSystem::new().with_file("dir/other.js", "");
                let path = PathBuf::from("dir").join(&name);
                let first = classify(&path, &fs);
                let second = classify(&path, &fs);
                prop_assert_eq!(first, second);
            }
        }
    }
}
