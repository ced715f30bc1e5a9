//! Core data models for maxdeploy
//!
//! Defines the fundamental data structures used throughout maxdeploy:
//! - `ArtifactKind`: classification of a deployable file
//! - `PushOutcome`: the server's answer to one push
//! - `PreDeployConfig`: parsed pre-deploy configuration flags

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Script language, inferred from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptLanguage {
    JavaScript,
    Python,
}

impl ScriptLanguage {
    /// File extension for this language, including the dot
    pub fn extension(&self) -> &'static str {
        match self {
            ScriptLanguage::JavaScript => ".js",
            ScriptLanguage::Python => ".py",
        }
    }

    /// Map a server-side script language name to a local file extension.
    ///
    /// Unknown languages map to `.unknown` so extracted files are never
    /// silently mislabeled.
    pub fn extension_for(language: &str) -> &'static str {
        match language.to_lowercase().as_str() {
            "python" | "jython" => ".py",
            "nashorn" | "javascript" | "emcascript" | "js" => ".js",
            _ => ".unknown",
        }
    }
}

/// Classification of one deployable file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Automation script (`.js`, `.py`)
    Script { language: ScriptLanguage },
    /// Screen presentation definition (`.xml`)
    Screen,
    /// Inspection form definition (`.json` with no sibling script)
    Form,
    /// BIRT report design (`.rptdesign`)
    Report,
    /// Not a primary artifact; skipped for direct push
    Ignored,
}

impl ArtifactKind {
    pub fn is_script(&self) -> bool {
        matches!(self, ArtifactKind::Script { .. })
    }
}

/// A classified deployable file
///
/// Discovered during the directory walk or named directly on the command
/// line. Immutable once classified; consumed by exactly one push.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub path: PathBuf,
    pub kind: ArtifactKind,
}

impl Artifact {
    pub fn new(path: impl Into<PathBuf>, kind: ArtifactKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }
}

/// Status of one push attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    /// The server accepted the artifact
    #[default]
    #[serde(alias = "success")]
    Ok,
    /// The server rejected the artifact
    Error,
    /// The file was not a pushable artifact
    Ignored,
}

/// Outcome of pushing one artifact
///
/// Every push attempt yields exactly one outcome. The remote-assigned
/// `script_name` is what reconciliation keys on; pushes that omit it make
/// delete-all unsafe for the whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushOutcome {
    #[serde(default)]
    pub status: PushStatus,

    #[serde(default, rename = "scriptName", skip_serializing_if = "Option::is_none")]
    pub script_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<serde_json::Value>,
}

impl PushOutcome {
    /// Outcome for a file that is not a pushable artifact
    pub fn ignored() -> Self {
        Self {
            status: PushStatus::Ignored,
            ..Self::default()
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == PushStatus::Error
    }

    /// Best available description of an error outcome
    pub fn error_message(&self) -> String {
        if let Some(message) = &self.message {
            message.clone()
        } else if let Some(cause) = &self.cause {
            format!("Error: {}", cause)
        } else {
            "An unknown error occurred.".to_string()
        }
    }
}

/// Parsed pre-deploy configuration
///
/// The raw JSON is posted to the server verbatim; the parsed flags decide
/// whether a database configuration sequence is needed and whether admin
/// mode may be used for it.
#[derive(Debug, Clone)]
pub struct PreDeployConfig {
    /// Path the config was read from, for operator messages
    pub path: PathBuf,
    /// Raw JSON text, forwarded unmodified
    pub raw: String,
    /// Number of declared object changes
    pub object_changes: usize,
    /// The config opts out of automatic database configuration
    pub no_db_config: bool,
    /// The config forbids admin mode even if the server requires it
    pub no_admin_mode: bool,
}

#[derive(Debug, Deserialize)]
struct PreDeployFlags {
    #[serde(default, rename = "maxObjects")]
    max_objects: Vec<serde_json::Value>,
    #[serde(default, rename = "noDBConfig")]
    no_db_config: bool,
    #[serde(default, rename = "noAdminMode")]
    no_admin_mode: bool,
}

impl PreDeployConfig {
    /// Parse a pre-deploy configuration from its raw JSON text
    pub fn parse(path: impl Into<PathBuf>, raw: String) -> crate::error::DeployResult<Self> {
        let flags: PreDeployFlags = serde_json::from_str(&raw)?;
        Ok(Self {
            path: path.into(),
            raw,
            object_changes: flags.max_objects.len(),
            no_db_config: flags.no_db_config,
            no_admin_mode: flags.no_admin_mode,
        })
    }

    /// A database configuration sequence is needed only for a non-empty
    /// object change list that has not opted out.
    pub fn wants_db_config(&self) -> bool {
        self.object_changes > 0 && !self.no_db_config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_outcome_status_defaults_to_ok() {
        let outcome: PushOutcome = serde_json::from_str(r#"{"scriptName":"AUTOSCRIPT.TEST"}"#).unwrap();
        assert_eq!(outcome.status, PushStatus::Ok);
        assert_eq!(outcome.script_name.as_deref(), Some("AUTOSCRIPT.TEST"));
    }

    #[test]
    fn test_push_outcome_error_with_message() {
        let outcome: PushOutcome =
            serde_json::from_str(r#"{"status":"error","message":"no such app"}"#).unwrap();
        assert!(outcome.is_error());
        assert_eq!(outcome.error_message(), "no such app");
    }

    #[test]
    fn test_push_outcome_error_with_cause_only() {
        let outcome: PushOutcome =
            serde_json::from_str(r#"{"status":"error","cause":{"code":500}}"#).unwrap();
        assert!(outcome.is_error());
        assert_eq!(outcome.error_message(), r#"Error: {"code":500}"#);
    }

    #[test]
    fn test_push_outcome_unknown_error() {
        let outcome: PushOutcome = serde_json::from_str(r#"{"status":"error"}"#).unwrap();
        assert_eq!(outcome.error_message(), "An unknown error occurred.");
    }

    #[test]
    fn test_pre_deploy_parse_full() {
        let raw = r#"{
            "maxObjects": [{"objectName": "CUSTOBJ"}],
            "noDBConfig": false,
            "noAdminMode": true
        }"#;
        let config = PreDeployConfig::parse("scripts/oncreate.predeploy.json", raw.to_string()).unwrap();
        assert_eq!(config.object_changes, 1);
        assert!(!config.no_db_config);
        assert!(config.no_admin_mode);
        assert!(config.wants_db_config());
    }

    #[test]
    fn test_pre_deploy_defaults() {
        let config = PreDeployConfig::parse("p.predeploy.json", "{}".to_string()).unwrap();
        assert_eq!(config.object_changes, 0);
        assert!(!config.no_db_config);
        assert!(!config.no_admin_mode);
        assert!(!config.wants_db_config());
    }

    #[test]
    fn test_pre_deploy_opt_out() {
        let raw = r#"{"maxObjects": [{}], "noDBConfig": true}"#;
        let config = PreDeployConfig::parse("p.predeploy.json", raw.to_string()).unwrap();
        assert_eq!(config.object_changes, 1);
        assert!(!config.wants_db_config());
    }

    #[test]
    fn test_script_language_extension_for() {
        assert_eq!(ScriptLanguage::extension_for("jython"), ".py");
        assert_eq!(ScriptLanguage::extension_for("Nashorn"), ".js");
        assert_eq!(ScriptLanguage::extension_for("cobol"), ".unknown");
    }
}
