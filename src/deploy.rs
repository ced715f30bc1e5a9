//! Deployment orchestration
//!
//! Drives a deployment run end to end: classify each file, resolve its
//! companions, run the database configuration sequencer when a pre-deploy
//! config calls for it, push through the matching remote verb, and apply
//! the post-deploy configuration after a successful push.
//!
//! Directory mode walks the tree sequentially. An error in one file is
//! printed and recorded but never stops the walk; partial deployment is
//! accepted behavior, surfaced rather than rolled back. After the walk a
//! reconciliation pass can delete remote scripts that were not part of
//! this run.

use std::path::{Path, PathBuf};

use crate::classify::{classify, has_deployable_extension};
use crate::client::MaximoClient;
use crate::companion;
use crate::dbconfig::{DbConfigSequencer, Sleeper};
use crate::error::{DeployError, DeployResult};
use crate::fs::FileSystem;
use crate::models::{Artifact, ArtifactKind, PushOutcome, PushStatus};
use crate::report;

/// Options for one deployment run
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Directory to walk, and the base for relative `file` paths
    pub directory: PathBuf,
    /// Deploy a single file instead of walking the directory
    pub file: Option<PathBuf>,
    /// Descend into subdirectories during the walk
    pub recursive: bool,
    /// The run may place the server in Admin Mode for schema changes
    pub allow_admin_mode: bool,
    /// Delete every remote script not deployed by this run
    pub delete_all: bool,
    /// Path to an explicit JSON list of script names to delete
    pub delete_list: PathBuf,
}

/// Aggregate result of a deployment run
#[derive(Debug, Clone, Default)]
pub struct DeploySummary {
    /// Files successfully pushed
    pub deployed: Vec<PathBuf>,
    /// Per-file errors collected during a directory walk
    pub errors: Vec<String>,
    /// Remote scripts deleted by the reconciliation pass
    pub deleted: Vec<String>,
    /// delete-all was requested but skipped as unsafe
    pub reconciliation_skipped: bool,
}

impl DeploySummary {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Orchestrates one deployment run against a single client.
///
/// Strictly sequential: one remote call at a time, so schema changes and
/// admin-mode transitions never interleave.
pub struct Deployer<'a, C, FS, S>
where
    C: MaximoClient + ?Sized,
    FS: FileSystem + ?Sized,
    S: Sleeper,
{
    client: &'a C,
    fs: &'a FS,
    sleeper: &'a S,
    options: DeployOptions,
    /// remote names of scripts deployed this run, lower-cased in push order
    deployed_scripts: Vec<String>,
    /// a script push did not report its remote name; delete-all is unsafe
    missing_script_name: bool,
}

impl<'a, C, FS, S> Deployer<'a, C, FS, S>
where
    C: MaximoClient + ?Sized,
    FS: FileSystem + ?Sized,
    S: Sleeper,
{
    pub fn new(client: &'a C, fs: &'a FS, sleeper: &'a S, options: DeployOptions) -> Self {
        Self {
            client,
            fs,
            sleeper,
            options,
            deployed_scripts: Vec::new(),
            missing_script_name: false,
        }
    }

    /// Run the deployment: single-file mode when a file is configured,
    /// directory mode otherwise.
    pub fn run(&mut self) -> DeployResult<DeploySummary> {
        let mut summary = DeploySummary::default();

        if let Some(file) = self.options.file.clone() {
            let resolved = if file.is_absolute() {
                file
            } else {
                self.options.directory.join(file)
            };
            let outcome = self.deploy_file(&resolved)?;
            if outcome.status == PushStatus::Ok {
                summary.deployed.push(resolved);
            }
            return Ok(summary);
        }

        let directory = self.options.directory.clone();
        self.deploy_directory(&directory, &mut summary)?;
        self.reconcile(&mut summary)?;
        Ok(summary)
    }

    /// Deploy one file. Classification decides the remote verb; errors are
    /// returned to the caller, which in directory mode records them and
    /// moves on.
    pub fn deploy_file(&mut self, path: &Path) -> DeployResult<PushOutcome> {
        let artifact = Artifact::new(path, classify(path, self.fs));
        let outcome = match artifact.kind {
            ArtifactKind::Ignored => PushOutcome::ignored(),
            ArtifactKind::Screen => {
                let content = self.fs.read_to_string(&artifact.path)?;
                self.client.post_screen(&content)?
            }
            ArtifactKind::Script { .. } => self.deploy_script(&artifact.path)?,
            ArtifactKind::Form => {
                let content = self.fs.read_to_string(&artifact.path)?;
                let form: serde_json::Value = serde_json::from_str(&content)?;
                self.client.post_form(&form)?
            }
            ArtifactKind::Report => {
                let payload = report::build_payload(&artifact.path, self.fs)?;
                println!("Deploying report {}", payload.report_name);
                self.client.post_report(&payload)?
            }
        };

        if outcome.is_error() {
            return Err(DeployError::Push {
                path: artifact.path,
                message: outcome.error_message(),
            });
        }

        if outcome.status == PushStatus::Ok {
            self.record_deployed(&artifact, &outcome);
        }

        Ok(outcome)
    }

    /// Push a script: pre-deploy config first, then the database
    /// configuration cycle if the config declares object changes, then the
    /// script itself, and the post-deploy config only after success.
    fn deploy_script(&mut self, path: &Path) -> DeployResult<PushOutcome> {
        let content = self.fs.read_to_string(path)?;
        let companions = companion::resolve(path, self.fs)?;

        if let Some(pre) = &companions.pre_deploy {
            println!(
                "Applying pre-deploy configuration file {}",
                pre.path.display()
            );
            self.client.post_config(&pre.raw)?;

            if pre.wants_db_config() {
                let mut sequencer =
                    DbConfigSequencer::new(self.client, self.sleeper, self.options.allow_admin_mode);
                sequencer.run(pre)?;
            }
        }

        let outcome =
            self.client
                .post_script(&content, path, companions.deploy_override.as_deref())?;

        if !outcome.is_error() {
            if let Some(post_path) = &companions.post_deploy {
                let post = self.fs.read_to_string(post_path)?;
                self.client.post_config(&post)?;
            }
        }

        Ok(outcome)
    }

    fn record_deployed(&mut self, artifact: &Artifact, outcome: &PushOutcome) {
        if let Some(name) = &outcome.script_name {
            self.deployed_scripts.push(name.to_lowercase());
            println!("Deployed {} as {} to Maximo.", artifact.path.display(), name);
        } else if artifact.kind.is_script() {
            self.missing_script_name = true;
            println!(
                "Deployed {} but a script name was not returned.",
                artifact.path.display()
            );
        } else if artifact.kind == ArtifactKind::Report {
            let file_name = artifact
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            println!("Deployed report {} to Maximo.", file_name);
        } else {
            println!("Deployed {} to Maximo.", artifact.path.display());
        }
    }

    /// Walk one directory level. Per-file errors are caught here; errors
    /// listing a directory propagate and end the run.
    fn deploy_directory(&mut self, dir: &Path, summary: &mut DeploySummary) -> DeployResult<()> {
        for entry in self.fs.read_dir(dir)? {
            if entry.is_dir {
                if self.options.recursive {
                    self.deploy_directory(&entry.path, summary)?;
                }
                continue;
            }
            if !has_deployable_extension(&entry.path) {
                continue;
            }
            match self.deploy_file(&entry.path) {
                Ok(outcome) => {
                    if outcome.status == PushStatus::Ok {
                        summary.deployed.push(entry.path.clone());
                    }
                }
                Err(error) => {
                    eprintln!("{error}");
                    summary.errors.push(error.to_string());
                }
            }
        }
        Ok(())
    }

    /// Post-walk reconciliation: delete-all computes the set difference
    /// between the remote inventory and this run; delete-list takes an
    /// explicit list of names. Both rely on the idempotent per-name
    /// delete.
    fn reconcile(&mut self, summary: &mut DeploySummary) -> DeployResult<()> {
        if self.options.delete_all {
            if self.missing_script_name {
                eprintln!(
                    "The --delete-all option was set but one or more scripts did not return a script name after deploying. Deleting all is an unsafe operation, skipping the delete."
                );
                summary.reconciliation_skipped = true;
                return Ok(());
            }

            for name in self.client.get_all_script_names()? {
                if !self.deployed_scripts.contains(&name.to_lowercase()) {
                    self.client.delete_script_if_exists(&name)?;
                    summary.deleted.push(name);
                }
            }
            return Ok(());
        }

        if self.fs.exists(&self.options.delete_list) {
            let raw = self.fs.read_to_string(&self.options.delete_list)?;
            let names: Vec<String> = serde_json::from_str(&raw)?;
            for name in names {
                self.client.delete_script_if_exists(&name)?;
                summary.deleted.push(name);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockClient;
    use crate::dbconfig::NoopSleeper;
    use crate::fs::MockFileSystem;
    use crate::models::PushStatus;

    fn options(directory: &str) -> DeployOptions {
        DeployOptions {
            directory: PathBuf::from(directory),
            file: None,
            recursive: true,
            allow_admin_mode: false,
            delete_all: false,
            delete_list: PathBuf::from("delete.json"),
        }
    }

    #[test]
    fn script_push_applies_configs_in_order() {
        let fs = MockFileSystem::new()
            .with_file("src/oncreate.js", "code")
            .with_file(
                "src/oncreate.predeploy.json",
                r#"{"maxObjects":[{"objectName":"CUSTOBJ"}]}"#,
            )
            .with_file("src/oncreate.json", r#"{"after":true}"#);
        let client = MockClient::new();
        client.db_config_required.set(false);
        let sleeper = NoopSleeper::default();

        let mut opts = options("src");
        opts.file = Some(PathBuf::from("oncreate.js"));
        let mut deployer = Deployer::new(&client, &fs, &sleeper, opts);
        let summary = deployer.run().unwrap();

        assert_eq!(summary.deployed, vec![PathBuf::from("src/oncreate.js")]);
        assert_eq!(
            *client.calls.borrow(),
            vec![
                "post_config",
                "db_config_required",
                "post_script",
                "post_config"
            ]
        );
        let configs = client.posted_configs.borrow();
        assert!(configs[0].contains("maxObjects"));
        assert!(configs[1].contains("after"));
    }

    #[test]
    fn post_deploy_config_is_not_applied_after_a_rejected_push() {
        let fs = MockFileSystem::new()
            .with_file("src/oncreate.js", "code")
            .with_file("src/oncreate.json", r#"{"after":true}"#);
        let client = MockClient::new();
        client.set_script_outcome(
            "oncreate.js",
            PushOutcome {
                status: PushStatus::Error,
                message: Some("rejected".to_string()),
                ..PushOutcome::default()
            },
        );
        let sleeper = NoopSleeper::default();

        let mut opts = options("src");
        opts.file = Some(PathBuf::from("oncreate.js"));
        let mut deployer = Deployer::new(&client, &fs, &sleeper, opts);
        let err = deployer.run().unwrap_err();

        assert!(err.to_string().contains("rejected"));
        assert_eq!(client.call_count("post_config"), 0);
    }

    #[test]
    fn failed_sequencer_prevents_the_script_push() {
        let fs = MockFileSystem::new()
            .with_file("src/oncreate.js", "code")
            .with_file(
                "src/oncreate.predeploy.json",
                r#"{"maxObjects":[{"objectName":"CUSTOBJ"}]}"#,
            );
        let client = MockClient::new();
        client.db_config_required.set(true);
        client.requires_admin_mode.set(true);
        let sleeper = NoopSleeper::default();

        let mut opts = options("src");
        opts.file = Some(PathBuf::from("oncreate.js"));
        // allow_admin_mode stays false: the sequencer must refuse
        let mut deployer = Deployer::new(&client, &fs, &sleeper, opts);
        let err = deployer.run().unwrap_err();

        assert!(err.to_string().contains("--allow-admin-mode is false"));
        assert_eq!(client.call_count("post_script"), 0);
        assert_eq!(client.call_count("set_admin_mode_on"), 0);
    }

    #[test]
    fn companion_json_is_never_pushed_directly() {
        let fs = MockFileSystem::new()
            .with_file("src/oncreate.js", "code")
            .with_file("src/oncreate.json", r#"{"after":true}"#);
        let client = MockClient::new();
        let sleeper = NoopSleeper::default();

        let mut deployer = Deployer::new(&client, &fs, &sleeper, options("src"));
        let summary = deployer.run().unwrap();

        // the walk visits both files but only the script is pushed; its
        // companion json is applied as post-deploy config
        assert_eq!(summary.deployed, vec![PathBuf::from("src/oncreate.js")]);
        assert_eq!(client.call_count("post_form"), 0);
        assert_eq!(client.call_count("post_script"), 1);
        assert_eq!(client.call_count("post_config"), 1);
    }

    #[test]
    fn standalone_json_is_pushed_as_form() {
        let fs = MockFileSystem::new().with_file("src/inspection.json", r#"{"name":"Pump"}"#);
        let client = MockClient::new();
        let sleeper = NoopSleeper::default();

        let mut deployer = Deployer::new(&client, &fs, &sleeper, options("src"));
        let summary = deployer.run().unwrap();

        assert_eq!(summary.deployed, vec![PathBuf::from("src/inspection.json")]);
        assert_eq!(client.call_count("post_form"), 1);
    }

    #[test]
    fn walk_continues_past_a_failing_file() {
        let fs = MockFileSystem::new()
            .with_file("src/bad.js", "broken")
            .with_file("src/good.js", "fine");
        let client = MockClient::new();
        client.set_script_outcome(
            "bad.js",
            PushOutcome {
                status: PushStatus::Error,
                message: Some("compile failed".to_string()),
                ..PushOutcome::default()
            },
        );
        let sleeper = NoopSleeper::default();

        let mut deployer = Deployer::new(&client, &fs, &sleeper, options("src"));
        let summary = deployer.run().unwrap();

        assert_eq!(summary.deployed, vec![PathBuf::from("src/good.js")]);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("compile failed"));
        assert_eq!(client.call_count("post_script"), 2);
        assert!(!summary.is_success());
    }

    #[test]
    fn recursion_flag_gates_subdirectories() {
        let fs = MockFileSystem::new()
            .with_file("src/top.js", "code")
            .with_file("src/nested/inner.js", "code");
        let client = MockClient::new();
        let sleeper = NoopSleeper::default();

        let mut opts = options("src");
        opts.recursive = false;
        let mut deployer = Deployer::new(&client, &fs, &sleeper, opts);
        let summary = deployer.run().unwrap();
        assert_eq!(summary.deployed, vec![PathBuf::from("src/top.js")]);

        let client = MockClient::new();
        let mut deployer = Deployer::new(&client, &fs, &sleeper, options("src"));
        let summary = deployer.run().unwrap();
        assert_eq!(summary.deployed.len(), 2);
    }

    #[test]
    fn delete_all_removes_exactly_the_undeployed_remainder() {
        let fs = MockFileSystem::new()
            .with_file("src/alpha.js", "code")
            .with_file("src/beta.js", "code");
        let client = MockClient::new();
        client
            .remote_scripts
            .borrow_mut()
            .extend(["ALPHA".to_string(), "BETA".to_string(), "GAMMA".to_string()]);
        let sleeper = NoopSleeper::default();

        let mut opts = options("src");
        opts.delete_all = true;
        let mut deployer = Deployer::new(&client, &fs, &sleeper, opts);
        let summary = deployer.run().unwrap();

        assert_eq!(summary.deleted, vec!["GAMMA".to_string()]);
        assert_eq!(*client.deleted.borrow(), vec!["GAMMA".to_string()]);
        assert!(!summary.reconciliation_skipped);
    }

    #[test]
    fn delete_all_is_skipped_when_a_script_name_is_missing() {
        let fs = MockFileSystem::new()
            .with_file("src/alpha.js", "code")
            .with_file("src/noname.js", "code");
        let client = MockClient::new();
        client.set_script_outcome("noname.js", PushOutcome::default());
        client
            .remote_scripts
            .borrow_mut()
            .extend(["ALPHA".to_string(), "GAMMA".to_string()]);
        let sleeper = NoopSleeper::default();

        let mut opts = options("src");
        opts.delete_all = true;
        let mut deployer = Deployer::new(&client, &fs, &sleeper, opts);
        let summary = deployer.run().unwrap();

        assert!(summary.reconciliation_skipped);
        assert!(summary.deleted.is_empty());
        // the remote inventory is never even fetched
        assert_eq!(client.call_count("get_all_script_names"), 0);
        assert_eq!(client.call_count("delete_script_if_exists"), 0);
    }

    #[test]
    fn delete_list_removes_named_scripts_without_cross_checking() {
        let fs = MockFileSystem::new()
            .with_file("src/alpha.js", "code")
            .with_file("delete.json", r#"["OLD1","OLD2"]"#);
        let client = MockClient::new();
        let sleeper = NoopSleeper::default();

        let mut deployer = Deployer::new(&client, &fs, &sleeper, options("src"));
        let summary = deployer.run().unwrap();

        assert_eq!(
            summary.deleted,
            vec!["OLD1".to_string(), "OLD2".to_string()]
        );
    }

    #[test]
    fn missing_delete_list_is_not_an_error() {
        let fs = MockFileSystem::new().with_file("src/alpha.js", "code");
        let client = MockClient::new();
        let sleeper = NoopSleeper::default();

        let mut deployer = Deployer::new(&client, &fs, &sleeper, options("src"));
        let summary = deployer.run().unwrap();
        assert!(summary.deleted.is_empty());
    }

    #[test]
    fn single_file_mode_resolves_relative_paths_against_the_directory() {
        let fs = MockFileSystem::new().with_file("src/sub/oncreate.js", "code");
        let client = MockClient::new();
        let sleeper = NoopSleeper::default();

        let mut opts = options("src");
        opts.file = Some(PathBuf::from("sub/oncreate.js"));
        let mut deployer = Deployer::new(&client, &fs, &sleeper, opts);
        let summary = deployer.run().unwrap();

        assert_eq!(summary.deployed, vec![PathBuf::from("src/sub/oncreate.js")]);
    }

    #[test]
    fn report_without_descriptor_fails_that_artifact_only() {
        let fs = MockFileSystem::new()
            .with_file("src/wo_detail.rptdesign", "<design/>")
            .with_file("src/good.js", "code");
        let client = MockClient::new();
        let sleeper = NoopSleeper::default();

        let mut deployer = Deployer::new(&client, &fs, &sleeper, options("src"));
        let summary = deployer.run().unwrap();

        assert_eq!(summary.deployed, vec![PathBuf::from("src/good.js")]);
        assert_eq!(summary.errors.len(), 1);
        assert!(summary.errors[0].contains("reports.xml"));
        assert_eq!(client.call_count("post_report"), 0);
    }
}
