//! maxdeploy - Maximo deployment and extraction tool
//!
//! maxdeploy pushes automation scripts, screen definitions, report designs
//! and inspection forms from a local directory tree to a Maximo
//! Application Suite instance, pulls the same artifacts back out to local
//! files, and tails the server log. Deployments understand companion
//! files (deploy overrides, pre/post-deploy configuration) and drive the
//! server's admin-mode/database-configuration protocol when a pre-deploy
//! config declares schema changes.

pub mod classify;
pub mod client;
pub mod companion;
pub mod dbconfig;
pub mod deploy;
pub mod error;
pub mod extract;
pub mod fs;
pub mod logstream;
pub mod models;
pub mod report;
pub mod settings;

// Re-exports for convenience
pub use classify::classify;
pub use client::{ClientConfig, HttpMaximoClient, MaximoClient};
pub use companion::CompanionSet;
pub use dbconfig::{DbConfigSequencer, Phase, Sleeper, ThreadSleeper, POLL_INTERVAL};
pub use deploy::{DeployOptions, DeploySummary, Deployer};
pub use error::{DeployError, DeployResult};
pub use extract::{ExtractKind, ExtractOptions, ExtractSummary};
pub use fs::{FileSystem, LocalFs};
pub use models::{Artifact, ArtifactKind, PreDeployConfig, PushOutcome, PushStatus, ScriptLanguage};
pub use settings::{Overrides, Settings};
