//! maxdeploy CLI - Maximo deployment and extraction tool
//!
//! Usage: maxdeploy <COMMAND>
//!
//! Commands:
//!   encrypt  Encrypt the password and apikey in the settings file
//!   deploy   Deploy scripts, screens, reports or inspection forms
//!   extract  Extract artifacts from the server to local files
//!   log      Stream the Maximo log to the console

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use maxdeploy::client::{ClientConfig, HttpMaximoClient, MaximoClient};
use maxdeploy::dbconfig::ThreadSleeper;
use maxdeploy::deploy::{DeployOptions, Deployer};
use maxdeploy::extract::{ExtractKind, ExtractOptions};
use maxdeploy::fs::LocalFs;
use maxdeploy::settings::{Overrides, Settings};

/// maxdeploy - deploy, extract and tail Maximo automation artifacts
#[derive(Parser, Debug)]
#[command(name = "maxdeploy")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Allow untrusted SSL certificates
    #[arg(long, global = true)]
    allow_untrusted_certs: Option<bool>,

    /// Maximo API key; user name and password are ignored when set
    #[arg(short = 'a', long, global = true)]
    apikey: Option<String>,

    /// Path to the server certificate authority (CA) if it is not part of
    /// the system CA chain
    #[arg(long, global = true)]
    ca: Option<PathBuf>,

    /// Part of the URL that follows the hostname
    #[arg(short = 'c', long, global = true)]
    context: Option<String>,

    /// Maximo host name or IP address, without the http/s prefix
    #[arg(long, global = true)]
    host: Option<String>,

    /// Install and upgrade the server-side utility scripts automatically
    #[arg(short = 'i', long, global = true)]
    install: Option<bool>,

    /// Path to the encryption key for the settings encrypted values;
    /// relative paths resolve against the settings file directory
    #[arg(short = 'k', long, global = true)]
    key: Option<PathBuf>,

    /// Force native Maximo authentication
    #[arg(long, global = true)]
    maxauth: Option<bool>,

    /// Maximo user password
    #[arg(long, alias = "passwd", global = true)]
    password: Option<String>,

    /// Server port; defaults to 443 with ssl, 80 without
    #[arg(short = 'p', long, global = true)]
    port: Option<u16>,

    /// Path to the settings file
    #[arg(short = 's', long, global = true, default_value = maxdeploy::settings::DEFAULT_SETTINGS_PATH)]
    settings: PathBuf,

    /// Use SSL to connect
    #[arg(long, global = true)]
    ssl: Option<bool>,

    /// Connection timeout in seconds
    #[arg(short = 't', long, global = true)]
    timeout: Option<u64>,

    /// Maximo user name
    #[arg(short = 'u', long, global = true)]
    username: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Encrypt the password and apikey in the settings file
    Encrypt,

    /// Deploy a single artifact or every artifact in a directory
    Deploy {
        /// The deployment may place the server in Admin Mode and perform a
        /// database configuration if required; may cause a system
        /// disruption
        #[arg(long)]
        allow_admin_mode: Option<bool>,

        /// Delete every server script that is not in the deploy
        /// directory; destructive
        #[arg(long)]
        delete_all: Option<bool>,

        /// Path to a JSON list of server scripts to delete if they exist
        #[arg(long)]
        delete_list: Option<PathBuf>,

        /// Directory containing the artifacts to deploy
        #[arg(short = 'd', long)]
        directory: Option<PathBuf>,

        /// Single artifact file to deploy; relative paths resolve against
        /// --directory
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,

        /// Include subdirectories when deploying a directory
        #[arg(short = 'r', long)]
        recursive: Option<bool>,
    },

    /// Extract scripts, screens, reports or inspection forms to a local
    /// directory
    Extract {
        /// Directory to extract into
        #[arg(short = 'd', long)]
        directory: Option<PathBuf>,

        /// Overwrite existing files that differ from the server
        #[arg(short = 'o', long)]
        overwrite: Option<bool>,

        /// Type of object to extract: "script", "screen", "report" or
        /// "form"
        #[arg(long = "type")]
        kind: Option<String>,
    },

    /// Stream the Maximo log to the console
    Log {
        /// Seconds between logging requests
        #[arg(long)]
        log_timeout: Option<u64>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let overrides = build_overrides(&cli);
    let mut settings = Settings::load(&cli.settings, &overrides)?;

    match cli.command {
        Commands::Encrypt => cmd_encrypt(&cli.settings, cli.key.as_deref()),
        Commands::Deploy { .. } => cmd_deploy(&mut settings),
        Commands::Extract { .. } => cmd_extract(&mut settings),
        Commands::Log { .. } => cmd_log(&mut settings),
    }
}

fn build_overrides(cli: &Cli) -> Overrides {
    let mut overrides = Overrides {
        allow_untrusted_certs: cli.allow_untrusted_certs,
        apikey: cli.apikey.clone(),
        ca: cli.ca.clone(),
        context: cli.context.clone(),
        maxauth: cli.maxauth,
        host: cli.host.clone(),
        password: cli.password.clone(),
        port: cli.port,
        ssl: cli.ssl,
        key: cli.key.clone(),
        timeout: cli.timeout,
        username: cli.username.clone(),
        install: cli.install,
        ..Overrides::default()
    };

    match &cli.command {
        Commands::Deploy {
            allow_admin_mode,
            delete_all,
            delete_list,
            directory,
            file,
            recursive,
        } => {
            overrides.allow_admin_mode = *allow_admin_mode;
            overrides.delete_all = *delete_all;
            overrides.delete_list = delete_list.clone();
            overrides.directory = directory.clone();
            overrides.file = file.clone();
            overrides.recursive = *recursive;
        }
        Commands::Extract {
            directory,
            overwrite,
            kind,
        } => {
            overrides.extract_directory = directory.clone();
            overrides.overwrite = *overwrite;
            overrides.extract_type = kind.clone();
        }
        Commands::Log { log_timeout } => {
            overrides.log_timeout = *log_timeout;
        }
        Commands::Encrypt => {}
    }

    overrides
}

fn client_config(settings: &Settings) -> Result<ClientConfig> {
    let ca = match &settings.ca {
        Some(path) => Some(
            std::fs::read(path)
                .with_context(|| format!("Could not load file {}", path.display()))?,
        ),
        None => None,
    };

    Ok(ClientConfig {
        host: settings.host.clone().unwrap_or_default(),
        port: settings.port,
        context: settings.context.clone(),
        ssl: settings.ssl,
        apikey: settings.apikey.clone(),
        username: settings.username.clone(),
        password: settings.password.clone(),
        maxauth: settings.maxauth,
        allow_untrusted_certs: settings.allow_untrusted_certs,
        ca,
        timeout: Duration::from_secs(settings.timeout),
        install: settings.install,
    })
}

fn cmd_encrypt(settings_path: &PathBuf, key: Option<&std::path::Path>) -> Result<()> {
    maxdeploy::settings::encrypt_settings(settings_path, key)?;
    println!(
        "The password and apikey if present have been encrypted in the {} settings file.",
        settings_path.display()
    );
    Ok(())
}

fn cmd_deploy(settings: &mut Settings) -> Result<()> {
    settings.validate_deploy()?;

    let client = HttpMaximoClient::new(client_config(settings)?)?;
    client
        .connect()
        .context("Login unsuccessful, unable to login to Maximo")?;

    let options = DeployOptions {
        directory: settings.deploy.directory.clone(),
        file: settings.deploy.file.clone(),
        recursive: settings.deploy.recursive,
        allow_admin_mode: settings.deploy.allow_admin_mode,
        delete_all: settings.deploy.delete_all,
        delete_list: settings.deploy.delete_list.clone(),
    };

    let fs = LocalFs::new();
    let sleeper = ThreadSleeper;
    let mut deployer = Deployer::new(&client, &fs, &sleeper, options);
    let result = deployer.run();
    let _ = client.disconnect();

    let summary = result.context("Error deploying to Maximo")?;
    if !summary.deleted.is_empty() {
        println!("Deleted {} scripts from Maximo.", summary.deleted.len());
    }
    if !summary.errors.is_empty() {
        println!(
            "Deployed {} files, {} failed.",
            summary.deployed.len(),
            summary.errors.len()
        );
    }
    Ok(())
}

fn cmd_extract(settings: &mut Settings) -> Result<()> {
    settings.validate_extract()?;
    let kind: ExtractKind = settings.extract.kind.parse()?;

    let client = HttpMaximoClient::new(client_config(settings)?)?;
    client
        .connect()
        .context("Login unsuccessful, unable to login to Maximo")?;

    let options = ExtractOptions {
        directory: settings.extract.directory.clone(),
        overwrite: settings.extract.overwrite,
        kind,
    };

    let fs = LocalFs::new();
    let result = maxdeploy::extract::run(&client, &fs, &options);
    let _ = client.disconnect();

    result.with_context(|| format!("Error extracting {} from Maximo", settings.extract.kind))?;
    Ok(())
}

fn cmd_log(settings: &mut Settings) -> Result<()> {
    settings.validate_log()?;

    let client = HttpMaximoClient::new(client_config(settings)?)?;
    client
        .connect()
        .context("Login unsuccessful, unable to login to Maximo")?;

    let sleeper = ThreadSleeper;
    let result = maxdeploy::logstream::run(
        &client,
        &sleeper,
        Duration::from_secs(settings.log_timeout),
    );
    let _ = client.disconnect();
    result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_deploy() {
        let cli = Cli::try_parse_from(["maxdeploy", "deploy"]).unwrap();
        assert!(matches!(cli.command, Commands::Deploy { .. }));
    }

    #[test]
    fn test_cli_parse_deploy_with_args() {
        let cli = Cli::try_parse_from([
            "maxdeploy",
            "deploy",
            "--directory",
            "scripts",
            "--allow-admin-mode",
            "true",
            "--delete-all",
            "true",
        ])
        .unwrap();

        if let Commands::Deploy {
            directory,
            allow_admin_mode,
            delete_all,
            ..
        } = cli.command
        {
            assert_eq!(directory, Some(PathBuf::from("scripts")));
            assert_eq!(allow_admin_mode, Some(true));
            assert_eq!(delete_all, Some(true));
        } else {
            panic!("Expected Deploy command");
        }
    }

    #[test]
    fn test_cli_parse_extract_type() {
        let cli = Cli::try_parse_from(["maxdeploy", "extract", "--type", "screen"]).unwrap();
        if let Commands::Extract { kind, .. } = cli.command {
            assert_eq!(kind, Some("screen".to_string()));
        } else {
            panic!("Expected Extract command");
        }
    }

    #[test]
    fn test_cli_parse_log_timeout() {
        let cli = Cli::try_parse_from(["maxdeploy", "log", "--log-timeout", "60"]).unwrap();
        if let Commands::Log { log_timeout } = cli.command {
            assert_eq!(log_timeout, Some(60));
        } else {
            panic!("Expected Log command");
        }
    }

    #[test]
    fn test_cli_global_args_after_subcommand() {
        let cli = Cli::try_parse_from([
            "maxdeploy",
            "deploy",
            "--host",
            "max.example.com",
            "--ssl",
            "false",
        ])
        .unwrap();
        assert_eq!(cli.host, Some("max.example.com".to_string()));
        assert_eq!(cli.ssl, Some(false));
    }

    #[test]
    fn test_cli_settings_default() {
        let cli = Cli::try_parse_from(["maxdeploy", "encrypt"]).unwrap();
        assert_eq!(cli.settings, PathBuf::from("./settings.json"));
    }

    #[test]
    fn test_cli_requires_a_command() {
        assert!(Cli::try_parse_from(["maxdeploy"]).is_err());
    }

    #[test]
    fn test_overrides_carry_command_options() {
        let cli = Cli::try_parse_from([
            "maxdeploy",
            "deploy",
            "--recursive",
            "false",
            "--file",
            "oncreate.js",
        ])
        .unwrap();
        let overrides = build_overrides(&cli);
        assert_eq!(overrides.recursive, Some(false));
        assert_eq!(overrides.file, Some(PathBuf::from("oncreate.js")));
        assert!(overrides.extract_type.is_none());
    }
}
