//! Extraction of server artifacts to local files
//!
//! The inverse of deployment: pull scripts, screens, inspection forms or
//! report designs from the server and write them into the extract
//! directory under the same naming conventions the deploy walk expects.
//!
//! Overwrite rules differ by type, matching what each artifact can
//! tolerate: scripts and forms honor the overwrite flag, screens are
//! never overwritten, and report designs are rewritten when their content
//! hash differs from the server copy.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use sha2::{Digest, Sha256};

use crate::client::MaximoClient;
use crate::error::{DeployError, DeployResult};
use crate::fs::FileSystem;
use crate::models::ScriptLanguage;
use crate::report;

/// What to extract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractKind {
    #[default]
    Script,
    Screen,
    Report,
    Form,
}

impl FromStr for ExtractKind {
    type Err = DeployError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "script" => Ok(ExtractKind::Script),
            "screen" => Ok(ExtractKind::Screen),
            "report" => Ok(ExtractKind::Report),
            "form" => Ok(ExtractKind::Form),
            other => Err(DeployError::Settings {
                message: format!(
                    r#"The extract type must be "script", "screen", "report" or "form", not "{other}"."#
                ),
            }),
        }
    }
}

/// Options for one extraction run
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub directory: PathBuf,
    pub overwrite: bool,
    pub kind: ExtractKind,
}

/// Files written and skipped by one extraction run
#[derive(Debug, Clone, Default)]
pub struct ExtractSummary {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Run an extraction against a connected client.
pub fn run<C, FS>(client: &C, fs: &FS, options: &ExtractOptions) -> DeployResult<ExtractSummary>
where
    C: MaximoClient + ?Sized,
    FS: FileSystem + ?Sized,
{
    match options.kind {
        ExtractKind::Script => extract_scripts(client, fs, options),
        ExtractKind::Screen => extract_screens(client, fs, options),
        ExtractKind::Form => extract_forms(client, fs, options),
        ExtractKind::Report => extract_reports(client, fs, options),
    }
}

fn extract_scripts<C, FS>(
    client: &C,
    fs: &FS,
    options: &ExtractOptions,
) -> DeployResult<ExtractSummary>
where
    C: MaximoClient + ?Sized,
    FS: FileSystem + ?Sized,
{
    let names = client.get_all_script_names()?;
    if names.is_empty() {
        return Err(DeployError::Extract {
            message: "No scripts were found to extract.".to_string(),
        });
    }

    let mut summary = ExtractSummary::default();
    for name in names {
        let info = client.get_script(&name)?;
        let extension = ScriptLanguage::extension_for(&info.script_language);
        let output = options
            .directory
            .join(format!("{}{extension}", name.to_lowercase()));

        if !fs.exists(&output) || options.overwrite {
            fs.write(&output, info.script.as_bytes())?;
            println!("Extracted {} to {}", name, output.display());
            summary.written.push(output);
        } else {
            println!(
                "Script file {} exists and overwriting is disabled, skipping.",
                output.display()
            );
            summary.skipped.push(output);
        }
    }
    Ok(summary)
}

fn extract_screens<C, FS>(
    client: &C,
    fs: &FS,
    options: &ExtractOptions,
) -> DeployResult<ExtractSummary>
where
    C: MaximoClient + ?Sized,
    FS: FileSystem + ?Sized,
{
    let mut summary = ExtractSummary::default();
    for name in client.get_all_screen_names()? {
        let info = client.get_screen(&name)?;
        let output = options
            .directory
            .join(format!("{}.xml", name.to_lowercase()));

        // screens are hand-edited after extraction; never overwrite
        if !fs.exists(&output) {
            fs.write(&output, info.presentation.as_bytes())?;
            println!("Extracted {} to {}", name, output.display());
            summary.written.push(output);
        } else {
            println!(
                "Screen presentation file {} exists and overwriting is disabled, skipping.",
                output.display()
            );
            summary.skipped.push(output);
        }
    }
    Ok(summary)
}

fn extract_forms<C, FS>(
    client: &C,
    fs: &FS,
    options: &ExtractOptions,
) -> DeployResult<ExtractSummary>
where
    C: MaximoClient + ?Sized,
    FS: FileSystem + ?Sized,
{
    let mut summary = ExtractSummary::default();
    for form in client.get_all_forms()? {
        let info = client.get_form(&form.id)?;
        let name = info
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or(&form.name)
            .to_string();
        let output = options
            .directory
            .join(format!("{}.json", name.to_lowercase().replace(' ', "-")));

        if !fs.exists(&output) || options.overwrite {
            let source = serde_json::to_string_pretty(&info)?;
            fs.write(&output, source.as_bytes())?;
            println!("Extracted {} to {}", name, output.display());
            summary.written.push(output);
        } else {
            println!(
                "Inspection form file {} exists and overwriting is disabled, skipping.",
                output.display()
            );
            summary.skipped.push(output);
        }
    }
    Ok(summary)
}

fn extract_reports<C, FS>(
    client: &C,
    fs: &FS,
    options: &ExtractOptions,
) -> DeployResult<ExtractSummary>
where
    C: MaximoClient + ?Sized,
    FS: FileSystem + ?Sized,
{
    let mut summary = ExtractSummary::default();
    for report in client.get_all_reports()? {
        let info = match client.get_report(&report.report_id) {
            Ok(info) => info,
            Err(_) => {
                println!(
                    "Report {} does not have a report design in Maximo and will be skipped.",
                    report.report
                );
                continue;
            }
        };
        let Some(design) = info.design.clone() else {
            continue;
        };

        let folder = options
            .directory
            .join(info.report_folder.as_deref().unwrap_or_default());
        let output = folder.join(&report.report);
        fs.create_dir_all(&folder)?;

        if !fs.exists(&output) {
            fs.write(&output, design.as_bytes())?;
            println!("Extracted {}", report.report);
            summary.written.push(output.clone());
        } else {
            let incoming = format!("{:x}", Sha256::digest(design.as_bytes()));
            let existing = fs.hash_file(&output)?;
            if existing != incoming || options.overwrite {
                fs.write(&output, design.as_bytes())?;
                println!("Extracted {}", report.report);
                summary.written.push(output.clone());
            } else {
                println!(
                    "Report {} exists and overwriting is disabled, skipping.",
                    report.report
                );
                summary.skipped.push(output.clone());
            }
        }

        let resource_files = write_resources(&info, &folder, fs)?;
        write_descriptor(&info, &folder, &resource_files, fs)?;
    }
    Ok(summary)
}

/// Unpack the report's resource payload into a folder named after the
/// report, replacing whatever a previous extraction left there.
fn write_resources<FS>(
    info: &report::ReportDefinition,
    folder: &Path,
    fs: &FS,
) -> DeployResult<Vec<String>>
where
    FS: FileSystem + ?Sized,
{
    let Some(payload) = &info.resources else {
        return Ok(Vec::new());
    };

    let stem = Path::new(&info.report_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| info.report_name.clone());
    let resource_dir = folder.join(&stem);

    if fs.exists(&resource_dir) {
        for entry in fs.read_dir(&resource_dir)? {
            if !entry.is_dir {
                fs.remove_file(&entry.path)?;
            }
        }
    }

    let written = report::unzip_resources(payload, &resource_dir, fs)?;
    Ok(written
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect())
}

/// Rewrite the folder's `reports.xml`, replacing this report's entry and
/// leaving every other entry alone.
fn write_descriptor<FS>(
    info: &report::ReportDefinition,
    folder: &Path,
    resource_files: &[String],
    fs: &FS,
) -> DeployResult<()>
where
    FS: FileSystem + ?Sized,
{
    let descriptor_path = folder.join(crate::classify::REPORTS_FILE);
    let existing = if fs.exists(&descriptor_path) {
        Some(fs.read_to_string(&descriptor_path)?)
    } else {
        None
    };
    let xml = report::update_descriptor(existing.as_deref(), info, resource_files)?;
    fs.write(&descriptor_path, xml.as_bytes())
}
