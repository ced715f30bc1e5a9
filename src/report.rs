//! Report descriptors and payload assembly
//!
//! A `.rptdesign` file on its own is not deployable: the `reports.xml`
//! descriptor in the same directory supplies the report's attributes and
//! parameters, and an optional sibling folder named after the report holds
//! resource files that ship as a zipped base64 payload.
//!
//! The same `ReportDefinition` shape is used in both directions: assembled
//! from local files for a push, and received from the server during
//! extraction (where this module also rewrites `reports.xml` and unpacks
//! the resource payload).

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use base64::Engine;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use serde::{Deserialize, Serialize};

use crate::classify::REPORTS_FILE;
use crate::error::{DeployError, DeployResult};
use crate::fs::FileSystem;

/// One report parameter, as pushed to and returned by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportParameter {
    pub parameter_name: String,
    pub attribute_name: Option<String>,
    pub default_value: Option<String>,
    pub label_override: Option<String>,
    pub sequence: Option<String>,
    pub lookup_name: Option<String>,
    pub required: bool,
    pub hidden: bool,
    pub multi_lookup: bool,
    pub operator: Option<String>,
}

/// Full report definition: design, descriptor attributes, parameters and
/// the optional zipped resource payload
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReportDefinition {
    pub report_name: String,
    pub description: Option<String>,
    pub report_folder: Option<String>,
    pub app_name: Option<String>,
    pub toolbar_location: String,
    pub toolbar_icon: Option<String>,
    pub toolbar_sequence: Option<String>,
    pub no_request_page: bool,
    pub detail: bool,
    pub use_where_with_param: bool,
    pub lang_code: Option<String>,
    pub record_limit: Option<String>,
    pub browser_view: bool,
    pub direct_print: bool,
    pub print_with_attachments: bool,
    pub browser_view_location: String,
    pub direct_print_location: String,
    pub print_with_attachments_location: String,
    pub priority: Option<String>,
    pub schedule_only: bool,
    pub display_order: Option<String>,
    pub param_columns: Option<String>,
    pub design: Option<String>,
    /// base64 zip of the report resource folder
    pub resources: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Vec<ReportParameter>>,
}

/// A `<report>` entry of a `reports.xml` descriptor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportEntry {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub parameters: Vec<(String, Vec<(String, String)>)>,
    /// extracted resource files as (reference, relative filename) pairs
    pub resources: Vec<(String, String)>,
}

impl ReportEntry {
    fn attr(&self, name: &str) -> Option<String> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    }

    fn flag(&self, name: &str) -> bool {
        self.attr(name).as_deref() == Some("1")
    }

    fn attr_or(&self, name: &str, default: &str) -> String {
        self.attr(name).unwrap_or_else(|| default.to_string())
    }
}

/// Parsed `reports.xml` content
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportsDescriptor {
    pub reports: Vec<ReportEntry>,
}

impl ReportsDescriptor {
    /// Parse descriptor XML.
    pub fn parse(xml: &str) -> DeployResult<Self> {
        let mut reader = Reader::from_str(xml);

        let mut descriptor = ReportsDescriptor::default();
        let mut report: Option<ReportEntry> = None;
        let mut in_parameters = false;
        let mut parameter: Option<(String, Vec<(String, String)>)> = None;
        let mut attribute_name: Option<String> = None;
        let mut resource: Option<(String, String)> = None;
        let mut resource_field: Option<&'static str> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => match e.name().as_ref() {
                    b"report" => {
                        let name = name_attribute(&e)?.unwrap_or_default();
                        report = Some(ReportEntry {
                            name,
                            ..ReportEntry::default()
                        });
                    }
                    b"parameters" => in_parameters = true,
                    b"parameter" => {
                        let name = name_attribute(&e)?.unwrap_or_default();
                        parameter = Some((name, Vec::new()));
                    }
                    b"attribute" => {
                        attribute_name = name_attribute(&e)?;
                    }
                    b"resource" => resource = Some((String::new(), String::new())),
                    b"reference" => resource_field = Some("reference"),
                    b"filename" => resource_field = Some("filename"),
                    _ => {}
                },
                Event::Text(t) => {
                    let value = t.unescape()?.trim().to_string();
                    if value.is_empty() {
                        continue;
                    }
                    if let (Some(res), Some(field)) = (resource.as_mut(), resource_field) {
                        match field {
                            "reference" => res.0 = value,
                            _ => res.1 = value,
                        }
                    } else if let Some(name) = attribute_name.clone() {
                        if let Some(param) = parameter.as_mut() {
                            param.1.push((name, value));
                        } else if let Some(rep) = report.as_mut() {
                            rep.attributes.push((name, value));
                        }
                    }
                }
                Event::End(e) => match e.name().as_ref() {
                    b"report" => {
                        if let Some(rep) = report.take() {
                            descriptor.reports.push(rep);
                        }
                    }
                    b"parameters" => in_parameters = false,
                    b"parameter" => {
                        if let (Some(param), Some(rep)) = (parameter.take(), report.as_mut()) {
                            if in_parameters {
                                rep.parameters.push(param);
                            }
                        }
                    }
                    b"attribute" => attribute_name = None,
                    b"resource" => {
                        if let (Some(res), Some(rep)) = (resource.take(), report.as_mut()) {
                            rep.resources.push(res);
                        }
                    }
                    b"reference" | b"filename" => resource_field = None,
                    _ => {}
                },
                Event::Eof => break,
                _ => {}
            }
        }

        Ok(descriptor)
    }

    /// Find the entry describing `file_name`
    pub fn entry(&self, file_name: &str) -> Option<&ReportEntry> {
        self.reports.iter().find(|r| r.name == file_name)
    }

    /// Serialize back to descriptor XML.
    pub fn to_xml(&self) -> DeployResult<String> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 4);
        writer.write_event(Event::Start(BytesStart::new("reports")))?;

        for report in &self.reports {
            let mut start = BytesStart::new("report");
            start.push_attribute(("name", report.name.as_str()));
            writer.write_event(Event::Start(start))?;

            for (name, value) in &report.attributes {
                write_attribute(&mut writer, name, value)?;
            }

            if !report.parameters.is_empty() {
                writer.write_event(Event::Start(BytesStart::new("parameters")))?;
                for (name, attributes) in &report.parameters {
                    let mut start = BytesStart::new("parameter");
                    start.push_attribute(("name", name.as_str()));
                    writer.write_event(Event::Start(start))?;
                    for (attr, value) in attributes {
                        write_attribute(&mut writer, attr, value)?;
                    }
                    writer.write_event(Event::End(BytesEnd::new("parameter")))?;
                }
                writer.write_event(Event::End(BytesEnd::new("parameters")))?;
            }

            if !report.resources.is_empty() {
                writer.write_event(Event::Start(BytesStart::new("resources")))?;
                for (reference, filename) in &report.resources {
                    writer.write_event(Event::Start(BytesStart::new("resource")))?;
                    writer.write_event(Event::Start(BytesStart::new("reference")))?;
                    writer.write_event(Event::Text(BytesText::new(reference)))?;
                    writer.write_event(Event::End(BytesEnd::new("reference")))?;
                    writer.write_event(Event::Start(BytesStart::new("filename")))?;
                    writer.write_event(Event::Text(BytesText::new(filename)))?;
                    writer.write_event(Event::End(BytesEnd::new("filename")))?;
                    writer.write_event(Event::End(BytesEnd::new("resource")))?;
                }
                writer.write_event(Event::End(BytesEnd::new("resources")))?;
            }

            writer.write_event(Event::End(BytesEnd::new("report")))?;
        }

        writer.write_event(Event::End(BytesEnd::new("reports")))?;
        let bytes = writer.into_inner().into_inner();
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

fn name_attribute(e: &BytesStart<'_>) -> DeployResult<Option<String>> {
    let attr = e
        .try_get_attribute("name")
        .map_err(quick_xml::Error::from)?;
    Ok(attr.map(|a| String::from_utf8_lossy(&a.value).into_owned()))
}

fn write_attribute<W: Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> DeployResult<()> {
    let mut start = BytesStart::new("attribute");
    start.push_attribute(("name", name));
    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new("attribute")))?;
    Ok(())
}

/// Assemble the push payload for a `.rptdesign` file.
///
/// The descriptor must exist in the report's directory and contain an
/// entry with at least one attribute for the report; either condition
/// failing is fatal to this artifact only.
pub fn build_payload<FS: FileSystem + ?Sized>(
    report_path: &Path,
    fs: &FS,
) -> DeployResult<ReportDefinition> {
    let design = fs.read_to_string(report_path)?;

    let file_name = report_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let report_name = report_path
        .file_stem()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let folder = report_path.parent().unwrap_or_else(|| Path::new(""));
    let app_name = folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned());

    let descriptor_path = folder.join(REPORTS_FILE);
    if !fs.exists(&descriptor_path) {
        return Err(DeployError::ReportDescriptor {
            path: report_path.to_path_buf(),
            message: "The selected report must have a reports.xml in the same folder that describes the report parameters.".to_string(),
        });
    }

    let descriptor = ReportsDescriptor::parse(&fs.read_to_string(&descriptor_path)?)?;
    let entry = match descriptor.entry(&file_name) {
        Some(entry) if !entry.attributes.is_empty() => entry,
        _ => {
            return Err(DeployError::ReportDescriptor {
                path: report_path.to_path_buf(),
                message: "The selected report does not have an entry that contains at least one attribute value in the reports.xml.".to_string(),
            });
        }
    };

    let resource_folder = folder.join(&report_name);
    let resources = if fs.exists(&resource_folder)
        && !fs.read_dir(&resource_folder)?.is_empty()
    {
        Some(zip_folder(&resource_folder, fs)?)
    } else {
        None
    };

    let parameters = if entry.parameters.is_empty() {
        None
    } else {
        Some(
            entry
                .parameters
                .iter()
                .map(|(name, attrs)| {
                    let attr = |wanted: &str| {
                        attrs
                            .iter()
                            .find(|(n, _)| n == wanted)
                            .map(|(_, v)| v.clone())
                    };
                    let flag = |wanted: &str| attr(wanted).as_deref() == Some("1");
                    ReportParameter {
                        parameter_name: name.clone(),
                        attribute_name: attr("attributename"),
                        default_value: attr("defaultvalue"),
                        label_override: attr("labeloverride"),
                        sequence: attr("sequence"),
                        lookup_name: attr("lookupname"),
                        required: flag("required"),
                        hidden: flag("hidden"),
                        multi_lookup: flag("multilookup"),
                        operator: attr("operator"),
                    }
                })
                .collect(),
        )
    };

    Ok(ReportDefinition {
        report_name: entry.name.clone(),
        description: entry.attr("description"),
        report_folder: entry.attr("reportfolder"),
        app_name,
        toolbar_location: entry.attr_or("toolbarlocation", "NONE"),
        toolbar_icon: entry.attr("toolbaricon"),
        toolbar_sequence: entry.attr("toolbarsequence"),
        no_request_page: entry.flag("norequestpage"),
        detail: entry.flag("detail"),
        use_where_with_param: entry.flag("usewherewithparam"),
        lang_code: entry.attr("langcode"),
        record_limit: entry.attr("recordlimit"),
        browser_view: entry.flag("ql"),
        direct_print: entry.flag("dp"),
        print_with_attachments: entry.flag("pad"),
        browser_view_location: entry.attr_or("qlloc", "NONE"),
        direct_print_location: entry.attr_or("dploc", "NONE"),
        print_with_attachments_location: entry.attr_or("padloc", "NONE"),
        priority: entry.attr("priority"),
        schedule_only: entry.flag("scheduleonly"),
        display_order: entry.attr("displayorder"),
        param_columns: entry.attr("paramcolumns"),
        design: Some(design),
        resources,
        parameters,
    })
}

fn zip_error(e: zip::result::ZipError) -> DeployError {
    DeployError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
}

/// Zip a resource folder into a base64 payload.
///
/// Entry names are relative to the folder root.
pub fn zip_folder<FS: FileSystem + ?Sized>(folder: &Path, fs: &FS) -> DeployResult<String> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    let mut pending = vec![folder.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs.read_dir(&dir)? {
            if entry.is_dir {
                pending.push(entry.path);
                continue;
            }
            let relative = entry
                .path
                .strip_prefix(folder)
                .unwrap_or(&entry.path)
                .to_string_lossy()
                .replace('\\', "/");
            writer.start_file(relative, options).map_err(zip_error)?;
            writer.write_all(&fs.read_bytes(&entry.path)?)?;
        }
    }

    let cursor = writer.finish().map_err(zip_error)?;
    Ok(base64::engine::general_purpose::STANDARD.encode(cursor.into_inner()))
}

/// Unpack a base64 zip payload into `dest`, creating directories as needed.
pub fn unzip_resources<FS: FileSystem + ?Sized>(
    payload: &str,
    dest: &Path,
    fs: &FS,
) -> DeployResult<Vec<PathBuf>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| DeployError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).map_err(zip_error)?;
    let mut written = Vec::new();

    fs.create_dir_all(dest)?;
    for index in 0..archive.len() {
        let mut file = archive.by_index(index).map_err(zip_error)?;
        let target = dest.join(file.name());
        if file.is_dir() {
            fs.create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs.create_dir_all(parent)?;
        }
        let mut content = Vec::new();
        file.read_to_end(&mut content)?;
        fs.write(&target, &content)?;
        written.push(target);
    }

    Ok(written)
}

/// Rebuild the descriptor entry for an extracted report, preserving every
/// other entry in the existing `reports.xml`.
pub fn update_descriptor(
    existing_xml: Option<&str>,
    info: &ReportDefinition,
    resource_files: &[String],
) -> DeployResult<String> {
    let mut descriptor = match existing_xml {
        Some(xml) => ReportsDescriptor::parse(xml)?,
        None => ReportsDescriptor::default(),
    };

    descriptor.reports.retain(|r| r.name != info.report_name);

    let flag = |value: bool| if value { "1" } else { "0" }.to_string();
    let mut attributes = vec![
        ("filename".to_string(), info.report_name.clone()),
        (
            "description".to_string(),
            info.description.clone().unwrap_or_default(),
        ),
        ("dploc".to_string(), info.direct_print_location.clone()),
        ("dp".to_string(), flag(info.direct_print)),
        ("qlloc".to_string(), info.browser_view_location.clone()),
        ("ql".to_string(), flag(info.browser_view)),
        (
            "padloc".to_string(),
            info.print_with_attachments_location.clone(),
        ),
        ("pad".to_string(), flag(info.print_with_attachments)),
    ];
    if let Some(sequence) = &info.toolbar_sequence {
        attributes.push(("toolbarsequence".to_string(), sequence.clone()));
    }
    attributes.push(("norequestpage".to_string(), flag(info.no_request_page)));
    attributes.push(("detail".to_string(), flag(info.detail)));
    if let Some(limit) = &info.record_limit {
        attributes.push(("recordlimit".to_string(), limit.clone()));
    }
    attributes.push((
        "reportfolder".to_string(),
        info.report_folder.clone().unwrap_or_default(),
    ));
    if let Some(priority) = &info.priority {
        attributes.push(("priority".to_string(), priority.clone()));
    }
    attributes.push(("scheduleonly".to_string(), flag(info.schedule_only)));
    attributes.push(("toolbarlocation".to_string(), info.toolbar_location.clone()));
    attributes.push((
        "usewherewithparam".to_string(),
        flag(info.use_where_with_param),
    ));
    if let Some(order) = &info.display_order {
        attributes.push(("displayorder".to_string(), order.clone()));
    }
    if let Some(columns) = &info.param_columns {
        attributes.push(("paramcolumns".to_string(), columns.clone()));
    }

    let optional = |name: &str, value: &Option<String>| {
        value
            .as_ref()
            .map(|value| (name.to_string(), value.clone()))
    };
    let parameters = info
        .parameters
        .iter()
        .flatten()
        .map(|param| {
            let flag = |value: bool| if value { "1" } else { "0" }.to_string();
            let attrs = [
                optional("attributename", &param.attribute_name),
                optional("defaultvalue", &param.default_value),
                optional("labeloverride", &param.label_override),
                optional("lookupname", &param.lookup_name),
                Some(("hidden".to_string(), flag(param.hidden))),
                optional("operator", &param.operator),
                Some(("multilookup".to_string(), flag(param.multi_lookup))),
                Some(("required".to_string(), flag(param.required))),
                optional("sequence", &param.sequence),
            ]
            .into_iter()
            .flatten()
            .collect();
            (param.parameter_name.clone(), attrs)
        })
        .collect::<Vec<_>>();

    // the resources element records where the unpacked files landed so a
    // later deploy can rebuild the payload
    let folder_name = Path::new(&info.report_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| info.report_name.clone());
    let resources = resource_files
        .iter()
        .map(|file| (file.clone(), format!("./{folder_name}/{file}")))
        .collect();

    descriptor.reports.push(ReportEntry {
        name: info.report_name.clone(),
        attributes,
        parameters,
        resources,
    });

    descriptor.to_xml()
}
