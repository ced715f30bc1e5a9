//! Remote access layer
//!
//! `MaximoClient` is the set of verbs the deployment engine needs from the
//! server; `HttpMaximoClient` is the real REST/OSLC implementation on a
//! blocking `reqwest` client. One request is in flight at a time — the
//! engine is deliberately sequential so admin-mode transitions and schema
//! changes never interleave.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use serde::Deserialize;

use crate::error::{DeployError, DeployResult};
use crate::models::PushOutcome;
use crate::report::ReportDefinition;

/// Server-side deployment utility script, pushed on demand
const DEPLOY_SCRIPT: &str = "sharptree.autoscript.deploy";

/// Minimum server-side utility version this tool can talk to
const MIN_DEPLOY_VERSION: u32 = 15;

/// A script fetched for extraction
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptInfo {
    pub script: String,
    #[serde(rename = "scriptLanguage")]
    pub script_language: String,
}

/// A screen fetched for extraction
#[derive(Debug, Clone, Deserialize)]
pub struct ScreenInfo {
    pub presentation: String,
}

/// Inspection form inventory entry
#[derive(Debug, Clone, Deserialize)]
pub struct FormSummary {
    pub id: String,
    pub name: String,
}

/// Report inventory entry
#[derive(Debug, Clone, Deserialize)]
pub struct ReportSummary {
    pub report: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "reportId")]
    pub report_id: String,
}

/// The verbs the deployment, extraction and log commands need from the
/// remote system.
///
/// `delete_script_if_exists` is idempotent: deleting a name that does not
/// exist remotely is a no-op, not an error.
pub trait MaximoClient {
    fn connect(&self) -> DeployResult<()>;
    fn disconnect(&self) -> DeployResult<()>;

    fn post_script(
        &self,
        content: &str,
        path: &Path,
        deploy_override: Option<&str>,
    ) -> DeployResult<PushOutcome>;
    fn post_screen(&self, xml: &str) -> DeployResult<PushOutcome>;
    fn post_form(&self, form: &serde_json::Value) -> DeployResult<PushOutcome>;
    fn post_report(&self, report: &ReportDefinition) -> DeployResult<PushOutcome>;
    fn post_config(&self, config: &str) -> DeployResult<()>;

    fn db_config_required(&self) -> DeployResult<bool>;
    fn db_config_requires_admin_mode(&self) -> DeployResult<bool>;
    fn set_admin_mode_on(&self) -> DeployResult<()>;
    fn set_admin_mode_off(&self) -> DeployResult<()>;
    fn is_admin_mode_on(&self) -> DeployResult<bool>;
    fn apply_db_config(&self) -> DeployResult<()>;
    fn db_config_in_progress(&self) -> DeployResult<bool>;
    fn db_config_messages(&self) -> DeployResult<String>;

    fn get_all_script_names(&self) -> DeployResult<Vec<String>>;
    fn delete_script_if_exists(&self, name: &str) -> DeployResult<()>;
    fn get_script(&self, name: &str) -> DeployResult<ScriptInfo>;

    fn get_all_screen_names(&self) -> DeployResult<Vec<String>>;
    fn get_screen(&self, name: &str) -> DeployResult<ScreenInfo>;

    fn get_all_forms(&self) -> DeployResult<Vec<FormSummary>>;
    fn get_form(&self, id: &str) -> DeployResult<serde_json::Value>;

    fn get_all_reports(&self) -> DeployResult<Vec<ReportSummary>>;
    fn get_report(&self, id: &str) -> DeployResult<ReportDefinition>;

    /// Fetch the next chunk of the server log; empty when nothing new
    fn fetch_log(&self) -> DeployResult<String>;
}

/// Connection parameters for the HTTP client, resolved from settings
/// before any remote call.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub context: String,
    pub ssl: bool,
    pub apikey: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub maxauth: bool,
    pub allow_untrusted_certs: bool,
    pub ca: Option<Vec<u8>>,
    pub timeout: Duration,
    pub install: bool,
}

impl ClientConfig {
    pub fn base_url(&self) -> String {
        let scheme = if self.ssl { "https" } else { "http" };
        format!("{scheme}://{}:{}/{}", self.host, self.port, self.context)
    }
}

/// REST/OSLC implementation of `MaximoClient`
pub struct HttpMaximoClient {
    config: ClientConfig,
    http: reqwest::blocking::Client,
}

impl HttpMaximoClient {
    pub fn new(config: ClientConfig) -> DeployResult<Self> {
        let mut builder = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .cookie_store(true);

        if config.allow_untrusted_certs {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(ca) = &config.ca {
            let certificate = reqwest::Certificate::from_pem(ca)?;
            builder = builder.add_root_certificate(certificate);
        }

        let http = builder.build()?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.config.base_url())
    }

    fn request(
        &self,
        method: reqwest::Method,
        path: &str,
    ) -> reqwest::blocking::RequestBuilder {
        let mut request = self.http.request(method, self.url(path));
        if let Some(apikey) = &self.config.apikey {
            request = request.header("apikey", apikey);
        } else if self.config.maxauth {
            let credentials = format!(
                "{}:{}",
                self.config.username.as_deref().unwrap_or_default(),
                self.config.password.as_deref().unwrap_or_default()
            );
            let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
            request = request.header("maxauth", encoded);
        } else {
            request = request.basic_auth(
                self.config.username.as_deref().unwrap_or_default(),
                self.config.password.as_deref(),
            );
        }
        request
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder) -> DeployResult<reqwest::blocking::Response> {
        let response = request.send().map_err(|e| self.connect_error(e))?;
        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DeployError::Connect {
                message: "User name and password combination are not valid. Try again.".to_string(),
            });
        }
        Ok(response)
    }

    fn connect_error(&self, error: reqwest::Error) -> DeployError {
        if error.is_connect() {
            DeployError::Connect {
                message: format!(
                    "Connection refused to host {} on port {}",
                    self.config.host, self.config.port
                ),
            }
        } else if error.is_timeout() {
            DeployError::Connect {
                message: format!(
                    "Connection to host {} timed out after {} seconds",
                    self.config.host,
                    self.config.timeout.as_secs()
                ),
            }
        } else {
            DeployError::Http(error)
        }
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> DeployResult<T> {
        let response = self.send(self.request(reqwest::Method::GET, path))?;
        let response = response.error_for_status()?;
        Ok(response.json()?)
    }

    fn get_bool(&self, path: &str) -> DeployResult<bool> {
        let value: serde_json::Value = self.get_json(path)?;
        Ok(value.as_bool().unwrap_or(false))
    }

    fn post_outcome(&self, request: reqwest::blocking::RequestBuilder) -> DeployResult<PushOutcome> {
        let response = self.send(request)?.error_for_status()?;
        Ok(response.json()?)
    }

    fn post_empty(&self, path: &str) -> DeployResult<()> {
        let response = self.send(self.request(reqwest::Method::POST, path))?;
        response.error_for_status()?;
        Ok(())
    }

    /// Check the server-side utility scripts and install or upgrade them
    /// when the settings allow it.
    fn ensure_tooling(&self) -> DeployResult<()> {
        let version = self.deploy_script_version()?;

        match version {
            None if self.config.install => self.install_or_upgrade()?,
            None => {
                return Err(DeployError::Connect {
                    message: format!(
                        "The server {} does not have the required scripts installed and automatic install is turned off.",
                        self.config.host
                    ),
                });
            }
            Some(version) if version < MIN_DEPLOY_VERSION => {
                if self.config.install {
                    self.install_or_upgrade()?;
                } else {
                    return Err(DeployError::Connect {
                        message: format!(
                            "The server {} has the required scripts but they are out of date and automatic install is turned off.",
                            self.config.host
                        ),
                    });
                }
            }
            Some(_) => {}
        }

        Ok(())
    }

    fn deploy_script_version(&self) -> DeployResult<Option<u32>> {
        let path = format!("api/script/{DEPLOY_SCRIPT}/version");
        let response = self.send(self.request(reqwest::Method::GET, &path))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let value: serde_json::Value = response.error_for_status()?.json()?;
        Ok(value.get("version").and_then(|v| v.as_u64()).map(|v| v as u32))
    }

    fn install_or_upgrade(&self) -> DeployResult<()> {
        let path = format!("api/script/{DEPLOY_SCRIPT}/install");
        let outcome = self.post_outcome(self.request(reqwest::Method::POST, &path))?;
        if outcome.is_error() {
            return Err(DeployError::Connect {
                message: outcome.error_message(),
            });
        }
        Ok(())
    }
}

impl MaximoClient for HttpMaximoClient {
    fn connect(&self) -> DeployResult<()> {
        let response = self.send(self.request(reqwest::Method::GET, "oslc/whoami"))?;
        response.error_for_status()?;
        self.ensure_tooling()
    }

    fn disconnect(&self) -> DeployResult<()> {
        // session cookies are dropped with the client; nothing to tell the
        // server
        Ok(())
    }

    fn post_script(
        &self,
        content: &str,
        path: &Path,
        deploy_override: Option<&str>,
    ) -> DeployResult<PushOutcome> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let body = serde_json::json!({
            "script": content,
            "fileName": file_name,
            "deploy": deploy_override,
        });
        let request = self
            .request(reqwest::Method::POST, &format!("api/script/{DEPLOY_SCRIPT}"))
            .json(&body);
        self.post_outcome(request)
    }

    fn post_screen(&self, xml: &str) -> DeployResult<PushOutcome> {
        let request = self
            .request(
                reqwest::Method::POST,
                &format!("api/script/{DEPLOY_SCRIPT}/screen"),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(xml.to_string());
        self.post_outcome(request)
    }

    fn post_form(&self, form: &serde_json::Value) -> DeployResult<PushOutcome> {
        let request = self
            .request(
                reqwest::Method::POST,
                &format!("api/script/{DEPLOY_SCRIPT}/form"),
            )
            .json(form);
        self.post_outcome(request)
    }

    fn post_report(&self, report: &ReportDefinition) -> DeployResult<PushOutcome> {
        let request = self
            .request(
                reqwest::Method::POST,
                &format!("api/script/{DEPLOY_SCRIPT}/report"),
            )
            .json(report);
        self.post_outcome(request)
    }

    fn post_config(&self, config: &str) -> DeployResult<()> {
        let request = self
            .request(
                reqwest::Method::POST,
                &format!("api/script/{DEPLOY_SCRIPT}/config"),
            )
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(config.to_string());
        let response = self.send(request)?;
        if !response.status().is_success() {
            return Err(DeployError::DbConfig {
                message: format!(
                    "The server rejected the configuration: HTTP {}",
                    response.status()
                ),
            });
        }
        Ok(())
    }

    fn db_config_required(&self) -> DeployResult<bool> {
        self.get_bool(&format!("api/script/{DEPLOY_SCRIPT}/dbconfig/required"))
    }

    fn db_config_requires_admin_mode(&self) -> DeployResult<bool> {
        self.get_bool(&format!("api/script/{DEPLOY_SCRIPT}/dbconfig/adminmoderequired"))
    }

    fn set_admin_mode_on(&self) -> DeployResult<()> {
        self.post_empty(&format!("api/script/{DEPLOY_SCRIPT}/adminmode/on"))
    }

    fn set_admin_mode_off(&self) -> DeployResult<()> {
        self.post_empty(&format!("api/script/{DEPLOY_SCRIPT}/adminmode/off"))
    }

    fn is_admin_mode_on(&self) -> DeployResult<bool> {
        self.get_bool(&format!("api/script/{DEPLOY_SCRIPT}/adminmode"))
    }

    fn apply_db_config(&self) -> DeployResult<()> {
        self.post_empty(&format!("api/script/{DEPLOY_SCRIPT}/dbconfig/apply"))
    }

    fn db_config_in_progress(&self) -> DeployResult<bool> {
        self.get_bool(&format!("api/script/{DEPLOY_SCRIPT}/dbconfig/inprogress"))
    }

    fn db_config_messages(&self) -> DeployResult<String> {
        let response = self.send(self.request(
            reqwest::Method::GET,
            &format!("api/script/{DEPLOY_SCRIPT}/dbconfig/messages"),
        ))?;
        Ok(response.error_for_status()?.text()?)
    }

    fn get_all_script_names(&self) -> DeployResult<Vec<String>> {
        self.get_json(&format!("api/script/{DEPLOY_SCRIPT}/scripts"))
    }

    fn delete_script_if_exists(&self, name: &str) -> DeployResult<()> {
        let path = format!("api/script/{DEPLOY_SCRIPT}/script/{name}");
        let response = self.send(self.request(reqwest::Method::DELETE, &path))?;
        // absent names are a no-op by contract
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(());
        }
        response.error_for_status()?;
        Ok(())
    }

    fn get_script(&self, name: &str) -> DeployResult<ScriptInfo> {
        self.get_json(&format!("api/script/{DEPLOY_SCRIPT}/script/{name}"))
    }

    fn get_all_screen_names(&self) -> DeployResult<Vec<String>> {
        self.get_json(&format!("api/script/{DEPLOY_SCRIPT}/screens"))
    }

    fn get_screen(&self, name: &str) -> DeployResult<ScreenInfo> {
        self.get_json(&format!("api/script/{DEPLOY_SCRIPT}/screen/{name}"))
    }

    fn get_all_forms(&self) -> DeployResult<Vec<FormSummary>> {
        self.get_json(&format!("api/script/{DEPLOY_SCRIPT}/forms"))
    }

    fn get_form(&self, id: &str) -> DeployResult<serde_json::Value> {
        self.get_json(&format!("api/script/{DEPLOY_SCRIPT}/form/{id}"))
    }

    fn get_all_reports(&self) -> DeployResult<Vec<ReportSummary>> {
        self.get_json(&format!("api/script/{DEPLOY_SCRIPT}/reports"))
    }

    fn get_report(&self, id: &str) -> DeployResult<ReportDefinition> {
        self.get_json(&format!("api/script/{DEPLOY_SCRIPT}/report/{id}"))
    }

    fn fetch_log(&self) -> DeployResult<String> {
        let response = self.send(self.request(
            reqwest::Method::GET,
            &format!("api/script/{DEPLOY_SCRIPT}/log"),
        ))?;
        Ok(response.error_for_status()?.text()?)
    }
}

/// Scriptable in-memory client for unit tests.
///
/// Poll responses are consumed front to back; an exhausted queue keeps
/// returning the terminal value so loops settle instead of panicking.
#[cfg(test)]
pub struct MockClient {
    pub calls: std::cell::RefCell<Vec<String>>,
    pub db_config_required: std::cell::Cell<bool>,
    pub requires_admin_mode: std::cell::Cell<bool>,
    pub admin_on_polls: std::cell::RefCell<std::collections::VecDeque<bool>>,
    pub in_progress_polls: std::cell::RefCell<std::collections::VecDeque<bool>>,
    pub message_polls: std::cell::RefCell<std::collections::VecDeque<String>>,
    pub script_outcomes: std::cell::RefCell<std::collections::HashMap<String, PushOutcome>>,
    pub remote_scripts: std::cell::RefCell<Vec<String>>,
    pub posted_configs: std::cell::RefCell<Vec<String>>,
    pub deleted: std::cell::RefCell<Vec<String>>,
    pub script_infos: std::cell::RefCell<std::collections::HashMap<String, ScriptInfo>>,
    pub remote_screens: std::cell::RefCell<Vec<String>>,
    pub remote_forms: std::cell::RefCell<Vec<FormSummary>>,
    pub form_values: std::cell::RefCell<std::collections::HashMap<String, serde_json::Value>>,
    pub remote_reports: std::cell::RefCell<Vec<ReportSummary>>,
    pub report_infos: std::cell::RefCell<std::collections::HashMap<String, ReportDefinition>>,
    pub log_chunks: std::cell::RefCell<std::collections::VecDeque<String>>,
}

#[cfg(test)]
impl MockClient {
    pub fn new() -> Self {
        Self {
            calls: Default::default(),
            db_config_required: std::cell::Cell::new(false),
            requires_admin_mode: std::cell::Cell::new(false),
            admin_on_polls: Default::default(),
            in_progress_polls: Default::default(),
            message_polls: Default::default(),
            script_outcomes: Default::default(),
            remote_scripts: Default::default(),
            posted_configs: Default::default(),
            deleted: Default::default(),
            script_infos: Default::default(),
            remote_screens: Default::default(),
            remote_forms: Default::default(),
            form_values: Default::default(),
            remote_reports: Default::default(),
            report_infos: Default::default(),
            log_chunks: Default::default(),
        }
    }

    fn record(&self, call: &str) {
        self.calls.borrow_mut().push(call.to_string());
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.borrow().iter().filter(|c| *c == name).count()
    }

    pub fn set_script_outcome(&self, file_name: &str, outcome: PushOutcome) {
        self.script_outcomes
            .borrow_mut()
            .insert(file_name.to_string(), outcome);
    }

    fn pop_bool(queue: &std::cell::RefCell<std::collections::VecDeque<bool>>, default: bool) -> bool {
        let mut queue = queue.borrow_mut();
        if queue.len() > 1 {
            queue.pop_front().unwrap_or(default)
        } else {
            queue.front().copied().unwrap_or(default)
        }
    }
}

#[cfg(test)]
impl MaximoClient for MockClient {
    fn connect(&self) -> DeployResult<()> {
        self.record("connect");
        Ok(())
    }

    fn disconnect(&self) -> DeployResult<()> {
        self.record("disconnect");
        Ok(())
    }

    fn post_script(
        &self,
        _content: &str,
        path: &Path,
        _deploy_override: Option<&str>,
    ) -> DeployResult<PushOutcome> {
        self.record("post_script");
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(outcome) = self.script_outcomes.borrow().get(&file_name) {
            return Ok(outcome.clone());
        }
        let stem = path
            .file_stem()
            .map(|n| n.to_string_lossy().to_uppercase())
            .unwrap_or_default();
        Ok(PushOutcome {
            script_name: Some(stem),
            ..PushOutcome::default()
        })
    }

    fn post_screen(&self, _xml: &str) -> DeployResult<PushOutcome> {
        self.record("post_screen");
        Ok(PushOutcome::default())
    }

    fn post_form(&self, _form: &serde_json::Value) -> DeployResult<PushOutcome> {
        self.record("post_form");
        Ok(PushOutcome::default())
    }

    fn post_report(&self, _report: &ReportDefinition) -> DeployResult<PushOutcome> {
        self.record("post_report");
        Ok(PushOutcome::default())
    }

    fn post_config(&self, config: &str) -> DeployResult<()> {
        self.record("post_config");
        self.posted_configs.borrow_mut().push(config.to_string());
        Ok(())
    }

    fn db_config_required(&self) -> DeployResult<bool> {
        self.record("db_config_required");
        Ok(self.db_config_required.get())
    }

    fn db_config_requires_admin_mode(&self) -> DeployResult<bool> {
        self.record("db_config_requires_admin_mode");
        Ok(self.requires_admin_mode.get())
    }

    fn set_admin_mode_on(&self) -> DeployResult<()> {
        self.record("set_admin_mode_on");
        Ok(())
    }

    fn set_admin_mode_off(&self) -> DeployResult<()> {
        self.record("set_admin_mode_off");
        Ok(())
    }

    fn is_admin_mode_on(&self) -> DeployResult<bool> {
        self.record("is_admin_mode_on");
        Ok(Self::pop_bool(&self.admin_on_polls, false))
    }

    fn apply_db_config(&self) -> DeployResult<()> {
        self.record("apply_db_config");
        Ok(())
    }

    fn db_config_in_progress(&self) -> DeployResult<bool> {
        self.record("db_config_in_progress");
        Ok(Self::pop_bool(&self.in_progress_polls, false))
    }

    fn db_config_messages(&self) -> DeployResult<String> {
        self.record("db_config_messages");
        let mut queue = self.message_polls.borrow_mut();
        Ok(queue.pop_front().unwrap_or_default())
    }

    fn get_all_script_names(&self) -> DeployResult<Vec<String>> {
        self.record("get_all_script_names");
        Ok(self.remote_scripts.borrow().clone())
    }

    fn delete_script_if_exists(&self, name: &str) -> DeployResult<()> {
        self.record("delete_script_if_exists");
        self.deleted.borrow_mut().push(name.to_string());
        Ok(())
    }

    fn get_script(&self, name: &str) -> DeployResult<ScriptInfo> {
        self.record("get_script");
        if let Some(info) = self.script_infos.borrow().get(name) {
            return Ok(info.clone());
        }
        Ok(ScriptInfo {
            script: "print('x')".to_string(),
            script_language: "python".to_string(),
        })
    }

    fn get_all_screen_names(&self) -> DeployResult<Vec<String>> {
        self.record("get_all_screen_names");
        Ok(self.remote_screens.borrow().clone())
    }

    fn get_screen(&self, _name: &str) -> DeployResult<ScreenInfo> {
        self.record("get_screen");
        Ok(ScreenInfo {
            presentation: "<presentation/>".to_string(),
        })
    }

    fn get_all_forms(&self) -> DeployResult<Vec<FormSummary>> {
        self.record("get_all_forms");
        Ok(self.remote_forms.borrow().clone())
    }

    fn get_form(&self, id: &str) -> DeployResult<serde_json::Value> {
        self.record("get_form");
        Ok(self
            .form_values
            .borrow()
            .get(id)
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"name": "Mock Form"})))
    }

    fn get_all_reports(&self) -> DeployResult<Vec<ReportSummary>> {
        self.record("get_all_reports");
        Ok(self.remote_reports.borrow().clone())
    }

    fn get_report(&self, id: &str) -> DeployResult<ReportDefinition> {
        self.record("get_report");
        Ok(self
            .report_infos
            .borrow()
            .get(id)
            .cloned()
            .unwrap_or_default())
    }

    fn fetch_log(&self) -> DeployResult<String> {
        self.record("fetch_log");
        Ok(self
            .log_chunks
            .borrow_mut()
            .pop_front()
            .unwrap_or_default())
    }
}
