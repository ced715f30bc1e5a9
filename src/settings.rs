//! Settings loading, validation and credential encryption
//!
//! Configuration follows a fixed precedence: a CLI argument overrides the
//! settings-file value, which overrides the built-in default. All
//! optionality is resolved here, before any other module runs — the
//! deployment engine only ever sees a fully resolved `Settings`.
//!
//! Credentials in the settings file may be stored encrypted (AES-256-CBC,
//! hex encoded, marked with an `{encrypted}` prefix). The key file holds
//! the hex IV followed by the hex key and lives next to the settings file
//! unless the `key` setting points elsewhere.

use std::path::{Path, PathBuf};

use rand::RngCore;
use serde::Deserialize;

use crate::error::{DeployError, DeployResult};

/// Settings path used when the operator does not pass `--settings`
pub const DEFAULT_SETTINGS_PATH: &str = "./settings.json";

/// Marker prefix for encrypted settings values
const ENCRYPTED_PREFIX: &str = "{encrypted}";

/// Key file name used when the `key` setting is absent
const DEFAULT_KEY_FILE: &str = ".settings.json.key";

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Raw settings-file shape; every field optional with built-in defaults
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct FileSettings {
    allow_untrusted_certs: bool,
    apikey: Option<String>,
    ca: Option<PathBuf>,
    context: String,
    maxauth: bool,
    host: Option<String>,
    password: Option<String>,
    port: Option<u16>,
    ssl: bool,
    key: Option<PathBuf>,
    timeout: u64,
    username: Option<String>,
    install: bool,
    deploy: DeployFileSettings,
    log: LogFileSettings,
    extract: ExtractFileSettings,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            allow_untrusted_certs: false,
            apikey: None,
            ca: None,
            context: "maximo".to_string(),
            maxauth: false,
            host: None,
            password: None,
            port: None,
            ssl: true,
            key: None,
            timeout: 30,
            username: None,
            install: true,
            deploy: DeployFileSettings::default(),
            log: LogFileSettings::default(),
            extract: ExtractFileSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DeployFileSettings {
    allow_admin_mode: bool,
    file: Option<PathBuf>,
    recursive: bool,
    directory: PathBuf,
    delete_all: bool,
    delete_list: PathBuf,
}

impl Default for DeployFileSettings {
    fn default() -> Self {
        Self {
            allow_admin_mode: false,
            file: None,
            recursive: true,
            directory: PathBuf::from("./"),
            delete_all: false,
            delete_list: PathBuf::from("delete.json"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct LogFileSettings {
    timeout: u64,
}

impl Default for LogFileSettings {
    fn default() -> Self {
        Self { timeout: 30 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct ExtractFileSettings {
    directory: PathBuf,
    overwrite: bool,
    #[serde(rename = "type")]
    kind: String,
}

impl Default for ExtractFileSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("./"),
            overwrite: true,
            kind: "script".to_string(),
        }
    }
}

/// CLI-sourced values; `Some` always wins over the settings file
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub allow_untrusted_certs: Option<bool>,
    pub apikey: Option<String>,
    pub ca: Option<PathBuf>,
    pub context: Option<String>,
    pub maxauth: Option<bool>,
    pub host: Option<String>,
    pub password: Option<String>,
    pub port: Option<u16>,
    pub ssl: Option<bool>,
    pub key: Option<PathBuf>,
    pub timeout: Option<u64>,
    pub username: Option<String>,
    pub install: Option<bool>,

    pub allow_admin_mode: Option<bool>,
    pub file: Option<PathBuf>,
    pub recursive: Option<bool>,
    pub directory: Option<PathBuf>,
    pub delete_all: Option<bool>,
    pub delete_list: Option<PathBuf>,

    pub log_timeout: Option<u64>,

    pub extract_directory: Option<PathBuf>,
    pub overwrite: Option<bool>,
    pub extract_type: Option<String>,
}

/// Resolved deploy-command settings
#[derive(Debug, Clone)]
pub struct DeploySettings {
    pub allow_admin_mode: bool,
    pub file: Option<PathBuf>,
    pub recursive: bool,
    pub directory: PathBuf,
    pub delete_all: bool,
    pub delete_list: PathBuf,
}

/// Resolved extract-command settings
#[derive(Debug, Clone)]
pub struct ExtractSettings {
    pub directory: PathBuf,
    pub overwrite: bool,
    pub kind: String,
}

/// Fully resolved settings: defaults, file, then CLI, in that order
#[derive(Debug, Clone)]
pub struct Settings {
    /// Set when the settings came from a file; encrypted credentials can
    /// only be resolved in that case
    pub settings_file: Option<PathBuf>,
    pub allow_untrusted_certs: bool,
    pub apikey: Option<String>,
    pub ca: Option<PathBuf>,
    pub context: String,
    pub maxauth: bool,
    pub host: Option<String>,
    pub password: Option<String>,
    pub port: u16,
    pub ssl: bool,
    pub key: Option<PathBuf>,
    pub timeout: u64,
    pub username: Option<String>,
    pub install: bool,
    pub deploy: DeploySettings,
    pub log_timeout: u64,
    pub extract: ExtractSettings,
}

impl Settings {
    /// Load and merge settings.
    ///
    /// A missing file at the default path falls back to built-in
    /// defaults; a missing file at an explicitly configured path is a
    /// fatal error.
    pub fn load(path: &Path, overrides: &Overrides) -> DeployResult<Self> {
        let mut file = FileSettings::default();
        let mut settings_file = None;

        if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            file = serde_json::from_str(&raw).map_err(|_| DeployError::Settings {
                message: format!(
                    "The settings file {} exists, but is not a valid JSON format.",
                    path.display()
                ),
            })?;
            settings_file = Some(path.to_path_buf());
        } else if path != Path::new(DEFAULT_SETTINGS_PATH) {
            return Err(DeployError::Settings {
                message: format!("The settings file {} cannot be read.", path.display()),
            });
        }

        let ssl = overrides.ssl.unwrap_or(file.ssl);
        let port = overrides
            .port
            .or(file.port)
            .unwrap_or(if ssl { 443 } else { 80 });

        Ok(Self {
            settings_file,
            allow_untrusted_certs: overrides
                .allow_untrusted_certs
                .unwrap_or(file.allow_untrusted_certs),
            apikey: overrides.apikey.clone().or(file.apikey),
            ca: overrides.ca.clone().or(file.ca),
            context: overrides.context.clone().unwrap_or(file.context),
            maxauth: overrides.maxauth.unwrap_or(file.maxauth),
            host: overrides.host.clone().or(file.host),
            password: overrides.password.clone().or(file.password),
            port,
            ssl,
            key: overrides.key.clone().or(file.key),
            timeout: overrides.timeout.unwrap_or(file.timeout),
            username: overrides.username.clone().or(file.username),
            install: overrides.install.unwrap_or(file.install),
            deploy: DeploySettings {
                allow_admin_mode: overrides
                    .allow_admin_mode
                    .unwrap_or(file.deploy.allow_admin_mode),
                file: overrides.file.clone().or(file.deploy.file),
                recursive: overrides.recursive.unwrap_or(file.deploy.recursive),
                directory: overrides
                    .directory
                    .clone()
                    .unwrap_or(file.deploy.directory),
                delete_all: overrides.delete_all.unwrap_or(file.deploy.delete_all),
                delete_list: overrides
                    .delete_list
                    .clone()
                    .unwrap_or(file.deploy.delete_list),
            },
            log_timeout: overrides.log_timeout.unwrap_or(file.log.timeout),
            extract: ExtractSettings {
                directory: overrides
                    .extract_directory
                    .clone()
                    .unwrap_or(file.extract.directory),
                overwrite: overrides.overwrite.unwrap_or(file.extract.overwrite),
                kind: overrides.extract_type.clone().unwrap_or(file.extract.kind),
            },
        })
    }

    /// Checks shared by every command that talks to the server. Raised
    /// before any remote call.
    pub fn validate_common(&self) -> DeployResult<()> {
        let host = match &self.host {
            Some(host) if !host.is_empty() => host,
            _ => {
                return Err(DeployError::Settings {
                    message: "A host name or IP address is required.".to_string(),
                });
            }
        };
        if url::Host::parse(host).is_err() {
            return Err(DeployError::Settings {
                message: format!("{host} is not a valid host name or IP address."),
            });
        }

        let has_apikey = self.apikey.as_deref().is_some_and(|k| !k.is_empty());
        let has_credentials = self.username.as_deref().is_some_and(|u| !u.is_empty())
            && self.password.as_deref().is_some_and(|p| !p.is_empty());
        if !has_apikey && !has_credentials {
            return Err(DeployError::Settings {
                message: "An apikey or username and password are required to connect to Maximo."
                    .to_string(),
            });
        }

        if self.port == 0 {
            return Err(DeployError::Settings {
                message: format!(
                    "The port number {} must be a positive integer between 1 and 65535.",
                    self.port
                ),
            });
        }

        if let Some(ca) = &self.ca {
            if !ca.exists() {
                return Err(DeployError::Settings {
                    message: format!("The CA file {} cannot be read.", ca.display()),
                });
            }
        }

        if self.timeout < 1 || self.timeout > 300 {
            return Err(DeployError::Settings {
                message: format!(
                    "The connection timeout is {}, it must be a positive integer between 1 and 300.",
                    self.timeout
                ),
            });
        }

        Ok(())
    }

    pub fn validate_deploy(&mut self) -> DeployResult<()> {
        self.decrypt_credentials()?;
        self.validate_common()?;

        if let Some(file) = &self.deploy.file {
            let resolved = if file.is_absolute() {
                file.clone()
            } else {
                self.deploy.directory.join(file)
            };
            if !resolved.exists() {
                return Err(DeployError::Settings {
                    message: format!(
                        "The provided script file {} does not exist.",
                        resolved.display()
                    ),
                });
            }
            let name = resolved.to_string_lossy();
            let deployable = [".js", ".py", ".xml", ".json", ".rptdesign"]
                .iter()
                .any(|ext| name.ends_with(ext));
            if !deployable {
                return Err(DeployError::Settings {
                    message: format!(
                        "Only .js, json, .py, .rptdesign or xml files can be deployed. The file {} does not meet this requirement.",
                        resolved.display()
                    ),
                });
            }
        } else if !self.deploy.directory.exists() {
            return Err(DeployError::Settings {
                message: format!(
                    "The script deploy directory {} does not exist.",
                    self.deploy.directory.display()
                ),
            });
        }

        Ok(())
    }

    pub fn validate_extract(&mut self) -> DeployResult<()> {
        self.decrypt_credentials()?;
        self.validate_common()?;

        if !self.extract.directory.exists() {
            return Err(DeployError::Settings {
                message: format!(
                    "The script extract directory {} does not exist.",
                    self.extract.directory.display()
                ),
            });
        }
        Ok(())
    }

    pub fn validate_log(&mut self) -> DeployResult<()> {
        self.decrypt_credentials()?;
        self.validate_common()?;

        if self.log_timeout < 30 || self.log_timeout > 300 {
            return Err(DeployError::Settings {
                message: format!(
                    "The logging timeout is {}, it must be a positive integer between 30 and 300.",
                    self.log_timeout
                ),
            });
        }
        Ok(())
    }

    /// Resolve `{encrypted}` credential values in place.
    ///
    /// Only values that came from a settings file can be encrypted;
    /// CLI-sourced credentials pass through untouched.
    pub fn decrypt_credentials(&mut self) -> DeployResult<()> {
        if self.settings_file.is_none() {
            return Ok(());
        }
        let password_encrypted = is_encrypted(self.password.as_deref());
        let apikey_encrypted = is_encrypted(self.apikey.as_deref());
        if !password_encrypted && !apikey_encrypted {
            return Ok(());
        }

        let key_file = self.key_file_path();
        if !key_file.exists() {
            return Err(DeployError::Crypto {
                message: format!(
                    "The apikey or password cannot be decrypted because the key file {} cannot be read.",
                    key_file.display()
                ),
            });
        }
        let (key, iv) = parse_key_file(&std::fs::read_to_string(&key_file)?)?;

        if password_encrypted {
            if let Some(password) = self.password.take() {
                self.password = Some(decrypt_value(&password, &key, &iv)?);
            }
        }
        if apikey_encrypted {
            if let Some(apikey) = self.apikey.take() {
                self.apikey = Some(decrypt_value(&apikey, &key, &iv)?);
            }
        }
        Ok(())
    }

    /// Location of the encryption key file.
    ///
    /// Relative paths resolve against the settings file's directory; a
    /// leading `~/` resolves against the home directory.
    pub fn key_file_path(&self) -> PathBuf {
        let settings_dir = self
            .settings_file
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        match &self.key {
            Some(key) if key.is_absolute() => key.clone(),
            Some(key) => {
                let text = key.to_string_lossy();
                if let Some(rest) = text.strip_prefix("~/") {
                    if let Some(home) = dirs::home_dir() {
                        return home.join(rest);
                    }
                }
                settings_dir.join(key)
            }
            None => settings_dir.join(DEFAULT_KEY_FILE),
        }
    }
}

fn is_encrypted(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.starts_with(ENCRYPTED_PREFIX))
}

/// Encrypt the password and apikey in a settings file in place.
///
/// Generates the key file on first use. Re-encrypting already-encrypted
/// values is refused with a pointer at how to reset them.
pub fn encrypt_settings(settings_path: &Path, key_override: Option<&Path>) -> DeployResult<()> {
    if !settings_path.exists() {
        return Err(DeployError::Settings {
            message: "The settings file must be provided to encrypt the password.".to_string(),
        });
    }

    let raw = std::fs::read_to_string(settings_path)?;
    let mut settings: serde_json::Value =
        serde_json::from_str(&raw).map_err(|_| DeployError::Settings {
            message: format!(
                "The settings file {} exists, but is not a valid JSON format.",
                settings_path.display()
            ),
        })?;

    let password = settings
        .get("password")
        .and_then(|v| v.as_str())
        .filter(|p| !p.is_empty())
        .map(str::to_string);
    let apikey = settings
        .get("apikey")
        .and_then(|v| v.as_str())
        .filter(|a| !a.is_empty())
        .map(str::to_string);

    let password_plain = password.as_deref().is_some_and(|p| !p.starts_with(ENCRYPTED_PREFIX));
    let apikey_plain = apikey.as_deref().is_some_and(|a| !a.starts_with(ENCRYPTED_PREFIX));
    let password_encrypted = is_encrypted(password.as_deref());
    let apikey_encrypted = is_encrypted(apikey.as_deref());

    if password.is_none() && apikey.is_none() {
        return Err(DeployError::Settings {
            message: format!(
                "Neither an apikey or password is specified in the settings file {}. There is no value to encrypt.",
                settings_path.display()
            ),
        });
    }
    if password_encrypted && apikey_encrypted {
        return Err(DeployError::Settings {
            message: format!(
                "The apikey and password in {} are already encrypted, to re-encrypt the apikey or password reset the apikey or password to plain text and try again.",
                settings_path.display()
            ),
        });
    }
    if password_encrypted && !apikey_plain {
        return Err(DeployError::Settings {
            message: format!(
                "The password in {} is already encrypted and no apikey is present to encrypt, to re-encrypt the password reset the password to plain text and try again.",
                settings_path.display()
            ),
        });
    }
    if apikey_encrypted && !password_plain {
        return Err(DeployError::Settings {
            message: format!(
                "The apikey in {} is already encrypted and no password is present to encrypt, to re-encrypt the apikey reset the apikey to plain text and try again.",
                settings_path.display()
            ),
        });
    }

    let settings_dir = settings_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let key_file = match key_override {
        Some(key) if key.is_absolute() => key.to_path_buf(),
        Some(key) => settings_dir.join(key),
        None => settings_dir.join(DEFAULT_KEY_FILE),
    };

    if !key_file.exists() {
        let mut iv = [0u8; 16];
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut iv);
        rand::thread_rng().fill_bytes(&mut key);
        std::fs::write(&key_file, format!("{}{}", hex::encode(iv), hex::encode(key)))?;
    }

    let (key, iv) = parse_key_file(&std::fs::read_to_string(&key_file)?)?;

    if password_plain {
        if let Some(password) = &password {
            settings["password"] = serde_json::Value::String(encrypt_value(password, &key, &iv)?);
        }
    }
    if apikey_plain {
        if let Some(apikey) = &apikey {
            settings["apikey"] = serde_json::Value::String(encrypt_value(apikey, &key, &iv)?);
        }
    }

    std::fs::write(settings_path, serde_json::to_string_pretty(&settings)?)?;
    Ok(())
}

/// Key file layout: 32 hex chars of IV followed by 64 hex chars of key
fn parse_key_file(data: &str) -> DeployResult<(Vec<u8>, Vec<u8>)> {
    let data = data.trim();
    if data.len() < 96 {
        return Err(DeployError::Crypto {
            message: "The encryption key file is malformed.".to_string(),
        });
    }
    let iv = hex::decode(&data[..32]).map_err(|_| DeployError::Crypto {
        message: "The encryption key file is malformed.".to_string(),
    })?;
    let key = hex::decode(&data[32..96]).map_err(|_| DeployError::Crypto {
        message: "The encryption key file is malformed.".to_string(),
    })?;
    Ok((key, iv))
}

fn encrypt_value(plain: &str, key: &[u8], iv: &[u8]) -> DeployResult<String> {
    use cbc::cipher::{block_padding::Pkcs7, BlockEncryptMut, KeyIvInit};
    let encryptor = Aes256CbcEnc::new_from_slices(key, iv).map_err(|_| DeployError::Crypto {
        message: "The encryption key file is malformed.".to_string(),
    })?;
    let ciphertext = encryptor.encrypt_padded_vec_mut::<Pkcs7>(plain.as_bytes());
    Ok(format!("{ENCRYPTED_PREFIX}{}", hex::encode(ciphertext)))
}

fn decrypt_value(value: &str, key: &[u8], iv: &[u8]) -> DeployResult<String> {
    use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
    let encoded = value.strip_prefix(ENCRYPTED_PREFIX).unwrap_or(value);
    let ciphertext = hex::decode(encoded).map_err(|_| DeployError::Crypto {
        message: "The encrypted value is not valid hex.".to_string(),
    })?;
    let decryptor = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| DeployError::Crypto {
        message: "The encryption key file is malformed.".to_string(),
    })?;
    let plain = decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| DeployError::Crypto {
            message: "The value could not be decrypted with the configured key.".to_string(),
        })?;
    String::from_utf8(plain).map_err(|_| DeployError::Crypto {
        message: "The decrypted value is not valid UTF-8.".to_string(),
    })
}
