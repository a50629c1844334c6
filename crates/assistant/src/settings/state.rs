use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use hsb_llm::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_GEMINI_MODEL, DEFAULT_PROVIDER_ID, ProviderConfig};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};

use crate::persona::{
    DEFAULT_ASSISTANT_NAME, DEFAULT_BOOKING_URL, DEFAULT_CONTACT_EMAIL, DEFAULT_CONTACT_PHONE,
    DEFAULT_FIRM_NAME, DEFAULT_GREETING, Persona,
};

pub const SETTINGS_DIRECTORY_NAME: &str = "hsb-assistant";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "HSB_ASSISTANT_";
/// Bare credential variables, lowest precedence first.
pub const CREDENTIAL_ENV_VARS: [&str; 2] = ["API_KEY", "GEMINI_API_KEY"];
pub const PREFIXED_CREDENTIAL_ENV_VAR: &str = "HSB_ASSISTANT_PROVIDER__API_KEY";
pub const DEFAULT_STREAM_TIMEOUT_SECS: u64 = 60;

const CREDENTIAL_KEY: &str = "provider.api_key";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_provider_id")]
    pub provider_id: String,
    #[serde(default)]
    pub api_key: String,
    /// Empty means the provider's public endpoint.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_model_name")]
    pub model_name: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            provider_id: default_provider_id(),
            api_key: String::new(),
            endpoint: String::new(),
            model_name: default_model_name(),
        }
    }
}

impl ProviderSettings {
    pub fn is_valid(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    fn normalized(mut self) -> Self {
        self.provider_id = non_blank_or(self.provider_id, default_provider_id);
        self.api_key = self.api_key.trim().to_string();
        self.endpoint = self.endpoint.trim().to_string();
        self.model_name = non_blank_or(self.model_name, default_model_name);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonaSettings {
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,
    #[serde(default = "default_firm_name")]
    pub firm_name: String,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_booking_url")]
    pub booking_url: String,
    #[serde(default = "default_contact_phone")]
    pub contact_phone: String,
    #[serde(default = "default_contact_email")]
    pub contact_email: String,
}

impl Default for PersonaSettings {
    fn default() -> Self {
        Self {
            assistant_name: default_assistant_name(),
            firm_name: default_firm_name(),
            greeting: default_greeting(),
            booking_url: default_booking_url(),
            contact_phone: default_contact_phone(),
            contact_email: default_contact_email(),
        }
    }
}

impl PersonaSettings {
    fn normalized(self) -> Self {
        Self {
            assistant_name: non_blank_or(self.assistant_name, default_assistant_name),
            firm_name: non_blank_or(self.firm_name, default_firm_name),
            greeting: non_blank_or(self.greeting, default_greeting),
            booking_url: non_blank_or(self.booking_url, default_booking_url),
            contact_phone: non_blank_or(self.contact_phone, default_contact_phone),
            contact_email: non_blank_or(self.contact_email, default_contact_email),
        }
    }

    pub fn to_persona(&self) -> Persona {
        Persona {
            assistant_name: self.assistant_name.clone(),
            firm_name: self.firm_name.clone(),
            greeting: self.greeting.clone(),
            booking_url: self.booking_url.clone(),
            contact_phone: self.contact_phone.clone(),
            contact_email: self.contact_email.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSettings {
    /// Upper bound on one reply, in seconds. Zero disables the limit.
    #[serde(default = "default_stream_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_stream_timeout_secs(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl StreamSettings {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssistantSettings {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub persona: PersonaSettings,
    #[serde(default)]
    pub stream: StreamSettings,
}

impl AssistantSettings {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".hsb-assistant"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    /// Loads settings once at startup.
    ///
    /// Layers, lowest precedence first: built-in defaults, the JSON file, bare
    /// credential variables, then `HSB_ASSISTANT_*` variables with `__` as the nesting
    /// separator. An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let config_path = match path {
            Some(path) => {
                ensure!(
                    path.exists(),
                    MissingFileSnafu {
                        stage: "locate-settings-file",
                        path: path.to_path_buf(),
                    }
                );
                Some(path.to_path_buf())
            }
            None => {
                let default_path = Self::default_config_path();
                if default_path.exists() {
                    Some(default_path)
                } else {
                    tracing::info!("settings file not found at {:?}, using defaults", default_path);
                    None
                }
            }
        };

        let settings = Self::figment(config_path.as_deref())
            .extract::<Self>()
            .context(ExtractSnafu {
                stage: "extract-settings",
            })?
            .normalized();

        tracing::debug!(
            config_path = ?config_path,
            provider_id = %settings.provider.provider_id,
            model_name = %settings.provider.model_name,
            has_credential = settings.provider.is_valid(),
            "settings loaded"
        );
        Ok(settings)
    }

    fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Json::file(path));
        }

        // A credential variable that is set but blank must not hide a lower layer.
        for variable in CREDENTIAL_ENV_VARS {
            figment = figment.merge(
                Env::raw()
                    .only(&[variable])
                    .filter(move |_| env_is_non_blank(variable))
                    .map(|_| CREDENTIAL_KEY.into()),
            );
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__").filter(|key| {
            !is_prefixed_credential_key(key.as_str())
                || env_is_non_blank(PREFIXED_CREDENTIAL_ENV_VAR)
        }))
    }

    pub fn normalized(self) -> Self {
        Self {
            provider: self.provider.normalized(),
            persona: self.persona.normalized(),
            stream: StreamSettings {
                timeout_secs: self.stream.timeout_secs,
                channel_capacity: self.stream.channel_capacity.max(1),
            },
        }
    }

    pub fn to_persona(&self) -> Persona {
        self.persona.to_persona()
    }

    /// Writes these settings to `path` as pretty JSON with the credential left blank.
    pub fn write_template(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).context(CreateDirSnafu {
                stage: "create-settings-directory",
                path: parent.to_path_buf(),
            })?;
        }

        let mut template = self.clone();
        template.provider.api_key.clear();
        let content = serde_json::to_string_pretty(&template).context(SerializeSnafu {
            stage: "serialize-settings-json",
        })?;

        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, content).context(WriteFileSnafu {
            stage: "write-temporary-settings-file",
            path: temp_path.clone(),
        })?;
        std::fs::rename(&temp_path, path).context(RenameTempFileSnafu {
            stage: "rename-temporary-settings-file",
            from: temp_path,
            to: path.to_path_buf(),
        })?;

        tracing::info!("wrote settings template to {:?}", path);
        Ok(())
    }

    /// Builds the immutable client configuration, including the system instruction
    /// rendered from `persona`.
    pub fn to_provider_config(&self, persona: &Persona) -> ProviderConfig {
        let mut config = ProviderConfig::new(
            &self.provider.provider_id,
            &self.provider.api_key,
            &self.provider.endpoint,
        )
        .with_model(&self.provider.model_name)
        .with_system_instruction(persona.system_instruction())
        .with_channel_capacity(self.stream.channel_capacity);

        if let Some(timeout) = self.stream.timeout() {
            config = config.with_stream_timeout(timeout);
        }
        config
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("settings file {path:?} does not exist on `{stage}`"))]
    MissingFile { stage: &'static str, path: PathBuf },
    #[snafu(display("failed to read settings on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        #[snafu(source(from(figment::Error, Box::new)))]
        source: Box<figment::Error>,
    },
    #[snafu(display("failed to create settings directory at {path:?} on `{stage}`: {source}"))]
    CreateDir {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to serialize settings on `{stage}`: {source}"))]
    Serialize {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to write settings file at {path:?} on `{stage}`: {source}"))]
    WriteFile {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("failed to replace {to:?} with {from:?} on `{stage}`: {source}"))]
    RenameTempFile {
        stage: &'static str,
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

/// The key may arrive before or after `__` is turned into a dot.
fn is_prefixed_credential_key(key: &str) -> bool {
    key.eq_ignore_ascii_case(CREDENTIAL_KEY) || key.eq_ignore_ascii_case("provider__api_key")
}

fn env_is_non_blank(name: &str) -> bool {
    std::env::var(name).is_ok_and(|value| !value.trim().is_empty())
}

fn non_blank_or(value: String, fallback: fn() -> String) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback()
    } else {
        trimmed.to_string()
    }
}

fn default_provider_id() -> String {
    DEFAULT_PROVIDER_ID.to_string()
}

fn default_model_name() -> String {
    DEFAULT_GEMINI_MODEL.to_string()
}

fn default_assistant_name() -> String {
    DEFAULT_ASSISTANT_NAME.to_string()
}

fn default_firm_name() -> String {
    DEFAULT_FIRM_NAME.to_string()
}

fn default_greeting() -> String {
    DEFAULT_GREETING.to_string()
}

fn default_booking_url() -> String {
    DEFAULT_BOOKING_URL.to_string()
}

fn default_contact_phone() -> String {
    DEFAULT_CONTACT_PHONE.to_string()
}

fn default_contact_email() -> String {
    DEFAULT_CONTACT_EMAIL.to_string()
}

fn default_stream_timeout_secs() -> u64 {
    DEFAULT_STREAM_TIMEOUT_SECS
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}
