use crate::error::ConfigError;
use derive_builder::Builder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Restart policy applied by the supervisor to every managed app
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RestartConfig {
    /// Minimum delay before a restart attempt (in milliseconds)
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,

    /// Maximum delay between restart attempts (in milliseconds)
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Maximum number of restarts within one crash loop (0 means never restart)
    #[serde(default = "default_max_restarts")]
    pub max_restarts: u32,

    /// Whether to use exponential backoff (true) or a fixed delay (false)
    #[serde(default = "default_use_exponential_backoff")]
    pub use_exponential_backoff: bool,

    /// Jitter factor for randomizing delays (0.0 to 1.0)
    /// 0.0 = no jitter, 1.0 = up to 100% jitter
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,

    /// Whether to restart an app that exited with a non-zero status
    #[serde(default = "default_restart_on_failure")]
    pub restart_on_failure: bool,

    /// Whether to restart an app that exited cleanly
    #[serde(default = "default_restart_on_success")]
    pub restart_on_success: bool,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_restarts: default_max_restarts(),
            use_exponential_backoff: default_use_exponential_backoff(),
            jitter_factor: default_jitter_factor(),
            restart_on_failure: default_restart_on_failure(),
            restart_on_success: default_restart_on_success(),
        }
    }
}

impl RestartConfig {
    /// Create a new RestartConfig with sensible defaults (restart on crash only)
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a RestartConfig that keeps apps alive aggressively,
    /// including after clean exits
    pub fn always() -> Self {
        Self {
            min_delay_ms: 50,
            max_delay_ms: 10_000, // 10 seconds
            max_restarts: 20,
            use_exponential_backoff: true,
            jitter_factor: 0.1,
            restart_on_failure: true,
            restart_on_success: true,
        }
    }

    /// Create a RestartConfig with conservative fixed-delay restarts
    pub fn conservative() -> Self {
        Self {
            min_delay_ms: 1_000,
            max_delay_ms: 5_000, // 5 seconds
            max_restarts: 5,
            use_exponential_backoff: false,
            jitter_factor: 0.0,
            restart_on_failure: true,
            restart_on_success: false,
        }
    }

    /// Create a RestartConfig that never restarts (run once)
    pub fn never() -> Self {
        Self {
            min_delay_ms: 0,
            max_delay_ms: 0,
            max_restarts: 0,
            use_exponential_backoff: false,
            jitter_factor: 0.0,
            restart_on_failure: false,
            restart_on_success: false,
        }
    }

    /// Validate the configuration and return errors if invalid
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.min_delay_ms > self.max_delay_ms {
            return Err(anyhow::anyhow!(
                "min_delay_ms cannot be greater than max_delay_ms"
            ));
        }

        if self.jitter_factor < 0.0 || self.jitter_factor > 1.0 {
            return Err(anyhow::anyhow!("jitter_factor must be between 0.0 and 1.0"));
        }

        if self.max_delay_ms > 300_000 {
            return Err(anyhow::anyhow!("max_delay_ms should not exceed 5 minutes"));
        }

        Ok(())
    }

    /// Get the minimum restart delay as Duration
    pub fn min_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.min_delay_ms)
    }

    /// Get the maximum restart delay as Duration
    pub fn max_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.max_delay_ms)
    }

    /// Check if this policy can restart anything at all
    pub fn restarts_enabled(&self) -> bool {
        self.max_restarts > 0 && (self.restart_on_failure || self.restart_on_success)
    }
}

/// Static declaration of one managed process's launch parameters.
///
/// Immutable once loaded: the loader produces descriptors at startup and
/// they are never mutated afterwards. `cwd` defaults to the current
/// directory and `env` to an empty overlay (the child then inherits the
/// supervisor's environment unchanged).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
#[builder(setter(into, strip_option))]
pub struct AppDescriptor {
    /// Unique app name, used for status reporting and log prefixes
    pub name: String,

    /// Script or command to run. Interpreted as the program itself when
    /// no interpreter is set, otherwise passed as the interpreter's
    /// first argument.
    pub script: String,

    /// Extra arguments as a single whitespace-separated string
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub args: Option<String>,

    /// Interpreter to run the script with (e.g. "python")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default)]
    pub interpreter: Option<String>,

    /// Working directory for the child process
    #[serde(default = "default_cwd")]
    #[builder(default = "default_cwd()")]
    pub cwd: PathBuf,

    /// Environment overlay merged onto the supervisor's own environment,
    /// descriptor values taking precedence
    #[serde(default)]
    #[builder(default)]
    #[builder(setter(custom))]
    pub env: HashMap<String, String>,
}

impl AppDescriptor {
    pub fn builder() -> AppDescriptorBuilder {
        AppDescriptorBuilder::default()
    }

    /// Resolve the program and argv this descriptor launches.
    ///
    /// With an interpreter the script becomes the interpreter's first
    /// argument; without one the script is the program. The optional
    /// `args` string is split on whitespace, no shell quoting is
    /// interpreted.
    pub fn command_line(&self) -> CommandLine {
        let extra: Vec<String> = self
            .args
            .as_deref()
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        match &self.interpreter {
            Some(interpreter) => CommandLine {
                program: interpreter.clone(),
                args: std::iter::once(self.script.clone()).chain(extra).collect(),
            },
            None => CommandLine {
                program: self.script.clone(),
                args: extra,
            },
        }
    }
}

impl AppDescriptorBuilder {
    pub fn env<T: ToString>(&mut self, key: T, value: T) -> &mut Self {
        let map = self.env.get_or_insert_with(HashMap::new);
        map.insert(key.to_string(), value.to_string());

        self
    }

    pub fn env_multi<T: ToString, I: IntoIterator<Item = (T, T)>>(&mut self, iter: I) -> &mut Self {
        let env = self.env.get_or_insert_with(HashMap::new);
        for (key, value) in iter {
            env.insert(key.to_string(), value.to_string());
        }
        self
    }
}

/// Resolved program plus argv for one descriptor
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Render the full command as a single display string
    pub fn rendered(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Ordered collection of app descriptors, insertion order = declaration order
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(transparent)]
pub struct AppRegistry {
    apps: Vec<AppDescriptor>,
}

impl AppRegistry {
    /// Load a registry from a JSON config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Load a registry from a JSON array of app declarations.
    ///
    /// Validation happens here rather than at launch time: a missing
    /// `name` or `script`, a non-string env value, or a duplicate name
    /// fails the whole load and no partial registry is produced.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    /// Build a registry from already-constructed descriptors,
    /// enforcing name uniqueness
    pub fn from_descriptors(
        descriptors: impl IntoIterator<Item = AppDescriptor>,
    ) -> Result<Self, ConfigError> {
        let apps: Vec<AppDescriptor> = descriptors.into_iter().collect();
        Self::check_unique_names(&apps)?;
        Ok(Self { apps })
    }

    fn from_value(value: Value) -> Result<Self, ConfigError> {
        let Value::Array(entries) = value else {
            return Err(ConfigError::NotAnArray);
        };

        let mut apps = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            apps.push(Self::parse_entry(index, entry)?);
        }

        Self::check_unique_names(&apps)?;
        Ok(Self { apps })
    }

    fn parse_entry(index: usize, entry: Value) -> Result<AppDescriptor, ConfigError> {
        let Value::Object(fields) = entry else {
            return Err(ConfigError::InvalidEntry { index });
        };

        let name = required_string(&fields, index, "name")?;
        let script = required_string(&fields, index, "script")?;
        let args = optional_string(&fields, index, "args")?;
        let interpreter = optional_string(&fields, index, "interpreter")?;
        let cwd = optional_string(&fields, index, "cwd")?
            .map(PathBuf::from)
            .unwrap_or_else(default_cwd);

        let env = match fields.get("env") {
            None | Some(Value::Null) => HashMap::new(),
            Some(Value::Object(raw_env)) => {
                let mut env = HashMap::with_capacity(raw_env.len());
                for (key, value) in raw_env {
                    let Value::String(value) = value else {
                        return Err(ConfigError::InvalidEnv {
                            app: name,
                            key: key.clone(),
                        });
                    };
                    env.insert(key.clone(), value.clone());
                }
                env
            }
            Some(_) => {
                return Err(ConfigError::InvalidField {
                    index,
                    field: "env",
                });
            }
        };

        Ok(AppDescriptor {
            name,
            script,
            args,
            interpreter,
            cwd,
            env,
        })
    }

    fn check_unique_names(apps: &[AppDescriptor]) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for app in apps {
            if !seen.insert(app.name.as_str()) {
                return Err(ConfigError::DuplicateName(app.name.clone()));
            }
        }
        Ok(())
    }

    /// Serialize the registry back to its JSON file format
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(&self.apps)?)
    }

    /// Look up a descriptor by app name
    pub fn get(&self, name: &str) -> Option<&AppDescriptor> {
        self.apps.iter().find(|app| app.name == name)
    }

    /// Iterate descriptors in declaration order
    pub fn iter(&self) -> impl Iterator<Item = &AppDescriptor> {
        self.apps.iter()
    }

    /// App names in declaration order
    pub fn names(&self) -> Vec<String> {
        self.apps.iter().map(|app| app.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

impl<'a> IntoIterator for &'a AppRegistry {
    type Item = &'a AppDescriptor;
    type IntoIter = std::slice::Iter<'a, AppDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.apps.iter()
    }
}

fn required_string(
    fields: &serde_json::Map<String, Value>,
    index: usize,
    field: &'static str,
) -> Result<String, ConfigError> {
    match fields.get(field) {
        Some(Value::String(value)) if !value.is_empty() => Ok(value.clone()),
        // An empty string carries no launchable content, treat it as absent
        Some(Value::String(_)) | Some(Value::Null) | None => {
            Err(ConfigError::MissingField { index, field })
        }
        Some(_) => Err(ConfigError::InvalidField { index, field }),
    }
}

fn optional_string(
    fields: &serde_json::Map<String, Value>,
    index: usize,
    field: &'static str,
) -> Result<Option<String>, ConfigError> {
    match fields.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.clone())),
        Some(_) => Err(ConfigError::InvalidField { index, field }),
    }
}

fn default_cwd() -> PathBuf {
    PathBuf::from(".")
}

// Default value functions for serde
fn default_min_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    30_000
}
fn default_max_restarts() -> u32 {
    10
}
fn default_use_exponential_backoff() -> bool {
    true
}
fn default_jitter_factor() -> f64 {
    0.1
}
fn default_restart_on_failure() -> bool {
    true
}
fn default_restart_on_success() -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_APPS: &str = r#"[
        {
            "name": "chat-backend",
            "script": "uvicorn",
            "args": "chat_backend:app --host 0.0.0.0 --port 8014",
            "interpreter": "python",
            "cwd": ".",
            "env": {}
        },
        {
            "name": "agent-manager",
            "script": "scripts/start_agents.py",
            "interpreter": "python",
            "cwd": "."
        }
    ]"#;

    #[test]
    fn test_load_two_apps_preserves_order() {
        let registry = AppRegistry::from_json_str(TWO_APPS).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["chat-backend", "agent-manager"]);
    }

    #[test]
    fn test_interpreter_command_line() {
        let registry = AppRegistry::from_json_str(TWO_APPS).unwrap();
        let backend = registry.get("chat-backend").unwrap();
        let command_line = backend.command_line();

        assert_eq!(command_line.program, "python");
        assert_eq!(
            command_line.rendered(),
            "python uvicorn chat_backend:app --host 0.0.0.0 --port 8014"
        );
    }

    #[test]
    fn test_command_line_without_interpreter() {
        let descriptor = AppDescriptor::builder()
            .name("plain")
            .script("sleep")
            .args("5")
            .build()
            .unwrap();

        let command_line = descriptor.command_line();
        assert_eq!(command_line.program, "sleep");
        assert_eq!(command_line.args, vec!["5"]);
    }

    #[test]
    fn test_env_defaults_to_empty_overlay() {
        let registry = AppRegistry::from_json_str(TWO_APPS).unwrap();
        let agent = registry.get("agent-manager").unwrap();
        assert!(agent.env.is_empty());
        assert_eq!(agent.cwd, PathBuf::from("."));
    }

    #[test]
    fn test_missing_name_fails() {
        let raw = r#"[{"script": "uvicorn"}]"#;
        let err = AppRegistry::from_json_str(raw).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField { index: 0, field: "name" }
        ));
    }

    #[test]
    fn test_missing_script_fails() {
        let raw = r#"[{"name": "chat-backend"}]"#;
        let err = AppRegistry::from_json_str(raw).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField { index: 0, field: "script" }
        ));
    }

    #[test]
    fn test_non_string_env_value_fails() {
        let raw = r#"[{"name": "a", "script": "b", "env": {"PORT": 8014}}]"#;
        let err = AppRegistry::from_json_str(raw).unwrap_err();
        match err {
            ConfigError::InvalidEnv { app, key } => {
                assert_eq!(app, "a");
                assert_eq!(key, "PORT");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let raw = r#"[{"name": "a", "script": "x"}, {"name": "a", "script": "y"}]"#;
        let err = AppRegistry::from_json_str(raw).unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateName(name) if name == "a"));
    }

    #[test]
    fn test_not_an_array_fails() {
        let err = AppRegistry::from_json_str(r#"{"name": "a"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::NotAnArray));
    }

    #[test]
    fn test_round_trip() {
        let registry = AppRegistry::from_json_str(TWO_APPS).unwrap();
        let serialized = registry.to_json_string().unwrap();
        let reloaded = AppRegistry::from_json_str(&serialized).unwrap();
        assert_eq!(registry, reloaded);
    }

    #[test]
    fn test_builder_env_setters() {
        let descriptor = AppDescriptor::builder()
            .name("chat-backend")
            .script("uvicorn")
            .interpreter("python")
            .env("PORT", "8014")
            .env_multi([("A", "1"), ("B", "2")])
            .build()
            .unwrap();

        assert_eq!(descriptor.env.len(), 3);
        assert_eq!(descriptor.env["PORT"], "8014");
        assert_eq!(descriptor.cwd, PathBuf::from("."));
    }

    #[test]
    fn test_default_restart_config() {
        let config = RestartConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.restarts_enabled());
        assert!(config.restart_on_failure);
        assert!(!config.restart_on_success);
    }

    #[test]
    fn test_always_restart_config() {
        let config = RestartConfig::always();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_restarts, 20);
        assert!(config.restart_on_success);
    }

    #[test]
    fn test_never_restart_config() {
        let config = RestartConfig::never();
        assert!(config.validate().is_ok());
        assert!(!config.restarts_enabled());
    }

    #[test]
    fn test_invalid_restart_config() {
        let mut config = RestartConfig {
            min_delay_ms: 1000,
            max_delay_ms: 500,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        config.min_delay_ms = 100;
        config.max_delay_ms = 1000;
        config.jitter_factor = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_restart_config_serialization() {
        let config = RestartConfig::conservative();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: RestartConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }
}
