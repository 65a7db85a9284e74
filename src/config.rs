use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    env, fs,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// File the configuration was read from, and where settings are saved
    #[serde(skip)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Server root; unset means `http://localhost:11434`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Preferred model; unset means the first one the server lists
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Defaults
fn default_log_level() -> String { "warn".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let path = Self::locate();
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            tracing::debug!("No config file at {}, using defaults", path.display());
            Config::default()
        };
        config.path = Some(path);

        config.apply_env_overrides();

        Ok(config)
    }

    /// Parse a config file, substituting `${VAR}` references first
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let content = Self::substitute_env_vars(&content);

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.path = Some(path.to_path_buf());

        Ok(config)
    }

    /// Config file location: `LITEUI_CONFIG`, then `./liteui.toml`, then the
    /// per-user file (which is also where a first save lands)
    pub fn locate() -> PathBuf {
        if let Ok(path) = env::var("LITEUI_CONFIG") {
            return PathBuf::from(path);
        }

        let local = PathBuf::from("./liteui.toml");
        if local.exists() {
            return local;
        }

        Self::user_config_path()
    }

    fn user_config_path() -> PathBuf {
        let home = env::var("HOME").unwrap_or_default();
        Path::new(&home).join(".config").join("liteui").join("config.toml")
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = env::var("LITEUI_BASE_URL") {
            self.ollama.base_url = Some(url);
        }
        if let Ok(model) = env::var("LITEUI_MODEL") {
            self.ollama.model = Some(model);
        }
    }

    /// Substitute ${VAR_NAME} with environment variable values
    fn substitute_env_vars(content: &str) -> String {
        let mut result = content.to_string();

        // Find all ${VAR} patterns
        while let Some(start) = result.find("${") {
            if let Some(end) = result[start..].find('}') {
                let var_name = &result[start + 2..start + end];
                let value = env::var(var_name).unwrap_or_default();
                result.replace_range(start..start + end + 1, &value);
            } else {
                break;
            }
        }

        result
    }

    /// Effective server root
    pub fn base_url(&self) -> String {
        let configured = self.ollama.base_url.as_deref().unwrap_or_default();
        crate::providers::ollama::normalize_base_url(configured)
    }

    /// Persist a new base URL. An empty value removes the setting.
    ///
    /// Only the base URL is rewritten; other keys already in the file are kept.
    pub fn save_base_url(&mut self, url: &str) -> Result<()> {
        let url = url.trim();
        let value = (!url.is_empty()).then(|| url.to_string());
        self.ollama.base_url = value.clone();

        let path = self.path.clone().unwrap_or_else(Self::user_config_path);

        let mut on_disk = if path.exists() {
            Self::load_raw(&path)?
        } else {
            Config::default()
        };
        on_disk.ollama.base_url = value;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }

        let content = toml::to_string_pretty(&on_disk).context("Failed to serialize config")?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved base URL to {}", path.display());
        self.path = Some(path);

        Ok(())
    }

    // Without ${VAR} substitution, so saving never bakes secrets into the file
    fn load_raw(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_config_path(name: &str) -> PathBuf {
        env::temp_dir()
            .join(format!("liteui-test-{}-{}", name, uuid::Uuid::new_v4()))
            .join("config.toml")
    }

    #[test]
    fn test_env_var_substitution() {
        unsafe { env::set_var("LITEUI_TEST_VAR", "test_value") };

        let input = "base_url = \"${LITEUI_TEST_VAR}\"";
        let output = Config::substitute_env_vars(input);

        assert_eq!(output, "base_url = \"test_value\"");

        unsafe { env::remove_var("LITEUI_TEST_VAR") };
    }

    #[test]
    fn test_env_var_substitution_multiple() {
        unsafe {
            env::set_var("LITEUI_VAR1", "value1");
            env::set_var("LITEUI_VAR2", "value2");
        }

        let input = "key1 = \"${LITEUI_VAR1}\"\nkey2 = \"${LITEUI_VAR2}\"";
        let output = Config::substitute_env_vars(input);

        assert!(output.contains("value1"));
        assert!(output.contains("value2"));

        unsafe {
            env::remove_var("LITEUI_VAR1");
            env::remove_var("LITEUI_VAR2");
        }
    }

    #[test]
    fn test_defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert!(config.ollama.base_url.is_none());
        assert!(config.ollama.model.is_none());
        assert_eq!(config.logging.level, "warn");
        assert_eq!(config.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_parse_sections() {
        let config: Config = toml::from_str(
            "[ollama]\nbase_url = \"http://gpu-box:11434/\"\nmodel = \"qwen3\"\n\n[logging]\nlevel = \"debug\"\n",
        )
        .unwrap();

        assert_eq!(config.base_url(), "http://gpu-box:11434");
        assert_eq!(config.ollama.model.as_deref(), Some("qwen3"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_save_base_url_round_trip() {
        let path = temp_config_path("save");
        let mut config = Config {
            path: Some(path.clone()),
            ..Default::default()
        };

        config.save_base_url("http://10.0.0.5:11434").unwrap();
        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.ollama.base_url.as_deref(), Some("http://10.0.0.5:11434"));

        config.save_base_url("").unwrap();
        let reloaded = Config::load_from(&path).unwrap();
        assert!(reloaded.ollama.base_url.is_none());
        assert!(config.ollama.base_url.is_none());

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn test_save_keeps_other_keys() {
        let path = temp_config_path("keep");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[ollama]\nmodel = \"llama3.2\"\n\n[logging]\nlevel = \"info\"\n").unwrap();

        let mut config = Config::load_from(&path).unwrap();
        config.save_base_url("http://remote:11434").unwrap();

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.ollama.model.as_deref(), Some("llama3.2"));
        assert_eq!(reloaded.logging.level, "info");
        assert_eq!(reloaded.ollama.base_url.as_deref(), Some("http://remote:11434"));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }
}
