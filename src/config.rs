use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

/// Model information
#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub alias: &'static str,
    pub name: &'static str,
    pub model_type: &'static str,
    pub size: &'static str,
    pub description: &'static str,
}

/// Model type for the in-process n-gram hashing model
pub const MODEL_TYPE_LITE: &str = "lite";
/// Model type for "no embedding provider"; search runs lexical only
pub const MODEL_TYPE_NONE: &str = "none";
/// Model type for models served by the embedding daemon
pub const MODEL_TYPE_SERVER: &str = "sentence-transformers";

/// Suggested embedding models
pub static SUGGESTED_MODELS: &[ModelInfo] = &[
    ModelInfo {
        alias: "none",
        name: "none",
        model_type: MODEL_TYPE_NONE,
        size: "0MB",
        description: "No embeddings - keyword search only",
    },
    ModelInfo {
        alias: "lite",
        name: "lite",
        model_type: MODEL_TYPE_LITE,
        size: "0MB",
        description: "Default. N-gram hashing, runs in-process",
    },
    ModelInfo {
        alias: "minilm",
        name: "sentence-transformers/all-MiniLM-L6-v2",
        model_type: MODEL_TYPE_SERVER,
        size: "~90MB",
        description: "Fast general-purpose embeddings",
    },
    ModelInfo {
        alias: "bge-small",
        name: "BAAI/bge-small-en-v1.5",
        model_type: MODEL_TYPE_SERVER,
        size: "~130MB",
        description: "Small BGE model, good quality",
    },
    ModelInfo {
        alias: "bge-base",
        name: "BAAI/bge-base-en-v1.5",
        model_type: MODEL_TYPE_SERVER,
        size: "~400MB",
        description: "Good balance of quality and speed",
    },
    ModelInfo {
        alias: "bge-large",
        name: "BAAI/bge-large-en-v1.5",
        model_type: MODEL_TYPE_SERVER,
        size: "~1.2GB",
        description: "Large BGE model, higher quality",
    },
];

pub const DEFAULT_MODEL: &str = "lite";
pub const DEFAULT_RERANK_MODEL: &str = "lite";
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/grove-embedder.sock";
pub const DEFAULT_CACHE_TTL_SECS: u64 = 60 * 60;
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CRYSTALLIZE_MIN_COUNT: u32 = 3;

/// Resolve a model input to (model_name, model_type)
pub fn resolve_model(model_input: &str) -> (String, String) {
    if let Some(info) = SUGGESTED_MODELS.iter().find(|m| m.alias == model_input) {
        return (info.name.to_string(), info.model_type.to_string());
    }

    // Anything else is handed to the embedding server as-is
    (model_input.to_string(), MODEL_TYPE_SERVER.to_string())
}

fn global_config_file() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("grove")
        .join("config.yaml")
}

fn read_yaml_map(path: &PathBuf) -> HashMap<String, Value> {
    let Ok(content) = fs::read_to_string(path) else {
        return HashMap::new();
    };

    match serde_yaml::from_str::<HashMap<String, Value>>(&content) {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable config file");
            HashMap::new()
        }
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Configuration for a .grove directory.
///
/// Project values in `.grove/_config.yaml` override the global
/// `~/.config/grove/config.yaml`.
pub struct GroveConfig {
    grove_path: PathBuf,
    config_file: PathBuf,
    global: HashMap<String, Value>,
    project: HashMap<String, Value>,
}

impl GroveConfig {
    pub fn new(grove_path: PathBuf) -> Self {
        let config_file = grove_path.join("_config.yaml");
        let project = read_yaml_map(&config_file);
        let global = read_yaml_map(&global_config_file());
        Self {
            grove_path,
            config_file,
            global,
            project,
        }
    }

    /// Project-only configuration, ignoring the global file
    #[cfg(test)]
    pub fn project_only(grove_path: PathBuf) -> Self {
        let config_file = grove_path.join("_config.yaml");
        let project = read_yaml_map(&config_file);
        Self {
            grove_path,
            config_file,
            global: HashMap::new(),
            project,
        }
    }

    fn save(&self) -> Result<()> {
        fs::create_dir_all(&self.grove_path)?;
        let content = serde_yaml::to_string(&self.project)?;
        fs::write(&self.config_file, content)?;
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.project
            .get(key)
            .and_then(value_to_string)
            .or_else(|| self.global.get(key).and_then(value_to_string))
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.project
            .insert(key.to_string(), Value::String(value.to_string()));
        self.save()
    }

    fn get_parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                tracing::warn!(key, value = %raw, "invalid config value, using default");
                default
            }),
            None => default,
        }
    }

    pub fn embedding_model(&self) -> String {
        self.get("embedding_model")
            .unwrap_or_else(|| DEFAULT_MODEL.to_string())
    }

    pub fn rerank_model(&self) -> String {
        self.get("rerank_model")
            .unwrap_or_else(|| DEFAULT_RERANK_MODEL.to_string())
    }

    pub fn embedding_socket(&self) -> PathBuf {
        self.get("embedding_socket")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
    }

    pub fn rerank_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.get_parsed("rerank_cache_ttl_secs", DEFAULT_CACHE_TTL_SECS))
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.get_parsed("provider_timeout_secs", DEFAULT_PROVIDER_TIMEOUT_SECS))
    }

    pub fn crystallize_min_count(&self) -> u32 {
        self.get_parsed("crystallize_min_count", DEFAULT_CRYSTALLIZE_MIN_COUNT)
    }

    pub fn get_resolved_model(&self) -> (String, String) {
        resolve_model(&self.embedding_model())
    }
}

/// Find the .grove directory, searching upward from current directory
pub fn find_grove_path() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let grove = current.join(".grove");
        if grove.is_dir() {
            return Some(grove);
        }

        if !current.pop() {
            break;
        }
    }

    if let Ok(path) = std::env::var("GROVE_PATH") {
        let grove = PathBuf::from(path);
        if grove.is_dir() {
            return Some(grove);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_aliases_and_raw_names() {
        assert_eq!(resolve_model("lite"), ("lite".into(), MODEL_TYPE_LITE.into()));
        assert_eq!(resolve_model("none").1, MODEL_TYPE_NONE);
        assert_eq!(resolve_model("bge-base").0, "BAAI/bge-base-en-v1.5");
        assert_eq!(
            resolve_model("intfloat/e5-small"),
            ("intfloat/e5-small".into(), MODEL_TYPE_SERVER.into())
        );
    }

    #[test]
    fn project_values_persist_and_parse() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GroveConfig::project_only(dir.path().to_path_buf());
        assert_eq!(config.rerank_cache_ttl(), Duration::from_secs(3600));

        config.set("rerank_cache_ttl_secs", "120").unwrap();
        config.set("embedding_model", "none").unwrap();

        let reloaded = GroveConfig::project_only(dir.path().to_path_buf());
        assert_eq!(reloaded.rerank_cache_ttl(), Duration::from_secs(120));
        assert_eq!(reloaded.embedding_model(), "none");
        assert_eq!(reloaded.crystallize_min_count(), 3);
    }

    #[test]
    fn invalid_numbers_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GroveConfig::project_only(dir.path().to_path_buf());
        config.set("provider_timeout_secs", "soon").unwrap();
        assert_eq!(config.provider_timeout(), Duration::from_secs(30));
    }
}
