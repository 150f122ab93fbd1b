//! App config document schema

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde_yaml::Value;

use crate::errors::Error;
use crate::model::cluster::{Kind, RepoType, RuntimeKind};

/// Marker carried through the merge for keys that an override layer deletes.
pub const DELETE_SENTINEL: &str = "!DELETE";

/// A schemaless config tree node. Deletions ride along as a first-class
/// variant so the post-merge strip pass can find them at any depth.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    Null,
    Bool(bool),
    Number(serde_yaml::Number),
    String(String),
    List(Vec<ConfigValue>),
    Map(BTreeMap<String, ConfigValue>),
    Delete,
}

impl ConfigValue {
    /// Convert a parsed YAML value. The `!DELETE` tag (and the equivalent
    /// plain sentinel string) become [`ConfigValue::Delete`].
    pub fn from_yaml(value: Value) -> Result<ConfigValue, Error> {
        let node = match value {
            Value::Null => ConfigValue::Null,
            Value::Bool(b) => ConfigValue::Bool(b),
            Value::Number(n) => ConfigValue::Number(n),
            Value::String(s) => {
                if s == DELETE_SENTINEL {
                    ConfigValue::Delete
                } else {
                    ConfigValue::String(s)
                }
            }
            Value::Sequence(seq) => {
                let mut items = Vec::with_capacity(seq.len());
                for item in seq {
                    items.push(ConfigValue::from_yaml(item)?);
                }
                ConfigValue::List(items)
            }
            Value::Mapping(mapping) => {
                let mut map = BTreeMap::new();
                for (key, value) in mapping {
                    let key = key
                        .as_str()
                        .ok_or_else(|| Error::Parse("config map keys must be strings".into()))?
                        .to_string();
                    map.insert(key, ConfigValue::from_yaml(value)?);
                }
                ConfigValue::Map(map)
            }
            Value::Tagged(tagged) => {
                if tagged.tag.to_string() == DELETE_SENTINEL {
                    ConfigValue::Delete
                } else {
                    // unknown tags degrade to their inner value
                    ConfigValue::from_yaml(tagged.value)?
                }
            }
        };
        Ok(node)
    }

    /// Render back to YAML. A surviving delete marker serializes as the
    /// sentinel string.
    pub fn to_yaml(&self) -> Value {
        match self {
            ConfigValue::Null => Value::Null,
            ConfigValue::Bool(b) => Value::Bool(*b),
            ConfigValue::Number(n) => Value::Number(n.clone()),
            ConfigValue::String(s) => Value::String(s.clone()),
            ConfigValue::List(items) => {
                Value::Sequence(items.iter().map(ConfigValue::to_yaml).collect())
            }
            ConfigValue::Map(map) => {
                let mut mapping = serde_yaml::Mapping::new();
                for (key, value) in map {
                    mapping.insert(Value::String(key.clone()), value.to_yaml());
                }
                Value::Mapping(mapping)
            }
            ConfigValue::Delete => Value::String(DELETE_SENTINEL.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ConfigValue>> {
        match self {
            ConfigValue::Map(map) => Some(map),
            _ => None,
        }
    }
}

/// A compiled (or single-layer) app config document.
///
/// The head fields are only meaningful when sourced from the defaults layer;
/// override layers' head values are ignored by policy. Everything else lives
/// in `other` and participates in the merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
    pub kind: Option<Kind>,
    pub runtime: Option<RuntimeKind>,
    pub repo_type: Option<RepoType>,
    pub repo_name: Option<String>,
    pub port: Option<u16>,
    pub mvn: Option<ConfigValue>,

    /// Override-merged body, including env and files subtrees.
    pub other: BTreeMap<String, ConfigValue>,
}

fn typed<T: DeserializeOwned>(field: &str, value: Value) -> Result<T, Error> {
    serde_yaml::from_value(value).map_err(|e| Error::Parse(format!("invalid {field}: {e}")))
}

/// Parse one YAML layer. Unknown kind/runtime/repo tokens fail the parse;
/// keys outside the typed head land in the `other` tree.
pub fn parse_yaml(text: &str) -> Result<AppConfig, Error> {
    let value: Value =
        serde_yaml::from_str(text).map_err(|e| Error::Parse(format!("invalid yaml: {e}")))?;
    let mapping = match value {
        Value::Mapping(mapping) => mapping,
        Value::Null => serde_yaml::Mapping::new(),
        _ => return Err(Error::Parse("config document must be a mapping".into())),
    };

    let mut config = AppConfig::default();
    for (key, value) in mapping {
        let key = key
            .as_str()
            .ok_or_else(|| Error::Parse("config keys must be strings".into()))?
            .to_string();
        match key.as_str() {
            "name" => config.name = typed("name", value)?,
            "version" => config.version = typed("version", value)?,
            "kind" => config.kind = Some(typed("kind", value)?),
            "runtime" => config.runtime = Some(typed("runtime", value)?),
            "repo_type" => config.repo_type = Some(typed("repo_type", value)?),
            "repo_name" => config.repo_name = Some(typed("repo_name", value)?),
            "port" => config.port = Some(typed("port", value)?),
            "mvn" => config.mvn = Some(ConfigValue::from_yaml(value)?),
            _ => {
                config.other.insert(key, ConfigValue::from_yaml(value)?);
            }
        }
    }
    Ok(config)
}

/// Emit a compiled config as YAML. Parsing the output yields the same
/// document (delete markers excepted, which the compile strips).
pub fn to_yaml_string(config: &AppConfig) -> Result<String, Error> {
    let mut mapping = serde_yaml::Mapping::new();
    if !config.name.is_empty() {
        mapping.insert("name".into(), Value::String(config.name.clone()));
    }
    if !config.version.is_empty() {
        mapping.insert("version".into(), Value::String(config.version.clone()));
    }
    if let Some(kind) = &config.kind {
        mapping.insert("kind".into(), serde_yaml::to_value(kind)?);
    }
    if let Some(runtime) = &config.runtime {
        mapping.insert("runtime".into(), serde_yaml::to_value(runtime)?);
    }
    if let Some(repo_type) = &config.repo_type {
        mapping.insert("repo_type".into(), serde_yaml::to_value(repo_type)?);
    }
    if let Some(repo_name) = &config.repo_name {
        mapping.insert("repo_name".into(), Value::String(repo_name.clone()));
    }
    if let Some(port) = config.port {
        mapping.insert("port".into(), Value::Number(port.into()));
    }
    if let Some(mvn) = &config.mvn {
        mapping.insert("mvn".into(), mvn.to_yaml());
    }
    for (key, value) in &config.other {
        mapping.insert(Value::String(key.clone()), value.to_yaml());
    }
    Ok(serde_yaml::to_string(&Value::Mapping(mapping))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_head_and_other_split() {
        let config = parse_yaml(
            "name: arryved-api\nversion: '1.0'\nkind: online\nruntime: host-package\nrepo_type: apt\nport: 8080\nenv:\n  FOO: bar\n",
        )
        .unwrap();
        assert_eq!(config.name, "arryved-api");
        assert_eq!(config.kind, Some(Kind::Online));
        assert_eq!(config.runtime, Some(RuntimeKind::HostPackage));
        assert_eq!(config.repo_type, Some(RepoType::Apt));
        assert_eq!(config.port, Some(8080));
        let env = config.other.get("env").and_then(ConfigValue::as_map).unwrap();
        assert_eq!(env.get("FOO").and_then(|v| v.as_str()), Some("bar"));
    }

    #[test]
    fn test_parse_rejects_unknown_tokens() {
        assert!(parse_yaml("kind: jumbo\n").is_err());
        assert!(parse_yaml("runtime: bare-metal\n").is_err());
        assert!(parse_yaml("repo_type: cvs\n").is_err());
    }

    #[test]
    fn test_delete_tag_becomes_marker() {
        let config = parse_yaml("app:\n  deleteme: !DELETE drop\n").unwrap();
        let app = config.other.get("app").and_then(ConfigValue::as_map).unwrap();
        assert_eq!(app.get("deleteme"), Some(&ConfigValue::Delete));
    }

    #[test]
    fn test_round_trip() {
        let text = "name: poserp-app\nkind: online\nruntime: cluster-api\nfiles:\n  etc/token: inline\n";
        let config = parse_yaml(text).unwrap();
        let emitted = to_yaml_string(&config).unwrap();
        let reparsed = parse_yaml(&emitted).unwrap();
        assert_eq!(config, reparsed);
    }
}
