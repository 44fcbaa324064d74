use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::discovery::default_fastq_exts;
use crate::error::KiraError;
use crate::filenames::{FilenameConvention, default_conventions};

const DEFAULT_DB_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_DB: &str = "seq";
const DEFAULT_REF_PREFIX: &str = "TMP_";

/// Keys shared with the other sequencing tools reading the same config
/// directory; unknown keys are ignored.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub labxdb_http_url: Option<String>,
    #[serde(default)]
    pub labxdb_http_login: Option<String>,
    #[serde(default)]
    pub labxdb_http_password: Option<String>,
    #[serde(default)]
    pub labxdb_http_path: Option<String>,
    #[serde(default)]
    pub labxdb_http_db: Option<String>,
    #[serde(default)]
    pub labxdb_http_path_seq: Option<String>,
    #[serde(default)]
    pub path_seq_raw: Option<PathBuf>,
    #[serde(default)]
    pub fastq_exts: Option<Vec<String>>,
    /// Filename conventions in priority order, e.g. `["illumina", "plain"]`.
    #[serde(default)]
    pub filename_conventions: Option<Vec<FilenameConvention>>,
    #[serde(default)]
    pub ref_prefix: Option<String>,
    #[serde(default)]
    pub sra_rate_limit_secs: Option<f64>,
    #[serde(default)]
    pub project_cache: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConnection {
    pub url: String,
    pub login: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub db: DbConnection,
    pub path_seq_raw: Option<PathBuf>,
    pub fastq_exts: Vec<String>,
    pub conventions: Vec<FilenameConvention>,
    pub ref_prefix: String,
    pub sra_rate_limit: Duration,
    pub project_cache: Option<PathBuf>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, KiraError> {
        Self::resolve_with(path, |key| std::env::var(key).ok())
    }

    /// Same as [`ConfigLoader::resolve`] with an explicit environment.
    pub fn resolve_with<E>(path: Option<&str>, env: E) -> Result<ResolvedConfig, KiraError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let config = match path {
            Some(path) => {
                let path = PathBuf::from(path);
                if !path.exists() {
                    return Err(KiraError::ConfigRead(path));
                }
                Self::load(&path)?
            }
            None => match Self::default_location(&env) {
                Some(path) if path.exists() => Self::load(&path)?,
                _ => Config::default(),
            },
        };
        Self::resolve_config(config, &env)
    }

    fn default_location<E>(env: &E) -> Option<PathBuf>
    where
        E: Fn(&str) -> Option<String>,
    {
        env("HTS_CONFIG_PATH")
            .map(PathBuf::from)
            .or_else(|| env("XDG_CONFIG_HOME").map(|home| PathBuf::from(home).join("hts")))
    }

    /// Loads one JSON file, or merges every `*.json` of a directory in
    /// file name order with later files overriding earlier keys.
    pub fn load(path: &Path) -> Result<Config, KiraError> {
        let mut merged = Map::new();
        if path.is_dir() {
            let mut files: Vec<PathBuf> = fs::read_dir(path)
                .map_err(|_| KiraError::ConfigRead(path.to_path_buf()))?
                .filter_map(|entry| entry.ok().map(|entry| entry.path()))
                .filter(|file| file.extension().is_some_and(|ext| ext == "json"))
                .collect();
            files.sort();
            for file in files {
                merged.extend(read_object(&file)?);
            }
        } else {
            merged = read_object(path)?;
        }
        serde_json::from_value(Value::Object(merged))
            .map_err(|err| KiraError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config<E>(config: Config, env: &E) -> Result<ResolvedConfig, KiraError>
    where
        E: Fn(&str) -> Option<String>,
    {
        let db = resolve_db(&config, env);
        let sra_rate_limit = match config.sra_rate_limit_secs {
            Some(secs) if secs.is_finite() && secs >= 0.0 => Duration::from_secs_f64(secs),
            Some(secs) => {
                return Err(KiraError::ConfigParse(format!(
                    "sra_rate_limit_secs must be a non-negative number, got {secs}"
                )));
            }
            None => Duration::from_secs(1),
        };
        let conventions = match config.filename_conventions {
            Some(list) if list.is_empty() => {
                return Err(KiraError::ConfigParse(
                    "filename_conventions must name at least one convention".to_string(),
                ));
            }
            Some(list) => list,
            None => default_conventions(),
        };
        Ok(ResolvedConfig {
            db,
            path_seq_raw: config.path_seq_raw,
            fastq_exts: config.fastq_exts.unwrap_or_else(default_fastq_exts),
            conventions,
            ref_prefix: config
                .ref_prefix
                .unwrap_or_else(|| DEFAULT_REF_PREFIX.to_string()),
            sra_rate_limit,
            project_cache: config.project_cache,
        })
    }
}

fn read_object(path: &Path) -> Result<Map<String, Value>, KiraError> {
    let content = fs::read_to_string(path).map_err(|_| KiraError::ConfigRead(path.to_path_buf()))?;
    match serde_json::from_str(&content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(KiraError::ConfigParse(format!(
            "{} is not a JSON object",
            path.display()
        ))),
        Err(err) => Err(KiraError::ConfigParse(format!("{}: {err}", path.display()))),
    }
}

fn resolve_db<E>(config: &Config, env: &E) -> DbConnection
where
    E: Fn(&str) -> Option<String>,
{
    let base = config
        .labxdb_http_url
        .clone()
        .or_else(|| env("LABXDB_HTTP_URL"))
        .unwrap_or_else(|| DEFAULT_DB_URL.to_string());
    let login = config
        .labxdb_http_login
        .clone()
        .or_else(|| env("LABXDB_HTTP_LOGIN"));
    let password = config
        .labxdb_http_password
        .clone()
        .or_else(|| env("LABXDB_HTTP_PASSWORD"));

    let path = config.labxdb_http_path.clone().or_else(|| {
        let seq_path = config
            .labxdb_http_db
            .is_none()
            .then(|| config.labxdb_http_path_seq.clone())
            .flatten();
        seq_path.or_else(|| {
            let db = config.labxdb_http_db.as_deref().unwrap_or(DEFAULT_DB);
            env(&format!("LABXDB_HTTP_PATH_{}", db.to_uppercase()))
                .or_else(|| env("LABXDB_HTTP_PATH"))
        })
    });

    let url = match path {
        Some(path) => url_join(&[&base, &path]),
        None => base,
    };
    DbConnection {
        url,
        login,
        password,
    }
}

/// Joins URL segments with single slashes, keeping a trailing slash on the
/// last segment.
pub fn url_join(parts: &[&str]) -> String {
    let trailing = parts.last().is_some_and(|last| last.ends_with('/'));
    let mut joined = parts
        .iter()
        .map(|part| part.trim_matches('/'))
        .collect::<Vec<_>>()
        .join("/");
    if trailing {
        joined.push('/');
    }
    joined
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_config() {
        let resolved = ConfigLoader::resolve_config(Config::default(), &env_from(&[])).unwrap();
        assert_eq!(resolved.db.url, "http://127.0.0.1:8080");
        assert_eq!(resolved.db.login, None);
        assert_eq!(resolved.ref_prefix, "TMP_");
        assert_eq!(resolved.fastq_exts, default_fastq_exts());
        assert_eq!(resolved.sra_rate_limit, Duration::from_secs(1));
        assert_eq!(resolved.conventions, default_conventions());
    }

    #[test]
    fn empty_convention_list_is_rejected() {
        let config = Config {
            filename_conventions: Some(Vec::new()),
            ..Config::default()
        };
        assert!(ConfigLoader::resolve_config(config, &env_from(&[])).is_err());
    }

    #[test]
    fn db_path_from_environment() {
        let env = env_from(&[
            ("LABXDB_HTTP_URL", "http://db.lab:8081/"),
            ("LABXDB_HTTP_PATH_SEQ", "/seq/"),
            ("LABXDB_HTTP_LOGIN", "reader"),
        ]);
        let resolved = ConfigLoader::resolve_config(Config::default(), &env).unwrap();
        assert_eq!(resolved.db.url, "http://db.lab:8081/seq/");
        assert_eq!(resolved.db.login.as_deref(), Some("reader"));
    }

    #[test]
    fn config_path_seq_beats_environment() {
        let config = Config {
            labxdb_http_path_seq: Some("labxdb/seq".to_string()),
            ..Config::default()
        };
        let env = env_from(&[("LABXDB_HTTP_PATH_SEQ", "other")]);
        let resolved = ConfigLoader::resolve_config(config, &env).unwrap();
        assert_eq!(resolved.db.url, "http://127.0.0.1:8080/labxdb/seq");
    }

    #[test]
    fn negative_rate_limit_is_rejected() {
        let config = Config {
            sra_rate_limit_secs: Some(-1.0),
            ..Config::default()
        };
        assert!(ConfigLoader::resolve_config(config, &env_from(&[])).is_err());
    }

    #[test]
    fn url_join_normalises_slashes() {
        assert_eq!(url_join(&["http://h/", "/a/", "b"]), "http://h/a/b");
        assert_eq!(url_join(&["http://h", "a/"]), "http://h/a/");
    }
}
