use std::str::FromStr;

use config::{Config, ConfigError, File, FileFormat, Source};
use serde::Deserialize;
use structopt::StructOpt;
use tantivy::merge_policy::{LogMergePolicy, MergePolicy, NoMergePolicy};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const HEADER: &str = r#"
      _            _                            _
  ___| |_ _  _  __| |_  _ ___ ___ __ _ _ _ __ _| |_
 (_-<  _| || |/ _` | || (_-</ -_) _` | '_/ _| ' \_|
 /__/\__|\_,_|\__,_|\_, /__/\___\__,_|_| \__|_||_(_)
                    |__/  study repository search
"#;

#[derive(PartialEq)]
pub enum MergePolicyType {
    Log,
    NoMerge,
}

const fn default_level_log_size() -> f64 {
    0.75
}
const fn default_min_layer_size() -> u32 {
    10_000
}
const fn default_min_merge_size() -> usize {
    8
}

/// Resolve settings: a config file when one is given, CLI flags otherwise.
pub fn settings() -> Settings {
    let options = Settings::from_args();
    if !options.config.is_empty() && std::path::Path::new(&options.config).exists() {
        Settings::new(&options.config).expect("Invalid configuration file")
    } else {
        options
    }
}

#[derive(Deserialize, Clone, Debug, StructOpt)]
pub struct ConfigMergePolicy {
    #[structopt(long, default_value = "log")]
    #[serde(default = "Settings::default_merge_kind")]
    kind: String,
    #[structopt(long, default_value = "8")]
    #[serde(default = "default_min_merge_size")]
    min_merge_size: usize,
    #[structopt(long, default_value = "10000")]
    #[serde(default = "default_min_layer_size")]
    min_layer_size: u32,
    #[structopt(long, default_value = "0.75")]
    #[serde(default = "default_level_log_size")]
    level_log_size: f64,
}

impl Default for ConfigMergePolicy {
    fn default() -> Self {
        Self {
            kind: Settings::default_merge_kind(),
            min_merge_size: default_min_merge_size(),
            min_layer_size: default_min_layer_size(),
            level_log_size: default_level_log_size(),
        }
    }
}

impl ConfigMergePolicy {
    pub fn get_kind(&self) -> MergePolicyType {
        match self.kind.to_ascii_lowercase().as_ref() {
            "log" => MergePolicyType::Log,
            "nomerge" => MergePolicyType::NoMerge,
            _ => panic!("Unknown merge policy defined"),
        }
    }
}

/// The `efo.*` block: ontology inputs for matching, expansion and reloads.
#[derive(Deserialize, Clone, Debug, Default, StructOpt)]
pub struct EfoConfig {
    /// CSV of terms never matched in free text.
    #[structopt(long = "efo-stopwords", default_value = "")]
    #[serde(default)]
    pub stopwords: String,
    /// Extra synonym definitions merged into the ontology.
    #[structopt(long = "efo-synonyms", default_value = "")]
    #[serde(default)]
    pub synonyms: String,
    /// File listing terms excluded from matching entirely.
    #[structopt(long = "efo-ignore-list", default_value = "")]
    #[serde(default)]
    pub ignore_list: String,
    #[structopt(long = "efo-owl-filename", default_value = "")]
    #[serde(default)]
    pub owl_filename: String,
    #[structopt(long = "efo-update-url", default_value = "")]
    #[serde(default)]
    pub update_url: String,
    #[structopt(long = "efo-local-owl-filename", default_value = "")]
    #[serde(default)]
    pub local_owl_filename: String,
    /// Extracted ontology node records (JSON array) used to (re)build the
    /// ontology index when it is empty.
    #[structopt(long = "efo-nodes-file", default_value = "")]
    #[serde(default)]
    pub nodes_file: String,
}

/// The `files.*` block: where file content is served from. Resolution is a
/// collaborator concern, the URLs are only echoed into responses.
#[derive(Deserialize, Clone, Debug, Default, StructOpt)]
pub struct FilesConfig {
    #[structopt(long = "files-ftp-base-url", default_value = "")]
    #[serde(default)]
    pub ftp_base_url: String,
    #[structopt(long = "files-http-base-url", default_value = "")]
    #[serde(default)]
    pub http_base_url: String,
    #[structopt(long = "files-fire-ftp-base-url", default_value = "")]
    #[serde(default)]
    pub fire_ftp_base_url: String,
    #[structopt(long = "files-fire-http-base-url", default_value = "")]
    #[serde(default)]
    pub fire_http_base_url: String,
    #[structopt(long = "files-nfs-cache")]
    #[serde(default)]
    pub nfs_cache_enabled: bool,
    #[structopt(long = "files-nfs-cache-path", default_value = "")]
    #[serde(default)]
    pub nfs_cache_path: String,
}

#[derive(Deserialize, Clone, Debug, StructOpt)]
#[structopt(name = "studysearch", version = VERSION)]
pub struct Settings {
    #[serde(skip)]
    #[structopt(short, long, default_value = "config/config.toml")]
    pub config: String,
    #[serde(default = "Settings::default_host")]
    #[structopt(short, long, default_value = "0.0.0.0")]
    pub host: String,
    #[serde(default = "Settings::default_port")]
    #[structopt(short, long, default_value = "8080")]
    pub port: u16,
    /// Base directory holding one subdirectory per named index.
    #[serde(default = "Settings::default_path")]
    #[structopt(short = "P", long, default_value = "data/")]
    pub path: String,
    #[serde(default = "Settings::default_level")]
    #[structopt(short, long, default_value = "info")]
    pub log_level: String,
    #[serde(default = "Settings::default_writer_memory")]
    #[structopt(short, long, default_value = "200000000")]
    pub writer_memory: usize,
    #[serde(default = "Settings::default_indexing_queue_size")]
    #[structopt(long, default_value = "1000")]
    pub indexing_queue_size: usize,
    #[serde(default = "Settings::default_indexing_workers")]
    #[structopt(long, default_value = "2")]
    pub indexing_workers: usize,
    /// Width, in characters, of highlighted snippets.
    #[serde(default = "Settings::default_fragment_width")]
    #[structopt(long, default_value = "200")]
    pub fragment_width: usize,
    #[serde(default = "Settings::default_facet_limit")]
    #[structopt(long, default_value = "20")]
    pub facet_limit: usize,
    /// Keep autocomplete terms only when they occur in the submission index.
    #[serde(default = "Settings::default_autocomplete_filter")]
    #[structopt(long, parse(try_from_str), default_value = "true")]
    pub autocomplete_filter_by_index: bool,
    #[serde(default = "Settings::default_admin_ip_allow_list")]
    #[structopt(long, use_delimiter = true, default_value = "127.0.0.1,::1")]
    pub index_admin_ip_allow_list: Vec<String>,
    #[serde(default)]
    #[structopt(long, default_value = "")]
    pub http_proxy_host: String,
    #[serde(default)]
    #[structopt(long, default_value = "0")]
    pub http_proxy_port: u16,
    /// Shared secret for privileged partial-update REST calls.
    #[serde(default)]
    #[structopt(long, default_value = "")]
    pub partial_update_rest_token: String,
    /// Static session tokens, `token=login` or `token=login:superuser`.
    #[serde(default)]
    #[structopt(long, use_delimiter = true)]
    pub auth_tokens: Vec<String>,
    #[structopt(flatten)]
    #[serde(default)]
    pub merge_policy: ConfigMergePolicy,
    #[structopt(flatten)]
    #[serde(default)]
    pub efo: EfoConfig,
    #[structopt(flatten)]
    #[serde(default)]
    pub files: FilesConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config: "config/config.toml".into(),
            host: Settings::default_host(),
            port: Settings::default_port(),
            path: Settings::default_path(),
            log_level: Settings::default_level(),
            writer_memory: Settings::default_writer_memory(),
            indexing_queue_size: Settings::default_indexing_queue_size(),
            indexing_workers: Settings::default_indexing_workers(),
            fragment_width: Settings::default_fragment_width(),
            facet_limit: Settings::default_facet_limit(),
            autocomplete_filter_by_index: true,
            index_admin_ip_allow_list: Settings::default_admin_ip_allow_list(),
            http_proxy_host: String::new(),
            http_proxy_port: 0,
            partial_update_rest_token: String::new(),
            auth_tokens: Vec::new(),
            merge_policy: ConfigMergePolicy::default(),
            efo: EfoConfig::default(),
            files: FilesConfig::default(),
        }
    }
}

impl FromStr for Settings {
    type Err = ConfigError;

    fn from_str(cfg: &str) -> Result<Self, ConfigError> {
        Self::from_config(File::from_str(cfg, FileFormat::Toml))
    }
}

impl Settings {
    pub fn new(path: &str) -> Result<Self, ConfigError> {
        Self::from_config(File::with_name(path))
    }

    pub fn from_config<T: Source + Send + Sync + 'static>(c: T) -> Result<Self, ConfigError> {
        let mut cfg = Config::new();
        cfg.merge(c)?;
        cfg.try_into()
    }

    pub fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    pub fn default_port() -> u16 {
        8080
    }

    pub fn default_path() -> String {
        "data/".to_string()
    }

    pub fn default_level() -> String {
        "info".to_string()
    }

    pub fn default_writer_memory() -> usize {
        200_000_000
    }

    pub fn default_indexing_queue_size() -> usize {
        1000
    }

    pub fn default_indexing_workers() -> usize {
        2
    }

    pub fn default_fragment_width() -> usize {
        200
    }

    pub fn default_facet_limit() -> usize {
        20
    }

    pub fn default_autocomplete_filter() -> bool {
        true
    }

    pub fn default_admin_ip_allow_list() -> Vec<String> {
        vec!["127.0.0.1".to_string(), "::1".to_string()]
    }

    pub fn default_merge_kind() -> String {
        "log".to_string()
    }

    pub fn get_merge_policy(&self) -> Box<dyn MergePolicy> {
        match self.merge_policy.get_kind() {
            MergePolicyType::Log => {
                let mut mp = LogMergePolicy::default();
                mp.set_level_log_size(self.merge_policy.level_log_size);
                mp.set_min_layer_size(self.merge_policy.min_layer_size);
                mp.set_min_merge_size(self.merge_policy.min_merge_size);
                Box::new(mp)
            }
            MergePolicyType::NoMerge => Box::new(NoMergePolicy::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_default_config() {
        let default = Settings::from_str("").unwrap();
        assert_eq!(default.host, "0.0.0.0");
        assert_eq!(default.port, 8080);
        assert_eq!(default.path, "data/");
        assert_eq!(default.writer_memory, 200_000_000);
        assert_eq!(default.fragment_width, 200);
        assert!(default.autocomplete_filter_by_index);
        assert_eq!(default.index_admin_ip_allow_list, vec!["127.0.0.1", "::1"]);
        assert!(default.efo.stopwords.is_empty());
    }

    #[test]
    fn efo_block_parses() {
        let cfg = r#"
            [efo]
            stopwords = "of,the,in"
            nodes_file = "config/efo.json"
            update_url = "https://example.org/efo.owl""#;
        let config = Settings::from_str(cfg).unwrap();
        assert_eq!(config.efo.stopwords, "of,the,in");
        assert_eq!(config.efo.nodes_file, "config/efo.json");
    }

    #[test]
    fn nomerge_policy() {
        let cfg = r#"
            [merge_policy]
            kind = "nomerge""#;
        let config = Settings::from_str(cfg).unwrap();
        assert!(config.merge_policy.get_kind() == MergePolicyType::NoMerge);
    }
}
