use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::features::{FeatureSet, FeatureSpec, Region};
use crate::fetch::FetchConfig;
use crate::selector::EntryFilter;
use crate::{Config, CoreError, RunMode};

/// On-disk TOML configuration structure.
/// All fields are optional so partial configs work (merge with defaults).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub api_keys: Option<ApiKeysConfig>,
    pub extraction: Option<ExtractionConfig>,
    pub filter: Option<EntryFilter>,
    /// Custom feature set. Replaces the built-in set for its region.
    pub features: Option<Vec<FeatureSpec>>,
    pub fetch: Option<FetchFileConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeysConfig {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub google_access_token: Option<String>,
    pub google_project_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub mode: Option<RunMode>,
    pub region: Option<Region>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: Option<u64>,
    pub min_source_len: Option<usize>,
    pub cache_root: Option<String>,
    pub run_tag: Option<String>,
    pub tag_column: Option<String>,
    pub protected_tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchFileConfig {
    pub output_dir: Option<String>,
    pub num_workers: Option<usize>,
    pub timeout_secs: Option<u64>,
}

/// Platform config directory path: `<config_dir>/enricher/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("enricher").join("config.toml"))
}

/// Load config by cascading CWD `.enricher.toml` over platform config.
/// CWD values override platform values.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".enricher.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load a config from a specific path. Returns `None` if the file doesn't
/// exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "ignoring unparseable config file");
            None
        }
    }
}

/// Merge two configs: `overlay` values take precedence over `base`.
/// `filter` and `features` are replaced whole, never combined.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    ConfigFile {
        api_keys: merge_section(base.api_keys, overlay.api_keys, |b, o| ApiKeysConfig {
            openai_api_key: o.openai_api_key.or(b.openai_api_key),
            openai_base_url: o.openai_base_url.or(b.openai_base_url),
            google_access_token: o.google_access_token.or(b.google_access_token),
            google_project_id: o.google_project_id.or(b.google_project_id),
        }),
        extraction: merge_section(base.extraction, overlay.extraction, |b, o| {
            ExtractionConfig {
                mode: o.mode.or(b.mode),
                region: o.region.or(b.region),
                model: o.model.or(b.model),
                max_tokens: o.max_tokens.or(b.max_tokens),
                request_timeout_secs: o.request_timeout_secs.or(b.request_timeout_secs),
                min_source_len: o.min_source_len.or(b.min_source_len),
                cache_root: o.cache_root.or(b.cache_root),
                run_tag: o.run_tag.or(b.run_tag),
                tag_column: o.tag_column.or(b.tag_column),
                protected_tags: o.protected_tags.or(b.protected_tags),
            }
        }),
        filter: overlay.filter.or(base.filter),
        features: overlay.features.or(base.features),
        fetch: merge_section(base.fetch, overlay.fetch, |b, o| FetchFileConfig {
            output_dir: o.output_dir.or(b.output_dir),
            num_workers: o.num_workers.or(b.num_workers),
            timeout_secs: o.timeout_secs.or(b.timeout_secs),
        }),
    }
}

fn merge_section<T>(base: Option<T>, overlay: Option<T>, f: impl FnOnce(T, T) -> T) -> Option<T> {
    match (base, overlay) {
        (Some(b), Some(o)) => Some(f(b, o)),
        (b, o) => o.or(b),
    }
}

impl ConfigFile {
    /// Apply every value present in the file to `config`.
    ///
    /// A custom feature list decides the region; an explicit `region` that
    /// disagrees with it is an error.
    pub fn apply_to(&self, config: &mut Config) -> Result<(), CoreError> {
        if let Some(ref keys) = self.api_keys {
            if let Some(ref v) = keys.openai_api_key {
                config.openai_api_key = Some(v.clone());
            }
            if let Some(ref v) = keys.openai_base_url {
                config.openai_base_url = v.clone();
            }
            if let Some(ref v) = keys.google_access_token {
                config.google_access_token = Some(v.clone());
            }
            if let Some(ref v) = keys.google_project_id {
                config.google_project_id = Some(v.clone());
            }
        }

        if let Some(ref features) = self.features {
            config.features = FeatureSet::new(features.clone())?;
        }

        if let Some(ref ext) = self.extraction {
            if let Some(mode) = ext.mode {
                config.mode = mode;
            }
            if let Some(region) = ext.region {
                config.set_region(region)?;
            }
            if let Some(ref v) = ext.model {
                config.model = v.clone();
            }
            if ext.max_tokens.is_some() {
                config.max_tokens = ext.max_tokens;
            }
            if let Some(v) = ext.request_timeout_secs {
                config.request_timeout_secs = v;
            }
            if let Some(v) = ext.min_source_len {
                config.min_source_len = v;
            }
            if let Some(ref v) = ext.cache_root {
                config.cache_root = PathBuf::from(v);
            }
            if ext.run_tag.is_some() {
                config.run_tag = ext.run_tag.clone();
            }
            if let Some(ref v) = ext.tag_column {
                config.tag_column = v.clone();
            }
            if let Some(ref v) = ext.protected_tags {
                config.protected_tags = v.clone();
            }
        }

        if let Some(ref filter) = self.filter {
            config.filter = filter.clone();
        }
        Ok(())
    }

    /// Fetch settings with file values over the defaults.
    pub fn fetch_config(&self) -> FetchConfig {
        let mut fetch = FetchConfig::default();
        if let Some(ref f) = self.fetch {
            if let Some(ref dir) = f.output_dir {
                fetch.output_dir = PathBuf::from(dir);
            }
            if let Some(n) = f.num_workers {
                fetch.num_workers = n.max(1);
            }
            if let Some(t) = f.timeout_secs {
                fetch.timeout_secs = t;
            }
        }
        fetch
    }
}
