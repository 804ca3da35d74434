use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use tracing::{info, warn};

use crate::contamination::TermCatalog;
use crate::generation::builder::ASPECT_RATIO_OPTIONS;
use crate::providers::ProviderCatalog;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub log_dir: PathBuf,
    pub provider_base_url: String,
    pub provider_api_key: String,
    pub default_provider: String,
    pub default_aspect_ratio: String,
    pub image_max_dimension: u32,
    pub image_jpeg_quality: u8,
    pub storage_base_url: String,
    pub term_catalog_path: Option<PathBuf>,
    pub providers_config_path: PathBuf,
    pub providers: ProviderCatalog,
    pub term_catalog: TermCatalog,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_u32(name: &str, default: u32) -> u32 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_u8(name: &str, default: u8) -> u8 {
    env::var(name)
        .ok()
        .and_then(|value| value.trim().parse::<u8>().ok())
        .unwrap_or(default)
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(|value| resolve_relative(PathBuf::from(value)))
}

fn resolve_relative(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

fn normalize_aspect_ratio(value: String) -> String {
    let trimmed = value.trim();
    if ASPECT_RATIO_OPTIONS.contains(&trimmed) {
        return trimmed.to_string();
    }
    warn!(
        "Unknown DEFAULT_ASPECT_RATIO value '{}'; defaulting to 1:1.",
        value
    );
    "1:1".to_string()
}

/// `LOG_LEVEL` and `LOG_DIR`, readable before logging (and `CONFIG`) is
/// initialised.
pub fn logging_settings() -> (String, PathBuf) {
    (
        env_string("LOG_LEVEL", "info").to_lowercase(),
        PathBuf::from(env_string("LOG_DIR", "logs")),
    )
}

/// Built-in rules plus the optional YAML rules file.
pub fn load_term_catalog(path: Option<&Path>) -> Result<TermCatalog> {
    let mut catalog = TermCatalog::builtin().clone();
    let Some(path) = path else {
        return Ok(catalog);
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read term catalog at {}", path.display()))?;
    let extra = TermCatalog::from_yaml(&raw)
        .with_context(|| format!("Invalid term catalog at {}", path.display()))?;
    info!(
        "Loaded {} extra term rule(s) from {}",
        extra.rules().len(),
        path.display()
    );
    catalog.extend(extra);
    Ok(catalog)
}

impl Config {
    pub fn load() -> Result<Self> {
        let providers_config_path =
            env_path("PROVIDERS_CONFIG_PATH").unwrap_or_else(|| PathBuf::from("providers.json"));
        let providers = ProviderCatalog::load(&providers_config_path);

        let default_provider = env_string("DEFAULT_PROVIDER", "still").trim().to_string();
        if providers.get(&default_provider).is_none() {
            warn!(
                "DEFAULT_PROVIDER '{}' is not in the provider catalog",
                default_provider
            );
        }

        let term_catalog_path = env_path("TERM_CATALOG_PATH");
        let term_catalog = load_term_catalog(term_catalog_path.as_deref())?;

        let (log_level, log_dir) = logging_settings();

        Ok(Config {
            log_level,
            log_dir,
            provider_base_url: env_string("PROVIDER_BASE_URL", ""),
            provider_api_key: env_string("PROVIDER_API_KEY", ""),
            default_provider,
            default_aspect_ratio: normalize_aspect_ratio(env_string("DEFAULT_ASPECT_RATIO", "1:1")),
            image_max_dimension: env_u32("IMAGE_MAX_DIMENSION", 1024),
            image_jpeg_quality: env_u8("IMAGE_JPEG_QUALITY", 85),
            storage_base_url: env_string("STORAGE_BASE_URL", ""),
            term_catalog_path,
            providers_config_path,
            providers,
            term_catalog,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contamination::{detect_with, TermCategory};

    #[test]
    fn unknown_aspect_ratio_falls_back_to_square() {
        assert_eq!(normalize_aspect_ratio(" 16:9 ".to_string()), "16:9");
        assert_eq!(normalize_aspect_ratio("7:5".to_string()), "1:1");
    }

    #[test]
    fn term_catalog_file_extends_builtin_rules() {
        let dir = env::temp_dir().join(format!("studio-terms-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("terms.yaml");
        fs::write(
            &path,
            "version: extra\nrules:\n  - category: hair\n    pattern: '\\bmohawk\\b'\n",
        )
        .unwrap();

        let catalog = load_term_catalog(Some(&path)).unwrap();
        assert!(catalog.version.ends_with("+extra"));
        let terms = detect_with(&catalog, "punk with a Mohawk and blue eyes");
        assert!(terms
            .iter()
            .any(|term| term.term == "Mohawk" && term.category == TermCategory::Hair));
        assert!(terms.iter().any(|term| term.category == TermCategory::Eyes));

        fs::write(&path, "rules: [").unwrap();
        assert!(load_term_catalog(Some(&path)).is_err());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn logging_settings_match_loaded_config() {
        let (log_level, log_dir) = logging_settings();
        let config = Config::load().unwrap();
        assert_eq!(config.log_level, log_level);
        assert_eq!(config.log_dir, log_dir);
        assert_eq!(log_level, log_level.to_lowercase());
    }

    #[test]
    fn missing_term_catalog_path_uses_builtin() {
        let catalog = load_term_catalog(None).unwrap();
        assert_eq!(catalog.version, TermCatalog::builtin().version);
    }
}
