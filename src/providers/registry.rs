use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::generation::types::GenerationMode;

/// Providers sharing one request/response shape. Only the motion-control
/// family understands supplementary motion sources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    #[default]
    Standard,
    MotionControl,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub family: ProviderFamily,
    #[serde(default)]
    pub image: bool,
    #[serde(default)]
    pub video: bool,
}

impl ProviderSpec {
    pub fn supports(&self, mode: GenerationMode) -> bool {
        match mode {
            GenerationMode::Image => self.image,
            GenerationMode::Video => self.video,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ProvidersFile {
    providers: Vec<ProviderSpec>,
}

#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    providers: Vec<ProviderSpec>,
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::new(default_providers())
    }
}

impl ProviderCatalog {
    pub fn new(providers: Vec<ProviderSpec>) -> Self {
        Self { providers }
    }

    /// Reads `{"providers": [...]}` from `path`, falling back to the built-in
    /// providers when the file is missing or unreadable.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            info!("Provider config not found at {}; using defaults", path.display());
            return Self::default();
        }

        let raw = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                warn!("Failed to read provider config at {}: {}", path.display(), err);
                return Self::default();
            }
        };

        match serde_json::from_str::<ProvidersFile>(&raw) {
            Ok(parsed) if !parsed.providers.is_empty() => {
                info!(
                    "Loaded {} providers from {}",
                    parsed.providers.len(),
                    path.display()
                );
                Self::new(parsed.providers)
            }
            Ok(_) => {
                warn!("Provider config at {} lists no providers; using defaults", path.display());
                Self::default()
            }
            Err(err) => {
                warn!("Failed to parse provider config at {}: {}", path.display(), err);
                Self::default()
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&ProviderSpec> {
        let wanted = id.trim();
        self.providers
            .iter()
            .find(|provider| provider.id.eq_ignore_ascii_case(wanted))
    }

    pub fn list(&self) -> &[ProviderSpec] {
        &self.providers
    }

    pub fn for_mode(&self, mode: GenerationMode) -> Vec<&ProviderSpec> {
        self.providers
            .iter()
            .filter(|provider| provider.supports(mode))
            .collect()
    }
}

fn default_providers() -> Vec<ProviderSpec> {
    vec![
        ProviderSpec {
            id: "still".to_string(),
            name: "Still image".to_string(),
            family: ProviderFamily::Standard,
            image: true,
            video: false,
        },
        ProviderSpec {
            id: "motion".to_string(),
            name: "Video".to_string(),
            family: ProviderFamily::Standard,
            image: false,
            video: true,
        },
        ProviderSpec {
            id: "motion-control".to_string(),
            name: "Video with motion control".to_string(),
            family: ProviderFamily::MotionControl,
            image: false,
            video: true,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn lookup_is_case_insensitive() {
        let catalog = ProviderCatalog::default();
        assert_eq!(catalog.get(" Motion-Control ").unwrap().family, ProviderFamily::MotionControl);
        assert!(catalog.get("missing").is_none());
    }

    #[test]
    fn filters_by_mode() {
        let catalog = ProviderCatalog::default();
        let ids = catalog
            .for_mode(GenerationMode::Video)
            .into_iter()
            .map(|provider| provider.id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(ids, vec!["motion", "motion-control"]);
    }

    #[test]
    fn loads_from_file_and_falls_back() {
        let dir = std::env::temp_dir().join(format!("avatar-studio-providers-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("providers.json");
        let mut file = fs::File::create(&path).unwrap();
        write!(
            file,
            r#"{{"providers":[{{"id":"custom","name":"Custom","family":"motion_control","video":true}}]}}"#
        )
        .unwrap();

        let catalog = ProviderCatalog::load(&path);
        assert_eq!(catalog.list().len(), 1);
        let custom = catalog.get("custom").unwrap();
        assert!(custom.supports(GenerationMode::Video));
        assert!(!custom.supports(GenerationMode::Image));

        let fallback = ProviderCatalog::load(&dir.join("missing.json"));
        assert_eq!(fallback.list().len(), 3);
        let _ = fs::remove_dir_all(&dir);
    }
}
