//! Package index: the catalogue of installable components.
//!
//! The index is a static JSON document read from a local path or fetched over
//! HTTP(S):
//!
//! ```json
//! {
//!   "components": {
//!     "wifi": {
//!       "description": "Wi-Fi driver",
//!       "releases": [
//!         { "version": "1.2.0", "url": "https://host/wifi.git", "rev": "v1.2.0",
//!           "dependencies": { "lwip": "^2" } }
//!       ]
//!     }
//!   }
//! }
//! ```

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::reference::{validate_name, validate_url};

/// Minimum Jaro-Winkler similarity for a "did you mean" suggestion.
const SUGGESTION_THRESHOLD: f64 = 0.8;

/// Errors from loading or querying the index.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("failed to read index {source_name}: {reason}")]
    Unreadable { source_name: String, reason: String },
    #[error("malformed index {source_name}: {reason}")]
    Malformed { source_name: String, reason: String },
    #[error("unknown component '{name}'{}", suggestion_hint(.suggestion))]
    UnknownComponent {
        name: String,
        suggestion: Option<String>,
    },
    #[error("no release of '{name}' matches '{req}'")]
    NoMatchingRelease { name: String, req: String },
}

fn suggestion_hint(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(" (did you mean '{s}'?)"))
        .unwrap_or_default()
}

/// One published release of a component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub version: Version,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default)]
    pub dependencies: BTreeMap<String, VersionReq>,
}

/// A component and its releases.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub releases: Vec<Release>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PackageIndex {
    #[serde(default)]
    pub components: BTreeMap<String, IndexEntry>,
}

impl PackageIndex {
    /// Parse an index document. Component names, dependency names and release
    /// urls must be usable on disk and on an SCM command line.
    pub fn from_json(source_name: &str, json: &str) -> Result<Self, IndexError> {
        let malformed = |reason: String| IndexError::Malformed {
            source_name: source_name.to_string(),
            reason,
        };
        let index: Self = serde_json::from_str(json).map_err(|e| malformed(e.to_string()))?;
        for (name, entry) in &index.components {
            validate_name(name).map_err(|e| malformed(e.to_string()))?;
            for release in &entry.releases {
                validate_url(&release.url).map_err(|e| malformed(e.to_string()))?;
                for dep in release.dependencies.keys() {
                    validate_name(dep).map_err(|e| {
                        malformed(format!("{name} {}: {e}", release.version))
                    })?;
                }
            }
        }
        Ok(index)
    }

    /// Load the index from a file path or an `http(s)://` URL.
    pub fn load(source: &str) -> Result<Self, IndexError> {
        let unreadable = |reason: String| IndexError::Unreadable {
            source_name: source.to_string(),
            reason,
        };

        let json = if source.starts_with("http://") || source.starts_with("https://") {
            tracing::debug!("fetching package index from {}", source);
            let agent = ureq::Agent::new_with_config(
                ureq::config::Config::builder()
                    .timeout_global(Some(std::time::Duration::from_secs(30)))
                    .build(),
            );
            let mut response = agent.get(source).call().map_err(|e| unreadable(e.to_string()))?;
            response
                .body_mut()
                .read_to_string()
                .map_err(|e| unreadable(e.to_string()))?
        } else {
            std::fs::read_to_string(Path::new(source)).map_err(|e| unreadable(e.to_string()))?
        };

        Self::from_json(source, &json)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.contains_key(name)
    }

    /// Closest known component name, if any is similar enough.
    pub fn suggest(&self, name: &str) -> Option<String> {
        self.components
            .keys()
            .map(|k| (k, strsim::jaro_winkler(name, k)))
            .filter(|(_, score)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(k, _)| k.clone())
    }

    /// Highest release of `name` satisfying `req`.
    pub fn select(&self, name: &str, req: &VersionReq) -> Result<&Release, IndexError> {
        let entry = self
            .components
            .get(name)
            .ok_or_else(|| IndexError::UnknownComponent {
                name: name.to_string(),
                suggestion: self.suggest(name),
            })?;
        entry
            .releases
            .iter()
            .filter(|r| req.matches(&r.version))
            .max_by(|a, b| a.version.cmp(&b.version))
            .ok_or_else(|| IndexError::NoMatchingRelease {
                name: name.to_string(),
                req: req.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"{
        "components": {
            "wifi": {
                "description": "Wi-Fi driver",
                "releases": [
                    {"version": "1.0.0", "url": "https://h/wifi.git", "rev": "v1.0.0"},
                    {"version": "1.4.2", "url": "https://h/wifi.git", "rev": "v1.4.2",
                     "dependencies": {"lwip": "^2"}},
                    {"version": "2.0.0", "url": "https://h/wifi.git", "rev": "v2.0.0"}
                ]
            },
            "lwip": {
                "releases": [{"version": "2.1.0", "url": "https://h/lwip.git"}]
            }
        }
    }"#;

    fn index() -> PackageIndex {
        PackageIndex::from_json("test", INDEX).unwrap()
    }

    #[test]
    fn test_select_highest_matching() {
        let idx = index();
        let r = idx.select("wifi", &VersionReq::parse("^1").unwrap()).unwrap();
        assert_eq!(r.version, Version::new(1, 4, 2));
        assert_eq!(r.dependencies.len(), 1);

        let r = idx.select("wifi", &VersionReq::STAR).unwrap();
        assert_eq!(r.version, Version::new(2, 0, 0));
    }

    #[test]
    fn test_select_no_match() {
        let idx = index();
        let err = idx
            .select("wifi", &VersionReq::parse(">=3").unwrap())
            .unwrap_err();
        assert!(matches!(err, IndexError::NoMatchingRelease { .. }));
    }

    #[test]
    fn test_unknown_component_suggests() {
        let idx = index();
        let err = idx.select("wify", &VersionReq::STAR).unwrap_err();
        match err {
            IndexError::UnknownComponent { suggestion, .. } => {
                assert_eq!(suggestion.as_deref(), Some("wifi"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(idx.suggest("zzzzzz").is_none());
    }

    #[test]
    fn test_load_from_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("index.json");
        std::fs::write(&path, INDEX).unwrap();
        let idx = PackageIndex::load(path.to_str().unwrap()).unwrap();
        assert!(idx.contains("lwip"));
        assert!(PackageIndex::load(tmp.path().join("missing.json").to_str().unwrap()).is_err());
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            PackageIndex::from_json("x", "[1,2]"),
            Err(IndexError::Malformed { .. })
        ));
    }

    #[test]
    fn test_rejects_names_that_escape_the_components_dir() {
        let dep = r#"{"components": {"mqtt": {"releases": [
            {"version": "1.0.0", "url": "https://h/mqtt.git", "dependencies": {"../src": "*"}}
        ]}}}"#;
        let err = PackageIndex::from_json("x", dep).unwrap_err();
        assert!(err.to_string().contains("'../src'"));

        let key = r#"{"components": {"..": {"releases": []}}}"#;
        assert!(matches!(
            PackageIndex::from_json("x", key),
            Err(IndexError::Malformed { .. })
        ));

        let url = r#"{"components": {"ble": {"releases": [
            {"version": "1.0.0", "url": "--config=x"}
        ]}}}"#;
        assert!(PackageIndex::from_json("x", url).is_err());
    }
}
