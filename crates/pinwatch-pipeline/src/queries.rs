//! Search-query registry file. One marketplace search per entry; several
//! phrasings of the same category compensate for weak marketplace search.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRegistry {
    pub queries: Vec<QueryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryConfig {
    pub label: String,
    pub url: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl QueryRegistry {
    pub fn enabled(&self) -> Vec<QueryConfig> {
        self.queries.iter().filter(|q| q.enabled).cloned().collect()
    }
}

pub fn load_query_registry(path: impl AsRef<Path>) -> Result<QueryRegistry> {
    let path = path.as_ref();
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_loads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("queries.yaml");
        std::fs::write(
            &path,
            "queries:\n  - label: flipper\n    url: \"https://www.leboncoin.fr/recherche?text=flipper\"\n",
        )
        .expect("write registry");

        let registry = load_query_registry(&path).unwrap();
        assert_eq!(registry.enabled().len(), 1);

        let err = load_query_registry(dir.path().join("missing.yaml")).unwrap_err();
        assert!(err.to_string().contains("missing.yaml"));
    }

    #[test]
    fn disabled_queries_are_filtered_out() {
        let raw = r#"
queries:
  - label: flipper
    url: "https://www.leboncoin.fr/recherche?text=flipper+-pincab&sort=time"
  - label: pinball
    url: "https://www.leboncoin.fr/recherche?text=pinball&sort=time"
    enabled: false
"#;
        let registry: QueryRegistry = serde_yaml::from_str(raw).unwrap();
        assert_eq!(registry.queries.len(), 2);
        let enabled = registry.enabled();
        assert_eq!(enabled.len(), 1);
        assert_eq!(enabled[0].label, "flipper");
        assert!(enabled[0].url.contains("recherche"));
    }
}
