//! `--seed`: load source definitions from a JSON file and register them.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use lexcrawl_shared::{LexCrawlError, Result, SourceConfig, validate_sources};
use lexcrawl_storage::Storage;

/// Contents of a seed file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SeedFile {
    pub sources: Vec<SourceConfig>,
}

/// Read and validate a seed file.
pub fn load_seed_file(path: &Path) -> Result<SeedFile> {
    let content = std::fs::read_to_string(path).map_err(|e| LexCrawlError::io(path, e))?;
    let seed: SeedFile = serde_json::from_str(&content).map_err(|e| {
        LexCrawlError::validation(format!("invalid seed file {}: {e}", path.display()))
    })?;
    validate_sources(&seed.sources)?;
    Ok(seed)
}

/// Load `path` and upsert every source it defines. Returns the number of
/// sources registered.
pub async fn apply_seed(storage: &Storage, path: &Path) -> Result<usize> {
    let seed = load_seed_file(path)?;
    for source in &seed.sources {
        storage.upsert_source(source).await?;
    }
    info!(path = %path.display(), sources = seed.sources.len(), "seed applied");
    Ok(seed.sources.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexcrawl_shared::FetchStrategy;
    use uuid::Uuid;

    fn write_seed(content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("lexcrawl_seed_{}.json", Uuid::now_v7()));
        std::fs::write(&path, content).unwrap();
        path
    }

    const SEED: &str = r#"{
        "sources": [
            {
                "id": "majlis",
                "name": "مرکز پژوهش‌های مجلس",
                "language": "fa",
                "strategy": {
                    "kind": "listing",
                    "listing_url": "https://rc.majlis.example/fa/law",
                    "link_selector": "a.law-link",
                    "next_page_selector": "a.next"
                },
                "rules": { "body": "div.law-content", "strip": [".share"] }
            },
            {
                "id": "dotic",
                "name": "Dotic",
                "active": false,
                "strategy": { "kind": "seed_list", "urls": ["https://dotic.example/law/1"] }
            }
        ]
    }"#;

    #[test]
    fn parses_sources() {
        let seed = load_seed_file(&write_seed(SEED)).unwrap();
        assert_eq!(seed.sources.len(), 2);

        let majlis = &seed.sources[0];
        assert!(majlis.active);
        assert_eq!(majlis.strategy.kind(), "listing");
        assert_eq!(majlis.rules.body.as_deref(), Some("div.law-content"));

        let dotic = &seed.sources[1];
        assert!(!dotic.active);
        assert!(matches!(&dotic.strategy, FetchStrategy::SeedList { urls } if urls.len() == 1));
    }

    #[test]
    fn rejects_malformed_and_invalid_files() {
        let err = load_seed_file(&write_seed("{ not json")).unwrap_err();
        assert_eq!(err.kind(), "validation");

        let duplicate = r#"{ "sources": [
            { "id": "a", "name": "A", "strategy": { "kind": "seed_list", "urls": [] } },
            { "id": "a", "name": "A2", "strategy": { "kind": "seed_list", "urls": [] } }
        ] }"#;
        let err = load_seed_file(&write_seed(duplicate)).unwrap_err();
        assert!(err.to_string().contains("duplicate"));

        let missing = std::env::temp_dir().join("lexcrawl_seed_missing.json");
        assert_eq!(load_seed_file(&missing).unwrap_err().kind(), "io");
    }

    #[tokio::test]
    async fn applying_twice_is_idempotent() {
        let db = std::env::temp_dir().join(format!("lexcrawl_test_{}.db", Uuid::now_v7()));
        let storage = Storage::open(&db).await.unwrap();
        let path = write_seed(SEED);

        assert_eq!(apply_seed(&storage, &path).await.unwrap(), 2);
        assert_eq!(apply_seed(&storage, &path).await.unwrap(), 2);

        assert_eq!(storage.list_sources().await.unwrap().len(), 2);
        let active = storage.list_active_sources().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "majlis");
    }
}
