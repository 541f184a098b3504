// Configuration system integration tests

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tweet_fanout::config::{load_config, ConfigLoader, FanoutConfig};
use tweet_fanout::{join_all, Batch, Media, MediaType, StorageManager, TagSet, Tweet};

#[test]
fn test_load_default_config() {
    let config_path = PathBuf::from("config/default.yaml");

    if config_path.exists() {
        let result = load_config(&config_path);
        assert!(result.is_ok(), "Failed to load default config: {:?}", result.err());

        let config = result.unwrap();
        assert_eq!(config.main_storage, "archive");
        assert_eq!(config.storages.len(), 2);
        assert!(config.media.download_media);
        assert_eq!(config.logging.level, "info");

        let search = config.storage("search").unwrap();
        assert_eq!(search.tags, vec!["news", "politics"]);
        assert!(search.backend_config.as_elasticsearch().is_some());
    }
}

#[test]
fn test_config_with_env_vars() {
    let temp_config = r#"
main_storage: ${FANOUT_TEST_MAIN:-local}

storages:
  - name: local
    backend: filesystem
    filesystem:
      base_path: ${FANOUT_TEST_DIR:-/tmp/fanout}
  - name: es
    backend: elasticsearch
    tags: [news]
    elasticsearch:
      url: ${FANOUT_TEST_ES_URL:-http://default:9200}
      password: ${FANOUT_TEST_PASSWORD}

logging:
  level: debug
"#;

    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, temp_config).unwrap();

    let config = load_config(&config_path).unwrap();

    assert_eq!(config.main_storage, "local");
    let local = config.storage("local").unwrap();
    assert_eq!(
        local.backend_config.as_filesystem().unwrap().base_path,
        "/tmp/fanout"
    );

    let es = config.storage("es").unwrap().backend_config.as_elasticsearch().unwrap();
    assert_eq!(es.url, "http://default:9200");
    // No default and unset: kept verbatim
    assert_eq!(es.password.as_deref(), Some("${FANOUT_TEST_PASSWORD}"));
    assert_eq!(es.timeout_seconds, 60);
    assert_eq!(es.max_retries, 3);
    assert_eq!(config.logging.level, "debug");
}

#[test]
fn test_config_rejects_unknown_main_storage() {
    let result = ConfigLoader::parse(
        r#"
main_storage: nowhere
storages:
  - name: local
    backend: memory
"#,
    );
    let message = format!("{:#}", result.err().unwrap());
    assert!(message.contains("nowhere"), "{}", message);
}

#[test]
fn test_config_rejects_duplicate_names() {
    let result = ConfigLoader::parse(
        r#"
main_storage: local
storages:
  - name: local
    backend: memory
  - name: local
    backend: memory
"#,
    );
    assert!(result.err().unwrap().to_string().contains("unique"));
}

#[test]
fn test_config_rejects_missing_backend_section() {
    let result = ConfigLoader::parse(
        r#"
main_storage: local
storages:
  - name: local
    backend: filesystem
"#,
    );
    assert!(result.err().unwrap().to_string().contains("config missing"));
}

#[test]
fn test_config_rejects_threshold_above_hash_width() {
    let result = ConfigLoader::parse(
        r#"
main_storage: local
storages:
  - name: local
    backend: memory
media:
  average_hash: true
  near_duplicate_threshold: 65
"#,
    );
    assert!(result.is_err());
}

fn filesystem_config(root: &std::path::Path) -> FanoutConfig {
    ConfigLoader::parse(&format!(
        r#"
main_storage: archive
storages:
  - name: archive
    backend: filesystem
    tags: [archive]
    filesystem:
      base_path: {archive}
  - name: news
    backend: filesystem
    tags: [news]
    filesystem:
      base_path: {news}
media:
  download_media: true
"#,
        archive = root.join("archive").display(),
        news = root.join("news").display(),
    ))
    .unwrap()
}

#[tokio::test]
async fn test_manager_from_filesystem_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = filesystem_config(temp_dir.path());

    let manager = StorageManager::from_config(&config).await.unwrap();
    assert_eq!(manager.main_storage().name(), "archive");
    assert_eq!(manager.registry().names(), vec!["archive", "news"]);

    let summary = manager.to_string();
    assert!(summary.contains("archive (main) listening to [archive]"));
    assert!(summary.contains("news listening to [news]"));
    assert!(summary.contains("Media always stored at: archive"));

    let mut batch = Batch::new();
    batch
        .add_tweets([Tweet::new("100", "breaking news")])
        .add_media([Media::new("3_100", MediaType::Photo)]);

    let news_tags: TagSet = ["news"].into_iter().collect();
    let outcomes = join_all(manager.save_bulk(batch, &news_tags)).await;
    // Tweets and media to news, media forwarded to archive
    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(|o| o.is_ok()));

    let news_root = temp_dir.path().join("news");
    let archive_root = temp_dir.path().join("archive");
    assert!(news_root.join("tweets/100.json").exists());
    assert!(news_root.join("media/3_100.json").exists());
    assert!(!archive_root.join("tweets/100.json").exists());
    assert!(archive_root.join("media/3_100.json").exists());

    let free: Vec<bool> = manager.free_space_report().into_iter().map(|(_, f)| f).collect();
    assert_eq!(free, vec![true, true]);

    let health = manager.health_report().await;
    assert!(health.iter().all(|(_, healthy)| *healthy));
}

#[tokio::test]
async fn test_manager_main_storage_survives_removal() {
    let temp_dir = TempDir::new().unwrap();
    let config = filesystem_config(temp_dir.path());
    let manager = StorageManager::from_config(&config).await.unwrap();

    manager.remove_all_storages();
    assert!(manager.registry().is_empty());

    let main = Arc::clone(manager.main_storage());
    assert_eq!(main.name(), "archive");

    // Media still reach the main storage when download is on
    let outcomes = join_all(manager.save_media(
        vec![Media::new("3_7", MediaType::Photo)],
        &TagSet::new(),
    ))
    .await;
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes[0].is_ok());
    assert!(temp_dir.path().join("archive/media/3_7.json").exists());
}
