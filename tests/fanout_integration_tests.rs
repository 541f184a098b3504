// Fan-out integration tests: routing, isolation and media guarantees

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tweet_fanout::storage::MemoryBackend;
use tweet_fanout::{
    join_all, Batch, ManagerOptions, Media, MediaType, RecordKind, StorageError, StorageManager,
    TagSet, Tweet, User,
};

fn tags(values: &[&str]) -> TagSet {
    values.iter().copied().collect()
}

fn backend_names(outcomes: &[tweet_fanout::WriteOutcome]) -> Vec<String> {
    outcomes.iter().map(|o| o.backend.clone()).collect()
}

fn png_payload(dark_left: bool) -> Vec<u8> {
    use image::{DynamicImage, ImageFormat, RgbImage};
    let img = RgbImage::from_fn(32, 32, |x, _| {
        let dark = (x < 16) == dark_left;
        let v = if dark { 0 } else { 255 };
        image::Rgb([v, v, v])
    });
    let mut out = std::io::Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

#[tokio::test]
async fn test_end_to_end_tag_routing() {
    let a = Arc::new(MemoryBackend::new("A"));
    let b = Arc::new(MemoryBackend::new("B"));
    let manager = StorageManager::new(b.clone(), TagSet::new(), ManagerOptions::default());
    manager.add_storage(a.clone(), tags(&["news"])).unwrap();

    let sports = manager.save_tweets(
        vec![Tweet::new("t1", "goal"), Tweet::new("t2", "match")],
        &tags(&["sports"]),
    );
    assert_eq!(backend_names(&join_all(sports).await), vec!["B"]);

    let news = manager.save_tweets(vec![Tweet::new("t3", "election")], &tags(&["news"]));
    let outcomes = join_all(news).await;
    let mut names = backend_names(&outcomes);
    names.sort();
    assert_eq!(names, vec!["A", "B"]);
    assert!(outcomes.iter().all(|o| o.is_ok()));

    assert_eq!(b.tweets().len(), 3);
    let a_ids: Vec<String> = a.tweets().into_iter().map(|t| t.id).collect();
    assert_eq!(a_ids, vec!["t3"]);
}

#[tokio::test]
async fn test_failing_backend_is_isolated() {
    let main = Arc::new(MemoryBackend::new("main"));
    let good = Arc::new(MemoryBackend::new("good"));
    let bad = Arc::new(MemoryBackend::new("bad"));
    bad.fail_on(RecordKind::Tweets);

    let manager = StorageManager::new(main.clone(), TagSet::new(), ManagerOptions::default());
    manager.add_storage(good.clone(), TagSet::new()).unwrap();
    manager.add_storage(bad.clone(), TagSet::new()).unwrap();

    let outcomes = join_all(manager.save_tweets(vec![Tweet::new("1", "x")], &TagSet::new())).await;
    assert_eq!(outcomes.len(), 3);

    for outcome in &outcomes {
        if outcome.backend == "bad" {
            match &outcome.result {
                Err(StorageError::BackendWrite { backend, kind, .. }) => {
                    assert_eq!(backend, "bad");
                    assert_eq!(*kind, RecordKind::Tweets);
                }
                other => panic!("expected a write error, got {:?}", other),
            }
        } else {
            assert!(outcome.is_ok(), "{} failed", outcome.backend);
        }
    }

    // Other kinds still reach the failing backend
    let users = join_all(manager.save_users(vec![User::new("u1", "alice")], &TagSet::new())).await;
    assert!(users.iter().all(|o| o.is_ok()));
    assert_eq!(bad.users().len(), 1);
    assert_eq!(good.tweets().len(), 1);
    assert_eq!(main.tweets().len(), 1);
}

#[tokio::test]
async fn test_failure_sink_reports_fire_and_forget_writes() {
    let main = Arc::new(MemoryBackend::new("main"));
    let bad = Arc::new(MemoryBackend::new("bad"));
    bad.fail_on(RecordKind::Places);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let manager = StorageManager::new(main, TagSet::new(), ManagerOptions::default())
        .with_failure_sink(tx);
    manager.add_storage(bad, TagSet::new()).unwrap();

    // Handles dropped on purpose
    drop(manager.save_places(
        vec![tweet_fanout::Place {
            id: "p1".to_string(),
            full_name: "Paris, France".to_string(),
            country: Some("France".to_string()),
            country_code: Some("FR".to_string()),
            place_type: Some("city".to_string()),
        }],
        &TagSet::new(),
    ));

    let failure = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no failure reported")
        .unwrap();
    assert_eq!(failure.backend(), Some("bad"));
    assert!(matches!(failure, StorageError::BackendWrite { kind: RecordKind::Places, .. }));
}

#[tokio::test]
async fn test_media_download_guarantee() {
    let main = Arc::new(MemoryBackend::new("main"));
    let es = Arc::new(MemoryBackend::new("es"));
    let manager = StorageManager::new(
        main.clone(),
        tags(&["archive"]),
        ManagerOptions {
            download_media: true,
            ..Default::default()
        },
    );
    manager.add_storage(es.clone(), tags(&["cats"])).unwrap();

    let media = vec![Media::new("3_1", MediaType::Photo).with_url("https://pbs.twimg.com/media/1.jpg")];
    let outcomes = join_all(manager.save_media(media.clone(), &tags(&["cats"]))).await;

    assert_eq!(backend_names(&outcomes), vec!["es", "main"]);
    assert!(outcomes.iter().all(|o| o.kind == RecordKind::Media && o.is_ok()));
    assert_eq!(main.media().len(), 1);

    // Non-media kinds stay tag routed
    let tweets = join_all(manager.save_tweets(vec![Tweet::new("1", "meow")], &tags(&["cats"]))).await;
    assert_eq!(backend_names(&tweets), vec!["es"]);

    // Without download, the main storage is skipped
    let no_download = StorageManager::new(main.clone(), tags(&["archive"]), ManagerOptions::default());
    no_download.add_storage(es, tags(&["cats"])).unwrap();
    let outcomes = join_all(no_download.save_media(media, &tags(&["cats"]))).await;
    assert_eq!(backend_names(&outcomes), vec!["es"]);
}

#[tokio::test]
async fn test_main_storage_not_written_twice_when_matching() {
    let main = Arc::new(MemoryBackend::new("main"));
    let manager = StorageManager::new(
        main.clone(),
        TagSet::new(),
        ManagerOptions {
            download_media: true,
            ..Default::default()
        },
    );

    let media = vec![Media::new("3_1", MediaType::Photo)];
    let outcomes = join_all(manager.save_media(media, &tags(&["cats"]))).await;
    assert_eq!(backend_names(&outcomes), vec!["main"]);
}

#[tokio::test]
async fn test_save_bulk_one_write_per_kind() {
    let main = Arc::new(MemoryBackend::new("main"));
    let es = Arc::new(MemoryBackend::new("es"));
    let manager = StorageManager::new(
        main.clone(),
        tags(&["archive"]),
        ManagerOptions {
            download_media: true,
            ..Default::default()
        },
    );
    manager.add_storage(es.clone(), tags(&["news"])).unwrap();

    let mut batch = Batch::new();
    batch
        .add_tweets([Tweet::new("1", "a"), Tweet::new("2", "b")])
        .add_users([User::new("u1", "alice")])
        .add_media([Media::new("3_1", MediaType::Photo)]);

    let outcomes = join_all(manager.save_bulk(batch, &tags(&["news"]))).await;
    let summary: Vec<(String, RecordKind)> =
        outcomes.iter().map(|o| (o.backend.clone(), o.kind)).collect();
    assert_eq!(
        summary,
        vec![
            ("es".to_string(), RecordKind::Tweets),
            ("es".to_string(), RecordKind::Users),
            ("es".to_string(), RecordKind::Media),
            ("main".to_string(), RecordKind::Media)
        ]
    );

    assert_eq!(es.tweets().len(), 2);
    assert_eq!(es.users().len(), 1);
    assert!(main.tweets().is_empty());
    assert_eq!(main.media().len(), 1);
}

#[tokio::test]
async fn test_save_bulk_tweet_failure_keeps_other_kinds() {
    let main = Arc::new(MemoryBackend::new("main"));
    main.fail_on(RecordKind::Tweets);
    let manager = StorageManager::new(main.clone(), TagSet::new(), ManagerOptions::default());

    let mut batch = Batch::new();
    batch
        .add_tweets([Tweet::new("1", "a")])
        .add_users([User::new("u1", "alice")]);

    let outcomes = join_all(manager.save_bulk(batch, &TagSet::new())).await;
    let summary: Vec<(RecordKind, bool)> = outcomes.iter().map(|o| (o.kind, o.is_ok())).collect();
    assert_eq!(
        summary,
        vec![(RecordKind::Tweets, false), (RecordKind::Users, true)]
    );
    assert!(main.tweets().is_empty());
    assert_eq!(main.users().len(), 1);
}

#[tokio::test]
async fn test_removing_backend_mid_flight() {
    let main = Arc::new(MemoryBackend::new("main"));
    let slow = Arc::new(MemoryBackend::new("slow").with_delay(Duration::from_millis(200)));
    let manager = StorageManager::new(main, tags(&["other"]), ManagerOptions::default());
    manager.add_storage(slow.clone(), tags(&["news"])).unwrap();

    let pending = manager.save_tweets(vec![Tweet::new("1", "breaking")], &tags(&["news"]));
    assert_eq!(pending.len(), 1);
    assert!(!pending[0].is_finished());

    assert_eq!(manager.remove_storages(&["slow"]), vec!["slow"]);
    assert!(manager
        .save_tweets(vec![Tweet::new("2", "later")], &tags(&["news"]))
        .is_empty());

    let outcomes = join_all(pending).await;
    assert!(outcomes[0].is_ok());
    let ids: Vec<String> = slow.tweets().into_iter().map(|t| t.id).collect();
    assert_eq!(ids, vec!["1"]);
}

#[tokio::test]
async fn test_aborted_write_reports_abort() {
    let main = Arc::new(MemoryBackend::new("main").with_delay(Duration::from_secs(30)));
    let manager = StorageManager::new(main.clone(), TagSet::new(), ManagerOptions::default());

    let mut pending = manager.save_tweets(vec![Tweet::new("1", "x")], &TagSet::new());
    let write = pending.remove(0);
    write.abort();

    let result = write.wait().await;
    assert!(matches!(result, Err(StorageError::Aborted { ref backend, .. }) if backend == "main"));
    assert!(main.tweets().is_empty());
}

#[tokio::test]
async fn test_media_signatures_recorded_in_main_storage() {
    let main = Arc::new(MemoryBackend::new("main"));
    let manager = StorageManager::new(
        main.clone(),
        TagSet::new(),
        ManagerOptions {
            average_hash: true,
            ..Default::default()
        },
    );

    let media = vec![
        Media::new("3_1", MediaType::Photo).with_payload(png_payload(true)),
        Media::new("3_2", MediaType::Photo).with_payload(png_payload(true)),
        Media::new("7_1", MediaType::Video).with_payload(b"mp4 bytes".to_vec()),
    ];
    let outcomes = join_all(manager.save_media(media, &TagSet::new())).await;

    let kinds: Vec<RecordKind> = outcomes.iter().map(|o| o.kind).collect();
    assert_eq!(
        kinds,
        vec![RecordKind::Media, RecordKind::MediaLink, RecordKind::MediaLink]
    );
    assert!(outcomes.iter().all(|o| o.is_ok()));

    let stored = main.media();
    let first = stored.iter().find(|m| m.media_key == "3_1").unwrap();
    let second = stored.iter().find(|m| m.media_key == "3_2").unwrap();
    let video = stored.iter().find(|m| m.media_key == "7_1").unwrap();
    assert!(first.average_signature.is_some());
    assert_eq!(first.average_signature, second.average_signature);
    assert_eq!(first.content_signature, second.content_signature);
    assert!(video.average_signature.is_none());

    // Duplicates are advisory: both media were saved and linked
    let links = main.media_links();
    assert_eq!(links.len(), 2);
    let dedup = manager.deduplicator().unwrap();
    assert_eq!(dedup.known_links().len(), 2);
}

#[tokio::test]
async fn test_save_error_ignores_tags_and_registry() {
    let main = Arc::new(MemoryBackend::new("main"));
    let manager = StorageManager::new(main.clone(), tags(&["news"]), ManagerOptions::default());
    manager.remove_all_storages();
    assert!(manager.get_storages().is_empty());

    let pending = manager.save_error(tweet_fanout::ErrorRecord::new("searcher", "rate limited"));
    pending.wait().await.unwrap();
    assert_eq!(main.errors()[0].message, "rate limited");
}

#[tokio::test]
async fn test_identical_photos_reported_without_waiting() {
    let main = Arc::new(MemoryBackend::new("main"));
    let manager = StorageManager::new(
        main.clone(),
        TagSet::new(),
        ManagerOptions {
            average_hash: true,
            ..Default::default()
        },
    );

    let first_call = manager.save_media(
        vec![
            Media::new("3_1", MediaType::Photo).with_payload(png_payload(false)),
            Media::new("3_2", MediaType::Photo).with_payload(png_payload(false)),
        ],
        &TagSet::new(),
    );
    // Index is up to date before any write has run
    assert_eq!(manager.deduplicator().unwrap().known_links().len(), 2);

    let second_call = manager.save_media(
        vec![Media::new("3_3", MediaType::Photo).with_payload(png_payload(false))],
        &TagSet::new(),
    );
    assert_eq!(manager.deduplicator().unwrap().known_links().len(), 3);

    let mut outcomes = join_all(first_call).await;
    outcomes.extend(join_all(second_call).await);
    assert!(outcomes.iter().all(|o| o.is_ok()));

    let stored = main.media();
    let duplicate_of = |key: &str| {
        stored
            .iter()
            .find(|m| m.media_key == key)
            .and_then(|m| m.duplicate_of.clone())
    };
    assert_eq!(duplicate_of("3_1"), None);
    assert_eq!(duplicate_of("3_2").as_deref(), Some("3_1"));
    assert_eq!(duplicate_of("3_3").as_deref(), Some("3_1"));
    assert_eq!(main.media_links().len(), 3);
}
