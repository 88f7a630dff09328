//! Bootstrap ordering, per-entry subsystem selection and cache backends.

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{free_port, local_settings, project_root, start_fake_redis};
use socle::cache::{CacheError, CacheHandle, RedisPool, COMPACTION_JOB};
use socle::config::schema::{DatabaseKind, RedisConfig};
use socle::config::{CacheBackend, SessionBackend};
use socle::runtime::Subsystem;
use socle::session::SWEEP_JOB;
use socle::{EntryRole, InitError, Settings, Socle};

fn sqlite_store(settings: &mut Settings) {
    settings.store.enabled = true;
    settings.database.kind = Some(DatabaseKind::Sqlite);
    settings.database.name = "data/app.db".into();
}

#[tokio::test]
async fn test_cli_never_opens_database() {
    let root = project_root();
    let mut settings = local_settings();
    sqlite_store(&mut settings);

    let cli = Socle::initialize(root.path(), EntryRole::Cli, settings.clone())
        .await
        .unwrap();
    assert!(cli.database.is_none());
    assert!(cli.server.is_none());
    assert!(cli.sessions.is_none());
    assert!(cli.render.is_none());
    assert!(!root.path().join("data/app.db").exists());
    cli.close().await;

    let web = Socle::initialize(root.path(), EntryRole::Web, settings)
        .await
        .unwrap();
    let db = web.database.clone().expect("web opens the store");
    assert_eq!(db.kind(), DatabaseKind::Sqlite);
    db.ping().await.unwrap();
    assert!(root.path().join("data/app.db").exists());
    web.close().await;
    assert!(db.is_closed());
}

#[tokio::test]
async fn test_store_disabled_skips_persistence() {
    let root = project_root();
    let mut settings = local_settings();
    settings.database.kind = Some(DatabaseKind::Sqlite);

    let socle = Socle::initialize(root.path(), EntryRole::Api, settings)
        .await
        .unwrap();
    assert!(socle.database.is_none());
    assert!(socle.resource_names().iter().all(|name| *name != "database"));
    socle.close().await;
}

#[tokio::test]
async fn test_embedded_cache_registers_one_compaction_job() {
    let root = project_root();
    let mut settings = local_settings();
    settings.cache.backend = CacheBackend::Embedded;
    settings.cache.embedded.compaction_schedule = "@every 30m".into();

    let socle = Socle::initialize(root.path(), EntryRole::Worker, settings)
        .await
        .unwrap();
    assert_eq!(socle.cache.kind(), CacheBackend::Embedded);
    assert_eq!(socle.scheduler.job_names(), vec![COMPACTION_JOB.to_string()]);

    socle.cache.set("greeting", b"hello", None).await.unwrap();
    assert_eq!(socle.cache.get("greeting").await.unwrap().as_deref(), Some(&b"hello"[..]));
    assert!(root.path().join("tmp/embedded").is_dir());
    socle.close().await;
}

#[tokio::test]
async fn test_distributed_cache_uses_pool_without_jobs() {
    let redis = start_fake_redis().await;
    let root = project_root();
    let mut settings = local_settings();
    settings.cache.backend = CacheBackend::Distributed;
    settings.cache.redis.address = redis.address();
    settings.cache.redis.prefix = "app:".into();

    let socle = Socle::initialize(root.path(), EntryRole::Api, settings)
        .await
        .unwrap();
    assert_eq!(socle.cache.kind(), CacheBackend::Distributed);
    assert_eq!(socle.scheduler.job_count(), 0);

    socle.cache.set("k", b"v", Some(Duration::from_secs(60))).await.unwrap();
    assert!(socle.cache.has("k").await.unwrap());
    assert_eq!(socle.cache.get("k").await.unwrap(), Some(b"v".to_vec()));
    socle.cache.delete("k").await.unwrap();
    assert!(!socle.cache.has("k").await.unwrap());

    assert_eq!(socle.resource_names(), vec!["cache"]);
    socle.close().await;
}

#[tokio::test]
async fn test_no_cache_backend_is_disabled() {
    let root = project_root();
    let socle = Socle::initialize(root.path(), EntryRole::Api, local_settings())
        .await
        .unwrap();
    assert!(matches!(socle.cache, CacheHandle::Disabled));
    assert_eq!(socle.cache.get("anything").await.unwrap(), None);
    assert_eq!(socle.scheduler.job_count(), 0);
    socle.close().await;
}

#[tokio::test]
async fn test_unreachable_cache_fails_bootstrap() {
    let root = project_root();
    let mut settings = local_settings();
    settings.cache.backend = CacheBackend::Distributed;
    settings.cache.redis.address = format!("127.0.0.1:{}", free_port());
    settings.cache.redis.connect_timeout_secs = 1;

    let err = Socle::initialize(root.path(), EntryRole::Api, settings)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        InitError::Connect {
            subsystem: Subsystem::Cache,
            ..
        }
    ));
}

#[tokio::test]
async fn test_relational_sessions_without_store_fail() {
    let root = project_root();
    let mut settings = local_settings();
    settings.session.backend = SessionBackend::Relational;

    let err = Socle::initialize(root.path(), EntryRole::Web, settings)
        .await
        .unwrap_err();
    assert!(matches!(err, InitError::Config { .. }));
    assert_eq!(err.subsystem(), Subsystem::Settings);
}

#[tokio::test]
async fn test_relational_sessions_share_the_store() {
    let root = project_root();
    let mut settings = local_settings();
    sqlite_store(&mut settings);
    settings.session.backend = SessionBackend::Relational;

    let socle = Socle::initialize(root.path(), EntryRole::Web, settings)
        .await
        .unwrap();
    let sessions = socle.sessions.clone().unwrap();
    assert_eq!(sessions.store().name(), "database");

    let session = sessions.load(None).await.unwrap();
    session.insert("user", 42).unwrap();
    let cookie = sessions.commit(&session).await.unwrap().unwrap();
    assert!(cookie.starts_with("socle_session="));

    let token = session.token();
    let loaded = sessions.load(Some(token.as_str())).await.unwrap();
    assert!(!loaded.is_new());
    assert_eq!(loaded.get::<i64>("user"), Some(42));
    socle.close().await;
}

#[tokio::test]
async fn test_cookie_sessions_register_sweep_job() {
    let root = project_root();
    let web = Socle::initialize(root.path(), EntryRole::Web, local_settings())
        .await
        .unwrap();
    assert_eq!(web.sessions.as_ref().unwrap().store().name(), "cookie");
    assert_eq!(web.scheduler.job_names(), vec![SWEEP_JOB.to_string()]);
    web.close().await;

    let api = Socle::initialize(root.path(), EntryRole::Api, local_settings())
        .await
        .unwrap();
    assert_eq!(api.scheduler.job_count(), 0);
    api.close().await;
}

#[tokio::test]
async fn test_disabled_entry_is_rejected() {
    let root = project_root();
    let mut settings = local_settings();
    settings.entries.api.enabled = false;

    let err = Socle::initialize(root.path(), EntryRole::Api, settings)
        .await
        .unwrap_err();
    assert_eq!(err.subsystem(), Subsystem::Settings);
}

#[tokio::test]
async fn test_teardown_follows_acquisition_order() {
    let redis = start_fake_redis().await;
    let root = project_root();
    let mut settings = local_settings();
    sqlite_store(&mut settings);
    settings.session.backend = SessionBackend::Distributed;
    settings.cache.redis.address = redis.address();

    let socle = Socle::initialize(root.path(), EntryRole::Web, settings)
        .await
        .unwrap();
    // Sessions need the pool even though the cache backend is none.
    assert!(matches!(socle.cache, CacheHandle::Disabled));
    assert_eq!(socle.sessions.as_ref().unwrap().store().name(), "cache");
    assert_eq!(socle.resource_names(), vec!["database", "cache pool", "cache"]);

    let db = socle.database.clone().unwrap();
    socle.close().await;
    assert!(db.is_closed());
}

#[tokio::test]
async fn test_render_engine_follows_entry() {
    let root = project_root();
    let web = Socle::initialize(root.path(), EntryRole::Web, local_settings())
        .await
        .unwrap();
    let api = Socle::initialize(root.path(), EntryRole::Api, local_settings())
        .await
        .unwrap();
    let worker = Socle::initialize(root.path(), EntryRole::Worker, local_settings())
        .await
        .unwrap();

    let data = serde_json::json!({ "app_name": "testapp" });
    let html = web.render.as_ref().unwrap().render("home", &data, None).await.unwrap();
    assert_eq!(html.body, "<h1>testapp</h1>");
    let json = api.render.as_ref().unwrap().render("home", &data, None).await.unwrap();
    assert!(json.content_type.starts_with("application/json"));
    assert!(worker.render.is_none());

    web.close().await;
    api.close().await;
    worker.close().await;
}

#[tokio::test]
async fn test_pool_is_bounded() {
    let redis = start_fake_redis().await;
    let pool = RedisPool::new(RedisConfig {
        address: redis.address(),
        max_active: 1,
        max_idle: 1,
        ..RedisConfig::default()
    });

    let held = pool.get().await.unwrap();
    assert!(matches!(pool.get().await, Err(CacheError::PoolExhausted)));
    drop(held);

    let _again = pool.get().await.unwrap();
    assert_eq!(redis.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_dead_idle_connection_surfaces_error() {
    let redis = start_fake_redis().await;
    let pool = RedisPool::new(RedisConfig {
        address: redis.address(),
        ..RedisConfig::default()
    });

    drop(pool.get().await.unwrap());
    assert_eq!(pool.idle_count(), 1);

    redis.drop_connections.store(true, Ordering::SeqCst);
    assert!(pool.get().await.is_err());
    assert_eq!(pool.idle_count(), 0);

    pool.close().unwrap();
    assert!(matches!(pool.close(), Err(CacheError::PoolClosed)));
    assert!(matches!(pool.get().await, Err(CacheError::PoolClosed)));
}
