//! Integration tests for startup synchronization.

mod common;

use std::sync::Arc;
use std::time::Duration;

use agentsdk_agent::cache::store::CacheStore;
use agentsdk_agent::cache::ResourceCache;
use agentsdk_agent::catchup::CatchUpSync;
use agentsdk_agent::config::{Config, EventMode};
use agentsdk_agent::error::AgentError;
use agentsdk_agent::healthcheck::HealthStatus;
use agentsdk_agent::migrate::MigrateAll;
use agentsdk_agent::sync::{EventSync, SOURCE_HEALTH_ENDPOINT};
use agentsdk_agent::AgentContext;
use agentsdk_events::{EventType, SequenceProvider};
use agentsdk_resource::KnownKind;

use common::{event, service, test_config, test_context, FakeCentral, FakeHarvester};

fn event_sync(ctx: &AgentContext, harvester: Arc<FakeHarvester>) -> Arc<EventSync> {
    let catch_up = CatchUpSync::new(ctx, MigrateAll::new());
    Arc::new(EventSync::new(ctx, harvester, catch_up))
}

/// Central with two services and a log whose newest event touches the second.
fn seeded() -> (Arc<FakeCentral>, Arc<FakeHarvester>) {
    let central = FakeCentral::new();
    let first = service("petstore", "api-1", None);
    let second = service("weather", "api-2", None);
    central.insert(first.clone());
    central.insert(second.clone());

    let harvester = FakeHarvester::new();
    harvester.push(event(1, EventType::Created, first.clone()));
    harvester.push(event(2, EventType::Updated, first));
    harvester.push(event(3, EventType::Created, second));
    (central, harvester)
}

fn persisted_context(config: Config, central: Arc<FakeCentral>, path: &std::path::Path) -> AgentContext {
    let store = CacheStore::open(path).unwrap();
    let cache = Arc::new(ResourceCache::with_store(config.watch_topic_name(), store).unwrap());
    AgentContext::new(config, cache, central)
}

#[tokio::test]
async fn test_init_cache_positions_before_latest() {
    let (central, harvester) = seeded();
    let ctx = test_context(test_config(), central);

    event_sync(&ctx, harvester.clone()).init_cache().await.unwrap();

    assert_eq!(ctx.cache.get_sequence(), 2);
    assert_eq!(ctx.cache.count(KnownKind::ApiService).await, 2);
    assert_eq!(harvester.requests(), vec![0]);
}

#[tokio::test]
async fn test_init_cache_failure_flushes() {
    let (central, harvester) = seeded();
    central.fail_list(KnownKind::ApiService);
    let ctx = test_context(test_config(), central);
    ctx.cache.add(service("stale", "api-9", None)).await.unwrap();

    let err = event_sync(&ctx, harvester).init_cache().await.unwrap_err();

    assert!(matches!(err, AgentError::Transport(_)), "got {err:?}");
    assert!(ctx.cache.is_empty().await);
    assert_eq!(ctx.cache.get_sequence(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sync_cache_starts_polling() {
    let (central, harvester) = seeded();
    let ctx = test_context(test_config(), central);
    let sync = event_sync(&ctx, harvester.clone());

    sync.sync_cache().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The newest event is replayed once the source is running.
    assert_eq!(ctx.cache.get_sequence(), 3);
    assert_eq!(harvester.requests(), vec![0, 2]);

    ctx.health.run_checks().await;
    assert_eq!(ctx.health.status(SOURCE_HEALTH_ENDPOINT).await, Some(HealthStatus::Ok));
    assert!(sync.supervisor().is_some());

    sync.stop();
    assert!(sync.supervisor().is_none());
    ctx.jobs.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_resumes_from_persisted_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let (central, harvester) = seeded();

    {
        let ctx = persisted_context(test_config(), central.clone(), &path);
        event_sync(&ctx, harvester.clone()).init_cache().await.unwrap();
    }

    let restarted = FakeHarvester::new();
    let ctx = persisted_context(test_config(), central, &path);
    assert!(ctx.cache.has_loaded_persisted_cache());
    assert_eq!(ctx.cache.get_sequence(), 2);
    assert_eq!(ctx.cache.count(KnownKind::ApiService).await, 2);

    let sync = event_sync(&ctx, restarted.clone());
    sync.sync_cache().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // No fresh build: the first request already resumes from the cursor.
    assert_eq!(restarted.requests(), vec![2]);

    sync.stop();
    ctx.jobs.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_replay_rebuilds_cache() {
    let (central, harvester) = seeded();
    let ctx = test_context(test_config(), central);
    let sync = event_sync(&ctx, harvester.clone());

    sync.sync_cache().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(ctx.cache.count(KnownKind::ApiService).await, 2);

    harvester.set_fail(true);
    tokio::time::sleep(Duration::from_secs(61)).await;

    // The rebuild flushed the cache; its own replay request failed too.
    assert!(ctx.cache.is_empty().await);
    assert!(harvester.requests().iter().skip(2).any(|seq| *seq == 0));
    let supervisor = sync.supervisor().unwrap();
    assert!(supervisor.restarts() >= 1);

    sync.stop();
    ctx.jobs.stop().await;
}

#[tokio::test]
async fn test_stream_mode_requires_transport() {
    let (central, harvester) = seeded();
    let mut config = test_config();
    config.event_mode = EventMode::Stream;
    let ctx = test_context(config, central);

    let err = event_sync(&ctx, harvester).sync_cache().await.unwrap_err();
    assert!(matches!(err, AgentError::Config(_)), "got {err:?}");
    ctx.jobs.stop().await;
}
