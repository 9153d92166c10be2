//! Integration tests for catch-up sync and migrations.

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use agentsdk_agent::catchup::CatchUpSync;
use agentsdk_agent::config::AgentType;
use agentsdk_agent::error::{AgentError, Result};
use agentsdk_agent::migrate::{AgentDetailsMigration, MigrateAll, Migrator};
use agentsdk_agent::AgentContext;
use agentsdk_resource::{details, KnownKind, Reference, ResourceInstance, X_AGENT_DETAILS};
use async_trait::async_trait;
use futures_util::FutureExt;

use common::{instance, service, test_config, test_context, Call, FakeCentral, ENV};

fn migrations(ctx: &AgentContext) -> MigrateAll {
    MigrateAll::new().with(Arc::new(AgentDetailsMigration::new(Arc::clone(&ctx.client))))
}

async fn cached_keys(ctx: &AgentContext) -> BTreeSet<(KnownKind, String)> {
    let mut keys = BTreeSet::new();
    for kind in KnownKind::ALL {
        for key in ctx.cache.keys(kind).await {
            keys.insert((kind, key));
        }
    }
    keys
}

#[tokio::test]
async fn test_populates_cache() {
    let central = FakeCentral::new();
    central.insert(service("petstore", "api-1", Some("team-a")));
    central.insert(instance("petstore-prod", "api-1", "prod"));
    central.insert(ResourceInstance::new(KnownKind::Category, "finance", ENV));
    central.insert(ResourceInstance::new(KnownKind::ManagedApplication, "mobile", ENV));

    let ctx = test_context(test_config(), central.clone());
    let report = CatchUpSync::new(&ctx, migrations(&ctx)).execute().await.unwrap();

    assert_eq!(report.services, 1);
    assert_eq!(report.instances, 1);
    assert!(ctx.cache.get(KnownKind::ApiService, "api-1").await.is_some());
    assert!(ctx
        .cache
        .get_by_name(KnownKind::ApiServiceInstance, "petstore-prod")
        .await
        .is_some());
    assert_eq!(ctx.cache.count(KnownKind::Category).await, 1);
    assert_eq!(ctx.cache.count(KnownKind::ManagedApplication).await, 1);
    assert_eq!(ctx.cache.team_ids_in_services().await, vec!["team-a".to_string()]);
}

#[tokio::test]
async fn test_pages_with_configured_size() {
    let central = FakeCentral::new();
    for (name, ext) in [("a", "api-1"), ("b", "api-2"), ("c", "api-3")] {
        central.insert(service(name, ext, None));
    }
    let mut config = test_config();
    config.central.page_size = 1;

    let ctx = test_context(config, central.clone());
    let report = CatchUpSync::new(&ctx, migrations(&ctx)).execute().await.unwrap();

    assert_eq!(report.services, 3);
    let pages: Vec<usize> = central
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::List(KnownKind::ApiService, page) => Some(page),
            _ => None,
        })
        .collect();
    assert_eq!(pages, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_skips_items_without_external_id() {
    let central = FakeCentral::new();
    central.insert(ResourceInstance::new(KnownKind::ApiService, "manual", ENV));
    central.insert(ResourceInstance::new(KnownKind::ApiServiceInstance, "manual-prod", ENV));

    let ctx = test_context(test_config(), central.clone());
    let report = CatchUpSync::new(&ctx, migrations(&ctx)).execute().await.unwrap();

    assert_eq!(report.skipped, 2);
    assert!(ctx.cache.list(KnownKind::ApiService).await.is_empty());
    assert!(ctx.cache.list(KnownKind::ApiServiceInstance).await.is_empty());
}

#[tokio::test]
async fn test_repeat_pass_is_idempotent() {
    let central = FakeCentral::new();
    central.insert(service("petstore", "api-1", None));
    central.insert(instance("petstore-prod", "api-1", "prod"));

    // Legacy service with agent attributes still to migrate.
    let mut legacy = ResourceInstance::new(KnownKind::ApiService, "legacy", ENV);
    legacy
        .attributes
        .insert(details::EXTERNAL_API_ID.to_string(), "api-2".to_string());
    central.insert(legacy);

    let ctx = test_context(test_config(), central.clone());
    let sync = CatchUpSync::new(&ctx, migrations(&ctx));

    sync.execute().await.unwrap();
    let first = cached_keys(&ctx).await;
    assert!(!central.writes().is_empty(), "first pass migrates the legacy service");

    central.clear_calls();
    sync.execute().await.unwrap();

    assert_eq!(cached_keys(&ctx).await, first);
    assert!(central.writes().is_empty(), "second pass wrote {:?}", central.writes());
}

#[tokio::test]
async fn test_migration_moves_attributes() {
    let central = FakeCentral::new();
    let mut legacy = ResourceInstance::new(KnownKind::ApiService, "legacy", ENV);
    legacy
        .attributes
        .insert(details::EXTERNAL_API_ID.to_string(), "api-2".to_string());
    legacy
        .attributes
        .insert(details::EXTERNAL_API_STAGE.to_string(), "prod".to_string());
    legacy.attributes.insert("team".to_string(), "kept".to_string());
    central.insert(legacy);

    let ctx = test_context(test_config(), central.clone());
    CatchUpSync::new(&ctx, migrations(&ctx)).execute().await.unwrap();

    let saved = central.resource(KnownKind::ApiService, "legacy").unwrap();
    assert_eq!(saved.attributes.len(), 1);
    assert_eq!(saved.agent_detail(details::EXTERNAL_API_ID), Some("api-2"));
    assert_eq!(saved.agent_detail(details::EXTERNAL_API_STAGE), Some("prod"));
    assert!(central.writes().contains(&Call::CreateSubResource(
        "legacy".to_string(),
        vec![X_AGENT_DETAILS.to_string()]
    )));
}

struct FailingMigration;

#[async_trait]
impl Migrator for FailingMigration {
    fn name(&self) -> &str {
        "failing"
    }

    async fn migrate(&self, _resource: ResourceInstance) -> Result<ResourceInstance> {
        Err(AgentError::Transport("connection reset".to_string()))
    }
}

#[tokio::test]
async fn test_migration_failure_aborts_pass() {
    let central = FakeCentral::new();
    central.insert(service("petstore", "api-1", None));
    central.insert(instance("petstore-prod", "api-1", "prod"));

    let ctx = test_context(test_config(), central.clone());
    let chain = migrations(&ctx).with(Arc::new(FailingMigration));
    let err = CatchUpSync::new(&ctx, chain).execute().await.unwrap_err();

    assert!(matches!(err, AgentError::Migration { .. }), "got {err:?}");
    assert!(ctx.cache.list(KnownKind::ApiService).await.is_empty());
    assert!(ctx.cache.list(KnownKind::ApiServiceInstance).await.is_empty());
}

#[tokio::test]
async fn test_sub_cache_failure_is_not_fatal() {
    let central = FakeCentral::new();
    central.insert(service("petstore", "api-1", None));
    central.fail_list(KnownKind::Category);
    central.fail_list(KnownKind::AccessRequestDefinition);

    let ctx = test_context(test_config(), central.clone());
    let report = CatchUpSync::new(&ctx, migrations(&ctx)).execute().await.unwrap();

    assert_eq!(report.services, 1);
}

#[tokio::test]
async fn test_access_requests_link_subscriptions() {
    let central = FakeCentral::new();
    let mut linked = ResourceInstance::new(KnownKind::AccessRequest, "ar-1", ENV);
    linked.metadata.id = "ar-id-1".to_string();
    linked.metadata.references.push(Reference {
        id: "sub-id".to_string(),
        kind: "Subscription".to_string(),
        name: "gold-plan".to_string(),
        group: Some("catalog".to_string()),
        scope_kind: None,
        scope_name: None,
    });
    let mut unlinked = ResourceInstance::new(KnownKind::AccessRequest, "ar-2", ENV);
    unlinked.metadata.id = "ar-id-2".to_string();
    central.insert(linked);
    central.insert(unlinked);

    let ctx = test_context(test_config(), central.clone());
    CatchUpSync::new(&ctx, migrations(&ctx)).execute().await.unwrap();

    assert_eq!(ctx.cache.count(KnownKind::AccessRequest).await, 2);
    assert_eq!(ctx.cache.subscription_for("ar-id-1").await.as_deref(), Some("gold-plan"));
    assert_eq!(ctx.cache.subscription_for("ar-id-2").await, None);
}

#[tokio::test]
async fn test_traceability_agent_skips_discovery_kinds() {
    let central = FakeCentral::new();
    central.insert(ResourceInstance::new(KnownKind::ManagedApplication, "mobile", ENV));

    let mut config = test_config();
    config.agent_type = AgentType::Traceability;
    let ctx = test_context(config, central.clone());
    CatchUpSync::new(&ctx, migrations(&ctx)).execute().await.unwrap();

    assert_eq!(ctx.cache.count(KnownKind::ManagedApplication).await, 0);
    assert!(!central
        .calls()
        .iter()
        .any(|c| matches!(c, Call::List(KnownKind::ManagedApplication, _))));
}

#[tokio::test]
async fn test_discover_hook_runs_last() {
    let central = FakeCentral::new();
    let ctx = test_context(test_config(), central.clone());

    let hook_central = central.clone();
    let sync = CatchUpSync::new(&ctx, migrations(&ctx)).with_discover(Arc::new(move || {
        let central = hook_central.clone();
        async move {
            assert!(central
                .calls()
                .iter()
                .any(|c| matches!(c, Call::List(KnownKind::Credential, _))));
            Ok::<(), AgentError>(())
        }
        .boxed()
    }));
    sync.execute().await.unwrap();
}
