//! Integration tests for the credential expiry job.

mod common;

use agentsdk_agent::config::AgentType;
use agentsdk_agent::credentials::CredentialExpiryJob;
use agentsdk_agent::AgentContext;
use agentsdk_resource::credential::{
    Credential, CredentialStateName, StatusLevel, EXPIRED_REASON, POLICIES, STATE,
};
use agentsdk_resource::{KnownKind, ResourceInstance};
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use common::{test_config, test_context, Call, FakeCentral, ENV};

fn credential(name: &str, expiry: Value, state: &str) -> ResourceInstance {
    let mut ri = ResourceInstance::new(KnownKind::Credential, name, ENV);
    ri.metadata.id = format!("cred-{name}");
    ri.set_sub_resource(POLICIES, json!({"expiry": {"timestamp": expiry}}));
    ri.set_sub_resource(STATE, json!({"name": state}));
    ri
}

async fn seed(ctx: &AgentContext, central: &FakeCentral, resources: Vec<ResourceInstance>) {
    for ri in resources {
        central.insert(ri.clone());
        ctx.cache.add(ri).await.unwrap();
    }
}

#[tokio::test]
async fn test_expires_only_past_credentials() {
    let central = FakeCentral::new();
    let ctx = test_context(test_config(), central.clone());
    let past = (Utc::now() - Duration::hours(2)).to_rfc3339();
    let future = (Utc::now() + Duration::days(30)).to_rfc3339();
    seed(
        &ctx,
        &central,
        vec![
            credential("old", json!(past), "active"),
            credential("fresh", json!(future), "active"),
            credential("forever", json!(0), "active"),
            credential("unset", json!("0001-01-01T00:00:00Z"), "active"),
        ],
    )
    .await;

    let report = CredentialExpiryJob::new(&ctx).scan(Utc::now()).await;
    assert_eq!(report.scanned, 4);
    assert_eq!(report.expired, 1);
    assert_eq!(report.failed, 0);

    let expired = Credential::from_resource(central.resource(KnownKind::Credential, "old").unwrap())
        .unwrap();
    let state = expired.state.unwrap();
    assert_eq!(state.name, CredentialStateName::Inactive);
    assert_eq!(state.reason, EXPIRED_REASON);
    assert_eq!(expired.status.unwrap().level, StatusLevel::Pending);

    let writes = central.writes();
    assert_eq!(
        writes,
        vec![
            Call::Update("old".to_string()),
            Call::Patch("old".to_string(), vec!["status".to_string(), "state".to_string()]),
        ]
    );

    // The cache reflects the new state.
    let cached = ctx.cache.get_by_id(KnownKind::Credential, "cred-old").await.unwrap();
    assert!(Credential::from_resource(cached).unwrap().is_inactive());
}

#[tokio::test]
async fn test_second_scan_does_not_rewrite() {
    let central = FakeCentral::new();
    let ctx = test_context(test_config(), central.clone());
    let past = (Utc::now() - Duration::minutes(1)).to_rfc3339();
    seed(&ctx, &central, vec![credential("old", json!(past), "active")]).await;

    let job = CredentialExpiryJob::new(&ctx);
    assert_eq!(job.scan(Utc::now()).await.expired, 1);

    central.clear_calls();
    assert_eq!(job.scan(Utc::now()).await.expired, 0);
    assert!(central.writes().is_empty());
}

#[tokio::test]
async fn test_already_inactive_is_untouched() {
    let central = FakeCentral::new();
    let ctx = test_context(test_config(), central.clone());
    let past = (Utc::now() - Duration::days(1)).to_rfc3339();
    seed(&ctx, &central, vec![credential("revoked", json!(past), "inactive")]).await;

    let report = CredentialExpiryJob::new(&ctx).scan(Utc::now()).await;
    assert_eq!(report.expired, 0);
    assert!(central.writes().is_empty());
}

#[tokio::test]
async fn test_failures_do_not_abort_scan() {
    let central = FakeCentral::new();
    let ctx = test_context(test_config(), central.clone());
    let past = (Utc::now() - Duration::hours(1)).to_rfc3339();

    // "ghost" is cached but unknown remotely, so its update fails.
    ctx.cache
        .add(credential("ghost", json!(past.clone()), "active"))
        .await
        .unwrap();
    seed(&ctx, &central, vec![credential("old", json!(past), "active")]).await;

    let report = CredentialExpiryJob::new(&ctx).scan(Utc::now()).await;
    assert_eq!(report.scanned, 2);
    assert_eq!(report.expired, 1);
    assert_eq!(report.failed, 1);
}

#[tokio::test]
async fn test_disabled_without_deprovisioning() {
    let central = FakeCentral::new();
    let mut config = test_config();
    config.central.credentials.deprovision_expired = false;
    let ctx = test_context(config, central.clone());
    let past = (Utc::now() - Duration::hours(1)).to_rfc3339();
    seed(&ctx, &central, vec![credential("old", json!(past), "active")]).await;

    let job = CredentialExpiryJob::new(&ctx);
    assert!(!job.is_enabled());
    assert_eq!(job.scan(Utc::now()).await.scanned, 0);
    assert!(central.writes().is_empty());
}

#[tokio::test]
async fn test_disabled_for_traceability_agent() {
    let central = FakeCentral::new();
    let mut config = test_config();
    config.agent_type = AgentType::Traceability;
    let ctx = test_context(config, central);

    assert!(!CredentialExpiryJob::new(&ctx).is_enabled());
}
