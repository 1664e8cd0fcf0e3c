mod support;

use pretty_assertions::assert_eq;
use std::sync::Arc;
use support::{config, harness, harness_with, posts, posts_id, schema, users_id};
use tablekit_client::{Backend, MemoryBackend};
use tablekit_orm::{DatabaseSchema, Orm, OrmError, TableSchema};
use tablekit_realtime::{BusState, MemoryTransport};
use tablekit_schema::SchemaError;
use tablekit_types::{AttributeSpec, AttributeStatus, PermissionAction, PermissionRule};

#[tokio::test]
async fn init_provisions_every_declared_table() {
    let h = harness().await;

    assert!(h.report.is_clean());
    assert_eq!(h.orm.tables(), vec![posts_id(), users_id()]);

    let posts = h.report.table(&posts_id()).unwrap();
    assert!(posts.created);
    let mut created = posts.migration.created.clone();
    created.sort();
    assert_eq!(created, vec!["body", "status", "title", "views"]);
    // Permissions went in with the table, so nothing was left to grant.
    assert!(posts.permissions.is_noop());
    assert_eq!(h.backend.call_count("create_table"), 2);
    assert_eq!(h.backend.call_count("grant_permission"), 0);
}

#[tokio::test]
async fn init_opens_one_connection_for_all_tables() {
    let h = harness().await;

    assert_eq!(h.orm.bus().state(), BusState::Connected);
    assert_eq!(h.transport.connect_count(), 1);
    assert_eq!(
        h.transport.channels(),
        vec![
            "databases.main.collections.posts.documents".to_string(),
            "databases.main.collections.users.documents".to_string(),
        ]
    );
}

#[tokio::test]
async fn second_init_against_converged_backend_changes_nothing() {
    let h = harness().await;
    h.backend.clear_calls();

    let (again, report) = Orm::init(
        config(),
        h.backend.clone(),
        Arc::new(MemoryTransport::new()),
        schema(),
    )
    .await
    .unwrap();

    assert!(report.reconciled.iter().all(|t| t.is_noop()));
    for write in [
        "create_table",
        "create_attribute",
        "update_attribute",
        "delete_attribute",
        "grant_permission",
        "revoke_permission",
    ] {
        assert_eq!(h.backend.call_count(write), 0, "{write}");
    }
    assert_eq!(again.tables(), h.orm.tables());
}

#[tokio::test]
async fn failing_table_does_not_block_the_others() {
    let backend = MemoryBackend::new();
    // Live `title` is an integer; the declaration wants a string.
    backend.seed_table(&posts_id(), vec![AttributeSpec::integer("title")], vec![]);

    let h = harness_with(backend, schema(), config()).await;

    assert_eq!(h.report.failed_tables(), vec![&posts_id()]);
    let (_, err) = &h.report.failed[0];
    assert!(matches!(
        err,
        OrmError::Schema(SchemaError::SchemaConflict { attribute, .. }) if attribute == "title"
    ));
    assert_eq!(err.table(), Some(&posts_id()));

    assert!(matches!(
        h.orm.table("posts"),
        Err(OrmError::TableNotReconciled(_))
    ));
    assert!(h.orm.table("users").is_ok());
    assert_eq!(h.orm.tables(), vec![users_id()]);
    // No channel for the unusable table.
    assert_eq!(h.orm.bus().channels().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn retry_after_provisioning_failure_only_issues_the_rest() {
    let backend = MemoryBackend::new().with_provisioning_polls(2);
    backend.reject_attribute("views");

    let h = harness_with(backend, schema(), config()).await;
    assert!(matches!(
        &h.report.failed[0].1,
        OrmError::Schema(SchemaError::AttributeProvisioningFailed { attribute, .. }) if attribute == "views"
    ));

    h.backend.heal_attribute("views");
    let report = h.orm.reconcile_table(&posts_id()).await.unwrap();

    assert!(report.migration.created.contains(&"views".to_string()));
    assert!(!report.created);
    for done_once in ["title", "body", "status"] {
        assert_eq!(
            h.backend
                .call_count(&format!("create_attribute posts.{done_once}")),
            1,
            "{done_once}"
        );
    }
    assert_eq!(h.backend.call_count("create_attribute posts.views"), 2);
    assert!(h.orm.table("posts").is_ok());
}

fn is_timeout(err: &OrmError) -> bool {
    matches!(err, OrmError::Schema(SchemaError::ProvisioningTimeout { .. }))
}

#[tokio::test(start_paused = true)]
async fn retry_keeps_table_closed_while_attributes_provision() {
    let backend = MemoryBackend::new().with_provisioning_polls(1_000);
    let h = harness_with(backend, schema(), config()).await;
    assert!(is_timeout(&h.report.failed[0].1));

    let err = h.orm.reconcile_table(&posts_id()).await.unwrap_err();
    assert!(is_timeout(&err));
    assert!(matches!(
        h.orm.table("posts"),
        Err(OrmError::TableNotReconciled(_))
    ));

    for name in ["title", "body", "views", "status"] {
        h.backend
            .set_attribute_status(&posts_id(), name, AttributeStatus::Available);
    }
    h.orm.reconcile_table(&posts_id()).await.unwrap();
    let posts = h.orm.table("posts").unwrap();
    posts
        .create(support::data(serde_json::json!({"title": "ready"})))
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn new_session_waits_for_attributes_left_provisioning() {
    let backend = MemoryBackend::new().with_provisioning_polls(1_000);
    let h = harness_with(backend, schema(), config()).await;
    h.backend.clear_calls();

    // Nothing to diff: the live attributes already match the declaration.
    let (again, report) = Orm::init(
        config(),
        h.backend.clone(),
        Arc::new(MemoryTransport::new()),
        schema(),
    )
    .await
    .unwrap();

    assert_eq!(h.backend.call_count("create_attribute"), 0);
    assert!(h.backend.call_count("get_attribute posts.") > 0);
    assert!(report.failed.iter().any(|(t, e)| *t == posts_id() && is_timeout(e)));
    assert!(matches!(
        again.table("posts"),
        Err(OrmError::TableNotReconciled(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn declared_attribute_being_deleted_is_recreated() {
    let backend = MemoryBackend::new();
    backend.seed_table(&posts_id(), posts().attributes, posts().permissions);
    backend.mark_deleting(&posts_id(), "views", 2);

    let h = harness_with(backend, schema(), config()).await;

    assert!(h.report.is_clean());
    let report = h.report.table(&posts_id()).unwrap();
    assert_eq!(report.migration.created, vec!["views".to_string()]);
    let views = h.backend.get_attribute(&posts_id(), "views").await.unwrap();
    assert_eq!(views.status, AttributeStatus::Available);
    assert!(h.orm.table("posts").is_ok());
}

#[tokio::test]
async fn drifted_permissions_are_reconciled() {
    let backend = MemoryBackend::new();
    backend.seed_table(
        &users_id(),
        vec![AttributeSpec::string("name", 100).required()],
        vec![
            PermissionRule::new("users", PermissionAction::Read),
            PermissionRule::new("any", PermissionAction::Delete),
        ],
    );
    let rejected = PermissionRule::new("users", PermissionAction::Update);
    backend.reject_permission(rejected.clone());

    let users = TableSchema::new("users")
        .attribute(AttributeSpec::string("name", 100).required())
        .permission("users", &[PermissionAction::Read, PermissionAction::Update])
        .permission("any", &[PermissionAction::Create]);
    let h = harness_with(backend, DatabaseSchema::new().table(users), config()).await;

    let report = &h.report.table(&users_id()).unwrap().permissions;
    assert_eq!(
        report.removed,
        vec![PermissionRule::new("any", PermissionAction::Delete)]
    );
    assert_eq!(
        report.added,
        vec![PermissionRule::new("any", PermissionAction::Create)]
    );
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].rule, rejected);
    // A rejected rule is reported but the table is still usable.
    assert!(!h.report.is_clean());
    assert!(h.orm.table("users").is_ok());
}

#[tokio::test]
async fn declared_later_tables_join_the_connection() {
    let h = harness().await;

    let tags = TableSchema::new("tags").attribute(AttributeSpec::string("label", 64).required());
    let report = h.orm.declare_table(tags).await.unwrap();

    assert!(report.created);
    assert!(h.orm.table("tags").is_ok());
    support::settle().await;
    assert!(
        h.transport
            .channels()
            .contains(&"databases.main.collections.tags.documents".to_string())
    );
    assert!(matches!(
        h.orm.declare_table(posts()).await,
        Err(OrmError::Config(_))
    ));
}

#[tokio::test]
async fn unknown_tables_and_bad_config_are_errors() {
    let h = harness().await;
    assert!(matches!(h.orm.table("nope"), Err(OrmError::UnknownTable(_))));

    let mut bad = config();
    bad.max_concurrent_migrations = 0;
    let result = Orm::init(
        bad,
        Arc::new(MemoryBackend::new()),
        Arc::new(MemoryTransport::new()),
        schema(),
    )
    .await;
    assert!(matches!(result, Err(OrmError::Config(_))));

    let twice = DatabaseSchema::new().table(posts()).table(posts());
    let result = Orm::init(
        config(),
        Arc::new(MemoryBackend::new()),
        Arc::new(MemoryTransport::new()),
        twice,
    )
    .await;
    assert!(matches!(result, Err(OrmError::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn unreachable_realtime_is_reported_not_fatal() {
    let transport = MemoryTransport::new();
    transport.fail_next_connects(100);
    let (orm, report) = Orm::init(
        config(),
        Arc::new(MemoryBackend::new()),
        Arc::new(transport),
        schema(),
    )
    .await
    .unwrap();

    assert!(report.realtime.is_some());
    assert!(report.failed.is_empty());
    assert!(orm.table("posts").is_ok());
}

#[tokio::test]
async fn realtime_can_be_disabled() {
    let mut cfg = config();
    cfg.realtime = false;
    let h = harness_with(MemoryBackend::new(), schema(), cfg).await;

    assert_eq!(h.transport.connect_count(), 0);
    assert_eq!(h.orm.bus().state(), BusState::Idle);
}

#[tokio::test]
async fn shutdown_closes_everything() {
    let h = harness().await;
    let posts = h.orm.table("posts").unwrap();
    let handle = posts.listen_to_documents(|_| {}).unwrap();

    h.orm.shutdown().await;
    h.orm.shutdown().await;

    assert_eq!(h.orm.bus().state(), BusState::Closed);
    assert!(!handle.is_active());
    assert!(matches!(h.orm.table("posts"), Err(OrmError::ShutDown)));
    assert!(matches!(posts.all().await, Err(OrmError::ShutDown)));
    assert!(matches!(
        posts.listen_to_documents(|_| {}),
        Err(OrmError::ShutDown)
    ));
}
