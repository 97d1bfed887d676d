mod common;

use chrono::Utc;
use serde_json::json;

use automator_core::{
    ActionDescriptor, AutomatorError, Execution, ExecutionSeed, ParameterKind, ParameterSpec,
    ResourceTarget, ScopeKey, TaskStatus, TriggerSource, ValidatedParameters,
};
use automator_dispatcher::TaskCatalog;

use common::{instance, task, Stores, REGION};

const ACCOUNT: &str = "111111111111";

fn catalog(stores: &Stores) -> TaskCatalog {
    let registry = common::registry(vec![
        ActionDescriptor::new("report"),
        ActionDescriptor::new("resize")
            .with_parameter(ParameterSpec::new("InstanceType", ParameterKind::String).required()),
    ]);
    TaskCatalog::new(stores.tasks.clone(), stores.executions.clone(), registry)
}

#[tokio::test]
async fn test_register_validates_definition() {
    let stores = Stores::in_memory();
    let catalog = catalog(&stores);

    let err = catalog.register(&task("resize-all", "resize", &[ACCOUNT])).await.unwrap_err();
    assert!(matches!(err, AutomatorError::InvalidParameters(_)));

    let created = catalog
        .register(&task("resize-all", "resize", &[ACCOUNT]).with_parameter("InstanceType", json!("t3.small")))
        .await
        .unwrap();
    assert!(created.id > 0);

    let err = catalog.register(&task("resize-all", "report", &[ACCOUNT])).await.unwrap_err();
    assert!(matches!(err, AutomatorError::TaskAlreadyExists { .. }));
}

#[tokio::test]
async fn test_seed_creates_then_detects_changes() {
    let stores = Stores::in_memory();
    let catalog = catalog(&stores);
    let definitions = vec![
        task("nightly", "report", &[ACCOUNT]).with_cron("0 2 * * *"),
        task("hourly", "report", &[ACCOUNT]).with_cron("0 * * * *"),
    ];

    let first = catalog.seed(&definitions).await.unwrap();
    assert_eq!(first.created, 2);

    let second = catalog.seed(&definitions).await.unwrap();
    assert_eq!(second.unchanged, 2);
    assert_eq!(second.created, 0);

    let mut changed = definitions.clone();
    changed[1] = task("hourly", "report", &[ACCOUNT]).with_cron("30 * * * *");
    let third = catalog.seed(&changed).await.unwrap();
    assert_eq!(third.updated, 1);
    assert_eq!(third.unchanged, 1);

    let stored = stores.tasks.get_by_name("hourly").await.unwrap().unwrap();
    assert_eq!(stored.schedule.cron.as_deref(), Some("30 * * * *"));
}

#[tokio::test]
async fn test_in_flight_task_cannot_change() {
    let stores = Stores::in_memory();
    let catalog = catalog(&stores);
    let definition = catalog.register(&task("busy", "report", &[ACCOUNT])).await.unwrap();

    let target = ResourceTarget::from_descriptor(&ScopeKey::new(ACCOUNT, REGION), instance("i-1", &[]));
    let execution = Execution::new(
        ExecutionSeed {
            task: &definition,
            target,
            parameters: ValidatedParameters::default(),
            source: TriggerSource::Manual,
            tick: "manual:test".to_string(),
            max_attempts: 3,
        },
        Utc::now(),
    );
    stores.executions.create_if_absent(&execution).await.unwrap();

    let err = catalog.delete(definition.id).await.unwrap_err();
    assert!(matches!(err, AutomatorError::TaskInFlight { .. }));

    let seeded = catalog
        .seed(&[task("busy", "report", &[ACCOUNT]).with_cron("0 3 * * *")])
        .await
        .unwrap();
    assert_eq!(seeded.deferred, vec!["busy".to_string()]);

    // 停用不受未结束实例影响
    catalog.set_status(definition.id, TaskStatus::Inactive).await.unwrap();
    let stored = stores.tasks.get_by_id(definition.id).await.unwrap().unwrap();
    assert!(!stored.is_active());
}
