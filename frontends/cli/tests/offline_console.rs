//! Console commands against the seeded in-memory API

use serde_json::json;
use studyboard_api::{ResourceKind, Step};
use studyboard_cli::demo::seeded_api;
use studyboard_cli::{Backend, Command, Console};
use studyboard_client::{FakeStudyApi, Method};

async fn console() -> (FakeStudyApi, Console) {
    let api = seeded_api().await.unwrap();
    (api.clone(), Console::new(Backend::Offline(api)))
}

async fn step_order(api: &FakeStudyApi) -> Vec<(String, i64)> {
    let mut steps: Vec<Step> = api.all::<Step>().await.unwrap();
    steps.sort_by_key(|s| s.ordering.order_position);
    steps
        .into_iter()
        .map(|s| (s.base.id, s.ordering.order_position))
        .collect()
}

#[tokio::test]
async fn test_kinds_lists_every_tag() {
    let (_api, console) = console().await;
    let out = console.run(&Command::Kinds).await.unwrap();
    for tag in ["studies", "steps", "pages", "conditions", "contents", "apikeys", "levels"] {
        assert!(out.contains(tag), "missing {} in\n{}", tag, out);
    }
}

#[tokio::test]
async fn test_list_searches_studies() {
    let (api, console) = console().await;
    let out = console
        .run(&Command::List {
            kind: ResourceKind::Study,
            page: 0,
            page_size: 10,
            sort: None,
            desc: false,
            search: Some("pilot".to_string()),
        })
        .await
        .unwrap();

    assert!(out.contains("Pilot study"));
    assert!(!out.contains("Follow-up"));
    assert!(out.ends_with("Studies: page 1 of 1"));

    let requests = api.requests_to(Method::GET, "studies/").await;
    assert_eq!(
        requests[0].query,
        vec![
            ("page_index".to_string(), "0".to_string()),
            ("page_size".to_string(), "10".to_string()),
            ("search".to_string(), "pilot".to_string()),
        ]
    );
}

#[tokio::test]
async fn test_get_renders_detail_panel() {
    let (_api, console) = console().await;
    let out = console
        .run(&Command::Get {
            kind: ResourceKind::Study,
            id: "S1".to_string(),
        })
        .await
        .unwrap();
    assert!(out.starts_with("Study: Pilot study"));
    assert!(out.contains("Recommendation diversity pilot"));
}

#[tokio::test]
async fn test_children_are_listed_in_order() {
    let (_api, console) = console().await;
    let out = console
        .run(&Command::Children {
            kind: ResourceKind::Step,
            parent: "S1".to_string(),
        })
        .await
        .unwrap();
    let welcome = out.find("Welcome").unwrap();
    let consent = out.find("Consent").unwrap();
    let questionnaire = out.find("Questionnaire").unwrap();
    assert!(welcome < consent && consent < questionnaire);
}

#[tokio::test]
async fn test_create_step_appends_at_next_position() {
    let (api, mut console) = console().await;
    let out = console
        .run(&Command::Create {
            kind: ResourceKind::Step,
            parent: Some("S1".to_string()),
            fields: vec![("name".to_string(), json!("Debrief"))],
        })
        .await
        .unwrap();
    assert!(out.starts_with("Created Step"));

    let order = step_order(&api).await;
    assert_eq!(order.len(), 4);
    assert_eq!(order[3].1, 4);
    assert_eq!(api.requests_to(Method::POST, "studies/S1/steps").await.len(), 1);

    let notices = console.drain_notices();
    assert!(notices.iter().all(|n| !n.is_error()));
    assert_eq!(notices.last().unwrap().message(), "Step created");
}

#[tokio::test]
async fn test_create_rejects_duplicate_step_name() {
    let (api, console) = console().await;
    let err = console
        .run(&Command::Create {
            kind: ResourceKind::Step,
            parent: Some("S1".to_string()),
            fields: vec![("name".to_string(), json!("Consent"))],
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"), "{}", err);
    assert!(api.requests_to(Method::POST, "studies/S1/steps").await.is_empty());
}

#[tokio::test]
async fn test_create_dependent_without_parent_fails() {
    let (_api, console) = console().await;
    let err = console
        .run(&Command::Create {
            kind: ResourceKind::Step,
            parent: None,
            fields: vec![("name".to_string(), json!("Debrief"))],
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("--parent"));
}

#[tokio::test]
async fn test_create_requires_name() {
    let (_api, console) = console().await;
    let err = console
        .run(&Command::Create {
            kind: ResourceKind::Study,
            parent: None,
            fields: vec![],
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("required"), "{}", err);
}

#[tokio::test]
async fn test_reorder_moves_step_and_keeps_positions_dense() {
    let (api, console) = console().await;
    let out = console
        .run(&Command::Reorder {
            kind: ResourceKind::Step,
            parent: "S1".to_string(),
            id: "ST3".to_string(),
            position: 1,
        })
        .await
        .unwrap();
    assert_eq!(out, "1. ST3\n2. ST1\n3. ST2");

    assert_eq!(
        step_order(&api).await,
        vec![
            ("ST3".to_string(), 1),
            ("ST1".to_string(), 2),
            ("ST2".to_string(), 3)
        ]
    );
}

#[tokio::test]
async fn test_reorder_to_own_slot_sends_nothing() {
    let (api, console) = console().await;
    let out = console
        .run(&Command::Reorder {
            kind: ResourceKind::Step,
            parent: "S1".to_string(),
            id: "ST2".to_string(),
            position: 2,
        })
        .await
        .unwrap();
    assert!(out.contains("already at position 2"));
    assert!(api
        .requests_to(Method::PATCH, "studies/S1/steps/reorder")
        .await
        .is_empty());
}

#[tokio::test]
async fn test_reorder_unordered_kind_is_rejected() {
    let (_api, console) = console().await;
    let err = console
        .run(&Command::Reorder {
            kind: ResourceKind::Condition,
            parent: "S1".to_string(),
            id: "C1".to_string(),
            position: 1,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no manual order"));
}

#[tokio::test]
async fn test_update_with_parent_validates_changed_fields() {
    let (api, console) = console().await;
    let err = console
        .run(&Command::Update {
            kind: ResourceKind::Step,
            id: "ST3".to_string(),
            parent: Some("S1".to_string()),
            fields: vec![("name".to_string(), json!("Welcome"))],
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));
    assert!(api.requests_to(Method::PATCH, "steps/ST3").await.is_empty());

    let out = console
        .run(&Command::Update {
            kind: ResourceKind::Step,
            id: "ST3".to_string(),
            parent: Some("S1".to_string()),
            fields: vec![("name".to_string(), json!("Survey"))],
        })
        .await
        .unwrap();
    assert_eq!(out, "Updated Step ST3");
    let patches = api.requests_to(Method::PATCH, "steps/ST3").await;
    assert_eq!(patches[0].body, Some(json!({"name": "Survey"})));
}

#[tokio::test]
async fn test_update_without_changes_sends_nothing() {
    let (api, console) = console().await;
    let out = console
        .run(&Command::Update {
            kind: ResourceKind::Study,
            id: "S1".to_string(),
            parent: None,
            fields: vec![("name".to_string(), json!("Pilot study"))],
        })
        .await
        .unwrap();
    assert_eq!(out, "Nothing to change");
    assert!(api.requests_to(Method::PATCH, "studies/S1").await.is_empty());
}

#[tokio::test]
async fn test_delete_child_renumbers_siblings() {
    let (api, console) = console().await;
    console
        .run(&Command::Delete {
            kind: ResourceKind::Step,
            id: "ST1".to_string(),
            parent: Some("S1".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(
        step_order(&api).await,
        vec![("ST2".to_string(), 1), ("ST3".to_string(), 2)]
    );
}

#[tokio::test]
async fn test_failed_delete_reports_error_notice() {
    let (api, mut console) = console().await;
    api.fail_next(
        Method::DELETE,
        studyboard_api::ClientError::Api {
            status: 500,
            message: "database unavailable".to_string(),
        },
    )
    .await;

    let err = console
        .run(&Command::Delete {
            kind: ResourceKind::Study,
            id: "S2".to_string(),
            parent: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("database unavailable"));
    assert!(console.drain_notices().iter().any(|n| n.is_error()));
    assert_eq!(api.all::<studyboard_api::Study>().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_validate_reports_rejection() {
    let (_api, console) = console().await;
    let out = console
        .run(&Command::Validate {
            kind: ResourceKind::Level,
            parent: "L1".to_string(),
            field: "label".to_string(),
            value: "Neutral".to_string(),
            exclude: None,
        })
        .await
        .unwrap();
    assert!(out.starts_with("label rejected"));

    let out = console
        .run(&Command::Validate {
            kind: ResourceKind::Level,
            parent: "L1".to_string(),
            field: "label".to_string(),
            value: "Neutral".to_string(),
            exclude: Some("LV2".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(out, "label is valid");
}
