//! HTTP surface of the resource clients against a wiremock server

use serde_json::{json, Value};
use serial_test::serial;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use studyboard_api::{
    ApiKey, ClientError, ConstructItem, DependentResource, Fields, NewNamed, OrderPosition,
    PageContent, PageQuery, ScaleLevel, SortDirection, Step, Study, StudyCondition, SurveyPage,
    AuthErrorKind,
};
use studyboard_client::ApiClient;

fn step_json(id: &str, position: i64) -> Value {
    json!({
        "id": id,
        "name": format!("Step {}", id),
        "description": "",
        "created_at": "2024-03-01T10:00:00Z",
        "updated_at": "2024-03-01T10:00:00Z",
        "order_position": position,
        "study_id": "S1"
    })
}

fn study_json(id: &str) -> Value {
    json!({
        "id": id,
        "name": "Pilot",
        "description": "First run",
        "created_at": "2024-03-01T10:00:00Z",
        "updated_at": "2024-03-01T10:00:00Z"
    })
}

async fn setup() -> (MockServer, ApiClient) {
    let server = MockServer::start().await;
    let api = ApiClient::new(server.uri(), "test-token").unwrap();
    (server, api)
}

async fn expect_children_path<R: DependentResource>(server: &MockServer, api: &ApiClient, expected: &str) {
    Mock::given(method("GET"))
        .and(path(expected))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(server)
        .await;
    let rows = api.dependent::<R>().get_list("P1").await.unwrap();
    assert!(rows.is_empty(), "{} returned rows", expected);
}

#[tokio::test]
async fn test_dependent_paths_use_parent_tag_and_id() {
    let (server, api) = setup().await;

    expect_children_path::<Step>(&server, &api, "/studies/P1/steps").await;
    expect_children_path::<SurveyPage>(&server, &api, "/steps/P1/pages").await;
    expect_children_path::<StudyCondition>(&server, &api, "/studies/P1/conditions").await;
    expect_children_path::<PageContent>(&server, &api, "/pages/P1/contents").await;
    expect_children_path::<ApiKey>(&server, &api, "/studies/P1/apikeys").await;
    expect_children_path::<ConstructItem>(&server, &api, "/constructs/P1/items").await;
    expect_children_path::<ScaleLevel>(&server, &api, "/scales/P1/levels").await;
}

#[tokio::test]
async fn test_ids_with_reserved_characters_stay_one_segment() {
    let (server, api) = setup().await;
    Mock::given(method("GET"))
        .and(path("/studies/S1/steps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!("wrong endpoint")))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/studies/S1%2Fsteps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(study_json("S1/steps")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/studies/a%3Fb%23c/steps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let study = api.resource::<Study>().get_one("S1/steps").await.unwrap();
    assert_eq!(study.base.id, "S1/steps");

    let steps = api.dependent::<Step>().get_list("a?b#c").await.unwrap();
    assert!(steps.is_empty());

    let requests = server.received_requests().await.unwrap();
    assert!(requests.iter().all(|r| r.url.query().is_none()));
}

#[tokio::test]
async fn test_every_request_carries_bearer_and_json_content_type() {
    let (server, api) = setup().await;
    Mock::given(method("GET"))
        .and(path("/studies/s1"))
        .and(header("authorization", "Bearer test-token"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(study_json("s1")))
        .expect(1)
        .mount(&server)
        .await;

    let study: Study = api.resource::<Study>().get_one("s1").await.unwrap();
    assert_eq!(study.base.name, "Pilot");
}

#[tokio::test]
async fn test_search_query_has_no_sort_params() {
    let (server, api) = setup().await;
    Mock::given(method("GET"))
        .and(path("/studies/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"rows": [], "page_count": 0})),
        )
        .mount(&server)
        .await;

    let query = PageQuery::new(0, 10).searching("foo");
    api.resource::<Study>().get_paginated(&query).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].url.query(),
        Some("page_index=0&page_size=10&search=foo")
    );
}

#[tokio::test]
async fn test_sorted_page_and_data_count_envelope() {
    let (server, api) = setup().await;
    Mock::given(method("GET"))
        .and(path("/studies/"))
        .and(query_param("sort_by", "name"))
        .and(query_param("sort_dir", "desc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [study_json("s1"), study_json("s2")],
            "count": 21
        })))
        .expect(1)
        .mount(&server)
        .await;

    let query = PageQuery::new(2, 10).sorted_by("name", SortDirection::Desc);
    let page = api.resource::<Study>().get_paginated(&query).await.unwrap();
    assert_eq!(page.rows.len(), 2);
    assert_eq!(page.page_count, 3);
}

#[tokio::test]
async fn test_create_step_posts_once_under_study() {
    let (server, api) = setup().await;
    Mock::given(method("POST"))
        .and(path("/studies/S1/steps"))
        .and(body_json(json!({"name": "Consent", "description": ""})))
        .respond_with(ResponseTemplate::new(201).set_body_json(step_json("st4", 4)))
        .expect(1)
        .mount(&server)
        .await;

    let creator = api.dependent_creator::<Step>("S1");
    assert_eq!(creator.parent_id(), Some("S1"));
    let step = creator.create(&NewNamed::new("Consent")).await.unwrap();
    assert_eq!(step.ordering.order_position, 4);
}

#[tokio::test]
async fn test_base_creator_posts_to_collection() {
    let (server, api) = setup().await;
    Mock::given(method("POST"))
        .and(path("/studies/"))
        .respond_with(ResponseTemplate::new(201).set_body_json(study_json("s9")))
        .expect(1)
        .mount(&server)
        .await;

    let study = api
        .base_creator::<Study>()
        .create(&NewNamed::new("Pilot"))
        .await
        .unwrap();
    assert_eq!(study.base.id, "s9");
}

#[tokio::test]
async fn test_reorder_sends_one_patch_with_all_positions() {
    let (server, api) = setup().await;
    Mock::given(method("PATCH"))
        .and(path("/studies/S1/steps/reorder"))
        .and(body_json(json!([
            {"id": "C", "order_position": 1},
            {"id": "A", "order_position": 2},
            {"id": "B", "order_position": 3}
        ])))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let positions = vec![
        OrderPosition::new("C", 1),
        OrderPosition::new("A", 2),
        OrderPosition::new("B", 3),
    ];
    api.dependent::<Step>()
        .reorder("S1", &positions)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_update_patches_only_given_fields() {
    let (server, api) = setup().await;
    Mock::given(method("PATCH"))
        .and(path("/studies/s1"))
        .and(body_json(json!({"name": "Main"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(study_json("s1")))
        .expect(1)
        .mount(&server)
        .await;

    let mut fields = Fields::new();
    fields.insert("name".to_string(), json!("Main"));
    api.resource::<Study>().update("s1", &fields).await.unwrap();
}

#[tokio::test]
async fn test_delete_accepts_no_content() {
    let (server, api) = setup().await;
    Mock::given(method("DELETE"))
        .and(path("/studies/s1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    api.resource::<Study>().delete("s1").await.unwrap();
}

#[tokio::test]
async fn test_summary_and_validate_paths() {
    let (server, api) = setup().await;
    Mock::given(method("GET"))
        .and(path("/studies/s1/summary"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"id": "s1", "name": "Pilot", "step_count": 3})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/studies/S1/steps/validate"))
        .and(query_param("name", "Intro"))
        .and(query_param("exclude_id", "st1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"valid": false, "message": "Name already used"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let summary = api.resource::<Study>().get_one_preview("s1").await.unwrap();
    assert_eq!(summary.extra.get("step_count"), Some(&json!(3)));

    let result = api
        .dependent::<Step>()
        .validate_field("S1", "name", "Intro", Some("st1"))
        .await
        .unwrap();
    assert!(!result.valid);
    assert_eq!(result.message.as_deref(), Some("Name already used"));
}

#[tokio::test]
async fn test_error_responses_are_classified() {
    let (server, api) = setup().await;
    Mock::given(method("GET"))
        .and(path("/studies/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/studies/broken"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({"message": "database unavailable"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/studies/consent"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"error": "consent_required"})),
        )
        .mount(&server)
        .await;

    let ops = api.resource::<Study>();
    assert_eq!(
        ops.get_one("missing").await.unwrap_err(),
        ClientError::NotFound {
            path: "studies/missing".to_string()
        }
    );
    assert_eq!(
        ops.get_one("broken").await.unwrap_err(),
        ClientError::Api {
            status: 500,
            message: "database unavailable".to_string()
        }
    );
    assert!(matches!(
        ops.get_one("consent").await.unwrap_err(),
        ClientError::Authentication {
            kind: AuthErrorKind::ConsentRequired,
            ..
        }
    ));
}

#[tokio::test]
async fn test_unreachable_server_is_a_transport_error() {
    let api = ApiClient::new("http://127.0.0.1:9", "t").unwrap();
    let err = api.resource::<Study>().get_one("s1").await.unwrap_err();
    assert!(matches!(err, ClientError::Transport { .. }), "{:?}", err);
}

#[tokio::test]
#[serial]
async fn test_trace_context_is_propagated() {
    use opentelemetry::trace::{
        SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState,
    };
    use opentelemetry_sdk::propagation::TraceContextPropagator;

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
    let (server, api) = setup().await;
    Mock::given(method("GET"))
        .and(path("/studies/s1"))
        .and(header(
            "traceparent",
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        ))
        .respond_with(ResponseTemplate::new(200).set_body_json(study_json("s1")))
        .expect(1)
        .mount(&server)
        .await;

    let span_context = SpanContext::new(
        TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
        SpanId::from_hex("00f067aa0ba902b7").unwrap(),
        TraceFlags::SAMPLED,
        true,
        TraceState::default(),
    );
    let cx = opentelemetry::Context::current().with_remote_span_context(span_context);
    let _guard = cx.attach();

    api.resource::<Study>().get_one("s1").await.unwrap();
}
