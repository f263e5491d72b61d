use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use regimen::analytics::{AnalyticsSink, Counter, Event};
use regimen::api::router;
use regimen::db::RegimenDB;
use regimen::planner::PlannerConfig;
use regimen::AppState;
use tower::ServiceExt;

#[derive(Default)]
struct Collected(Mutex<Vec<Event>>);

impl AnalyticsSink for Collected {
    fn record(&self, events: Vec<Event>) {
        self.0.lock().unwrap().extend(events);
    }
}

fn test_state(api_key: Option<&str>) -> AppState {
    let mut state = AppState::new(Arc::new(RegimenDB::open(":memory:").unwrap()));
    state.api_key = api_key.map(|s| s.to_string());
    state
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_req(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn authed_json_req(method: &str, uri: &str, body: serde_json::Value, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("authorization", format!("Bearer {token}"))
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get_req(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method("GET").uri(uri);
    if let Some(t) = token {
        b = b.header("authorization", format!("Bearer {t}"));
    }
    b.body(Body::empty()).unwrap()
}

fn retinol_week(user: &str) -> serde_json::Value {
    serde_json::json!({
        "user_id": user,
        "part": "face",
        "start_date": "2024-01-01",
        "templates": [
            {"key": "apply_retinol", "name": "Apply retinol", "concern": "wrinkles", "total": 7},
            {"key": "clay_mask", "name": "Clay mask", "concern": "acne", "total": 2}
        ]
    })
}

// --- Auth ---

#[tokio::test]
async fn auth_rejects_no_token() {
    let app = router(test_state(Some("secret123")));
    let resp = app.oneshot(get_req("/routines?user_id=u1", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn auth_rejects_wrong_token() {
    let app = router(test_state(Some("secret123")));
    let resp = app
        .oneshot(get_req("/routines?user_id=u1", Some("wrongtoken")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn auth_accepts_correct_token() {
    let app = router(test_state(Some("secret123")));
    let resp = app
        .oneshot(authed_json_req("POST", "/routines", retinol_week("u1"), "secret123"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_is_public() {
    let app = router(test_state(Some("secret123")));
    let resp = app.oneshot(get_req("/health", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["name"], "regimen");
    assert_eq!(j["planner_enabled"], false);
    assert!(j["last_maintenance_ms"].is_null());
}

// --- Validation ---

#[tokio::test]
async fn malformed_body_is_400() {
    let app = router(test_state(None));
    let req = Request::builder()
        .method("POST")
        .uri("/tasks/status")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(resp).await["error"].as_str().unwrap().contains("invalid body"));
}

#[tokio::test]
async fn expired_cannot_be_set_directly() {
    let app = router(test_state(None));
    let resp = app
        .oneshot(json_req("POST", "/tasks/status", serde_json::json!({"task_ids": ["x"], "status": "expired"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn zero_total_is_400() {
    let app = router(test_state(None));
    let body = serde_json::json!({
        "user_id": "u1",
        "part": "face",
        "templates": [{"key": "walk", "name": "Walk", "concern": "posture", "total": 0}]
    });
    let resp = app.oneshot(json_req("POST", "/routines", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn planner_path_without_planner_is_503() {
    let app = router(test_state(None));
    let body = serde_json::json!({"user_id": "u1", "part": "face", "concerns": ["acne"]});
    let resp = app.oneshot(json_req("POST", "/routines", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn schedule_range_is_bounded() {
    let app = router(test_state(None));
    let resp = app
        .oneshot(get_req("/schedule?user_id=u1&from=2024-01-01&to=2024-12-31", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- Routines ---

#[tokio::test]
async fn create_then_read_back() {
    let sink = Arc::new(Collected::default());
    let mut state = test_state(None);
    state.analytics = sink.clone() as Arc<dyn AnalyticsSink>;
    let app = router(state);

    let resp = app
        .clone()
        .oneshot(json_req("POST", "/routines", retinol_week("u1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let created = body_json(resp).await;
    let id = created["routine"]["id"].as_str().unwrap().to_string();
    assert_eq!(created["tasks"].as_array().unwrap().len(), 9);
    assert!(created.get("events").is_none());
    assert_eq!(created["routine"]["final_schedule"]["2024-01-05"].as_array().unwrap().len(), 2);

    let events = sink.0.lock().unwrap().clone();
    assert_eq!(events, vec![Event::new("u1", Counter::TasksCreated, 9)]);

    let resp = app.clone().oneshot(get_req(&format!("/routines/{id}"), None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let r = body_json(resp).await;
    assert_eq!(r["status"], "active");
    assert_eq!(r["all_tasks"][0]["key"], "apply_retinol");
    assert_eq!(r["all_tasks"][0]["total"], 7);

    let resp = app
        .clone()
        .oneshot(get_req("/routines?user_id=u1&status=active", None))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await.as_array().unwrap().len(), 1);

    let resp = app
        .clone()
        .oneshot(get_req(&format!("/routines/{id}/tasks"), None))
        .await
        .unwrap();
    assert_eq!(body_json(resp).await.as_array().unwrap().len(), 9);

    let resp = app
        .oneshot(get_req("/schedule?user_id=u1&from=2024-01-04&to=2024-01-05", None))
        .await
        .unwrap();
    let sched = body_json(resp).await;
    let keys: Vec<&str> = sched["2024-01-05"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["key"].as_str().unwrap())
        .collect();
    assert_eq!(keys, vec!["apply_retinol", "clay_mask"]);
    assert!(sched.get("2024-01-01").is_none());
}

#[tokio::test]
async fn missing_routine_is_404() {
    let app = router(test_state(None));
    let resp = app.clone().oneshot(get_req("/routines/nope", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    let resp = app.oneshot(get_req("/routines/nope/tasks", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cooldown_decline_is_200_with_error_body() {
    let app = router(test_state(None));
    app.clone()
        .oneshot(json_req("POST", "/routines", retinol_week("u1")))
        .await
        .unwrap();
    let resp = app
        .oneshot(json_req("POST", "/routines", retinol_week("u1")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert!(j["error"].is_string());
    assert_eq!(j["retry_after"], "2024-01-08");
}

// --- Tasks ---

#[tokio::test]
async fn complete_delete_and_reschedule_over_http() {
    let app = router(test_state(None));
    let created = body_json(
        app.clone()
            .oneshot(json_req("POST", "/routines", retinol_week("u1")))
            .await
            .unwrap(),
    )
    .await;
    let tasks = created["tasks"].as_array().unwrap();
    let mask: Vec<&str> = tasks
        .iter()
        .filter(|t| t["key"] == "clay_mask")
        .map(|t| t["id"].as_str().unwrap())
        .collect();
    let retinol = tasks.iter().find(|t| t["key"] == "apply_retinol").unwrap()["id"].as_str().unwrap();

    let resp = app
        .clone()
        .oneshot(json_req(
            "POST",
            "/tasks/status",
            serde_json::json!({"task_ids": [mask[0]], "status": "completed"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["tasks"][0]["status"], "completed");

    let resp = app
        .clone()
        .oneshot(json_req("POST", "/tasks/delete", serde_json::json!({"task_ids": [retinol]})))
        .await
        .unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["deleted"].as_array().unwrap().len(), 1);

    let resp = app
        .clone()
        .oneshot(json_req(
            "POST",
            "/tasks/reschedule",
            serde_json::json!({"task_id": mask[1], "new_date": "2024-02-01"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_ne!(j["source"]["id"], j["destination"]["id"]);

    let resp = app.oneshot(get_req(&format!("/tasks/{}", mask[1]), None)).await.unwrap();
    let t = body_json(resp).await;
    assert_eq!(t["routine_id"], j["destination"]["id"]);
}

#[tokio::test]
async fn rescheduling_a_completed_task_is_declined() {
    let app = router(test_state(None));
    let created = body_json(
        app.clone()
            .oneshot(json_req("POST", "/routines", retinol_week("u1")))
            .await
            .unwrap(),
    )
    .await;
    let id = created["tasks"][0]["id"].as_str().unwrap().to_string();
    app.clone()
        .oneshot(json_req("POST", "/tasks/status", serde_json::json!({"task_ids": [id], "status": "completed"})))
        .await
        .unwrap();
    let resp = app
        .oneshot(json_req(
            "POST",
            "/tasks/reschedule",
            serde_json::json!({"task_id": id, "new_date": "2024-01-20"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["error"], "only active tasks can be rescheduled");
}

// --- Users / admin ---

#[tokio::test]
async fn profile_and_purchase_round_trip() {
    let app = router(test_state(None));
    let resp = app
        .clone()
        .oneshot(json_req(
            "POST",
            "/users",
            serde_json::json!({"id": "u1", "name": "Mia", "time_zone": "Europe/Berlin",
                "concerns": [{"name": "acne", "part": "face"}]}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.clone().oneshot(get_req("/users/u1", None)).await.unwrap();
    let u = body_json(resp).await;
    assert_eq!(u["time_zone"], "Europe/Berlin");
    assert_eq!(u["concerns"][0]["name"], "acne");

    let resp = app
        .clone()
        .oneshot(json_req("POST", "/users", serde_json::json!({"id": "u2", "name": "Al", "time_zone": "Nowhere/City"})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = app
        .oneshot(json_req(
            "POST",
            "/purchases",
            serde_json::json!({"buyer_id": "u2", "seller_id": "u1", "part": "face"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn admin_reconcile_and_expire() {
    let app = router(test_state(None));
    app.clone()
        .oneshot(json_req("POST", "/routines", retinol_week("u1")))
        .await
        .unwrap();

    let resp = app
        .clone()
        .oneshot(Request::builder().method("POST").uri("/admin/reconcile").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["checked"], 1);
    assert!(j["fixed"].as_array().unwrap().is_empty());

    // every 2024 instance is overdue by now
    let resp = app
        .oneshot(Request::builder().method("POST").uri("/admin/expire").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["tasks_expired"], 9);
    assert_eq!(j["routines_expired"], 1);
}

#[tokio::test]
async fn unknown_progress_is_404() {
    let app = router(test_state(None));
    let resp = app.oneshot(get_req("/progress/nope", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_planner_call_still_ends_progress() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let upstream = axum::Router::new().route(
        "/chat",
        axum::routing::post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "overloaded") }),
    );
    tokio::spawn(async move { axum::serve(listener, upstream).await.unwrap() });

    let mut state = test_state(None);
    state.planner = Some(PlannerConfig {
        url: format!("http://{addr}/chat"),
        key: String::new(),
        model: "test".into(),
        client: reqwest::Client::new(),
    });
    let db = state.db.clone();
    let app = router(state);

    let body = serde_json::json!({"user_id": "u1", "part": "face", "concerns": ["acne"]});
    let resp = app.oneshot(json_req("POST", "/routines", body)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);

    let (done, error): (i64, Option<String>) = db
        .read(|c| {
            Ok(c.query_row("SELECT done, error FROM progress WHERE user_id = 'u1'", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })?)
        })
        .unwrap();
    assert_eq!(done, 1);
    assert!(error.unwrap().contains("500"));
}
