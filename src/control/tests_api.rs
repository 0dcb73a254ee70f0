use super::{routes, SessionMiddlewareFactory};
use crate::access::repository::SqliteUserCredentialsRepository;
use crate::ai::OpenAiClient;
use crate::config::{OpenAiConfig, DEFAULT_OPENAI_MODEL};
use crate::operation::{OperationRepository, SqliteOperationRepository};
use crate::supply::SupplyPlanningService;
use actix::{Actor, Addr};
use actix_session::{storage::CookieSessionStore, SessionMiddleware};
use actix_web::cookie::{Cookie, Key};
use actix_web::http::{header, StatusCode};
use actix_web::{test, web::Data, App};
use httpmock::prelude::*;
use mpstats_client::{MpstatsClient, MpstatsConfig};
use reqwest_middleware::ClientBuilder;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_rusqlite::Connection;
use wb_types::access::service::UserCredentialsService;

struct State {
    users: Addr<UserCredentialsService>,
    operations: Arc<dyn OperationRepository>,
    planning: Data<SupplyPlanningService>,
    ai: Data<OpenAiClient>,
    key: Key,
}

async fn state(mpstats_base_url: String) -> State {
    let users = SqliteUserCredentialsRepository::init(Connection::open_in_memory().await.unwrap())
        .await
        .unwrap();
    let operations = SqliteOperationRepository::init(Connection::open_in_memory().await.unwrap())
        .await
        .unwrap();
    let http = ClientBuilder::new(reqwest::Client::new()).build();
    let mut config = MpstatsConfig::new("token");
    config.base_url = mpstats_base_url;
    let mpstats = Arc::new(MpstatsClient::new(config, http.clone()));
    State {
        users: UserCredentialsService::new(Arc::new(users)).start(),
        operations: Arc::new(operations),
        planning: Data::new(SupplyPlanningService::new(mpstats, None)),
        ai: Data::new(OpenAiClient::new(
            OpenAiConfig {
                api_key: None,
                model: DEFAULT_OPENAI_MODEL.to_string(),
                base_url: "http://127.0.0.1:9".to_string(),
            },
            http,
        )),
        key: Key::generate(),
    }
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(Data::new($state.users.clone()))
                .app_data(Data::new($state.operations.clone()))
                .app_data($state.planning.clone())
                .app_data($state.ai.clone())
                .wrap(SessionMiddlewareFactory {})
                .wrap(
                    SessionMiddleware::builder(CookieSessionStore::default(), $state.key.clone())
                        .cookie_secure(false)
                        .build(),
                )
                .configure(routes),
        )
        .await
    };
}

macro_rules! log_in {
    ($app:expr, $email:expr, $password:expr) => {{
        let creds = json!({ "email": $email, "password": $password });
        let resp = test::call_service(
            &$app,
            test::TestRequest::post()
                .uri("/auth/register")
                .set_json(&creds)
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = test::call_service(
            &$app,
            test::TestRequest::post()
                .uri("/auth/login")
                .set_json(&creds)
                .to_request(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let cookie: Cookie<'static> = resp
            .response()
            .cookies()
            .next()
            .expect("session cookie")
            .into_owned();
        cookie
    }};
}

fn sales_rows() -> Value {
    json!([
        {"data": "2024-07-03", "sales": 12, "balance": 60, "final_price": 500},
        {"data": "2024-07-01", "sales": 10, "balance": 80, "final_price": 500},
        {"data": "2024-07-02", "sales": 8, "balance": 70, "final_price": 500}
    ])
}

#[actix_rt::test]
async fn registration_and_login() {
    let state = state("http://127.0.0.1:9".to_string()).await;
    let app = app!(state);

    let creds = json!({ "email": "Seller@Example.com", "password": "secret1" });
    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/auth/register")
            .set_json(&creds)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/auth/register")
            .set_json(&creds)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["detail"], "User with this email already exists");

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/auth/login")
            .set_json(json!({ "email": "seller@example.com", "password": "wrong!" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/auth/register")
            .set_json(json!({ "email": "x@y.io", "password": "123" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn anonymous_requests_are_rejected() {
    let state = state("http://127.0.0.1:9".to_string()).await;
    let app = app!(state);

    let resp = test::call_service(
        &app,
        test::TestRequest::get().uri("/user/profile").to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["detail"], "Not authenticated");

    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get().uri("/auth/check").to_request(),
    )
    .await;
    assert_eq!(body, json!({ "authenticated": false, "user": null }));

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/planning/monthly-analysis")
            .set_json(json!({ "sku": "1" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_rt::test]
async fn supply_plan_is_audited_and_counted() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/item/123/sales");
            then.status(200).json_body(sales_rows());
        })
        .await;
    let state = state(server.base_url()).await;
    let app = app!(state);
    let cookie = log_in!(app, "seller@example.com", "secret1");

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/planning/monthly-analysis")
            .cookie(cookie.clone())
            .set_json(json!({ "sku": "123", "purchase_price": 200 }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], json!(true));
    let data = &body["data"];
    assert_eq!(data["sku"], "123");
    assert_eq!(data["total_sales"], json!(30));
    assert_eq!(data["avg_daily_sales"], json!(10.0));
    assert_eq!(data["end_balance"], json!(60));
    assert_eq!(data["target_stock"], json!(100));
    assert_eq!(data["sales_graph"][0]["date"], "2024-07-01");

    let profile: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri("/user/profile")
            .cookie(cookie.clone())
            .to_request(),
    )
    .await;
    assert_eq!(profile["total_analyses"], json!(1));
    assert_eq!(profile["subscription_type"], "Pro");

    let dashboard: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri("/user/dashboard")
            .cookie(cookie.clone())
            .to_request(),
    )
    .await;
    assert_eq!(dashboard["stats"]["supply_plans"], json!(1));
    assert_eq!(dashboard["stats"]["total_savings"], json!(133));
    assert_eq!(dashboard["recent_activity"][0]["type"], "supply_planning");

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/planning/monthly-analysis/export")
            .cookie(cookie)
            .set_json(json!({ "sku": "123" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let disposition = resp
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(disposition.contains("supply_plan_123.csv"));
    let csv = test::read_body(resp).await;
    assert!(std::str::from_utf8(&csv).unwrap().starts_with("metric,value"));
}

#[actix_rt::test]
async fn top_up_during_analysis_is_kept() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/item/123/sales");
            then.status(200)
                .delay(Duration::from_millis(800))
                .json_body(sales_rows());
        })
        .await;
    let state = state(server.base_url()).await;
    let app = app!(state);
    let cookie = log_in!(app, "seller@example.com", "secret1");

    let analysis = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/planning/monthly-analysis")
            .cookie(cookie.clone())
            .set_json(json!({ "sku": "123" }))
            .to_request(),
    );
    let top_up = async {
        actix_rt::time::sleep(Duration::from_millis(200)).await;
        test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/user/add-balance")
                .cookie(cookie.clone())
                .set_json(json!({ "amount": 500 }))
                .to_request(),
        )
        .await
    };
    let (analysis, top_up) = tokio::join!(analysis, top_up);
    assert_eq!(analysis.status(), StatusCode::OK);
    assert_eq!(top_up.status(), StatusCode::OK);

    let profile: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri("/user/profile")
            .cookie(cookie)
            .to_request(),
    )
    .await;
    assert_eq!(profile["balance"], json!(1500.0));
    assert_eq!(profile["total_analyses"], json!(1));
}

#[actix_rt::test]
async fn empty_history_and_bad_config_are_client_errors() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/item/404/sales");
            then.status(200).json_body(json!([]));
        })
        .await;
    let state = state(server.base_url()).await;
    let app = app!(state);
    let cookie = log_in!(app, "seller@example.com", "secret1");

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/planning/monthly-analysis")
            .cookie(cookie.clone())
            .set_json(json!({ "sku": "404" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["detail"], "Not enough sales data to build a supply plan");

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/planning/monthly-analysis")
            .cookie(cookie.clone())
            .set_json(json!({ "sku": "404", "delivery_time": 0 }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/planning/monthly-analysis")
            .cookie(cookie.clone())
            .set_json(json!({ "sku": "1/../404" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/planning/monthly-analysis")
            .cookie(cookie)
            .set_json(json!({ "delivery_time": 5 }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert!(body["detail"].as_str().unwrap_or_default().contains("sku"));
}

#[actix_rt::test]
async fn upstream_auth_failure_is_bad_gateway() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/item/5/sales");
            then.status(401);
        })
        .await;
    let state = state(server.base_url()).await;
    let app = app!(state);
    let cookie = log_in!(app, "seller@example.com", "secret1");

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/item/5/sales")
            .cookie(cookie)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}

#[actix_rt::test]
async fn item_sales_are_returned_for_charting() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/item/9/sales")
                .query_param("d1", "2024-07-01")
                .query_param("d2", "2024-07-03");
            then.status(200).json_body(sales_rows());
        })
        .await;
    let state = state(server.base_url()).await;
    let app = app!(state);
    let cookie = log_in!(app, "seller@example.com", "secret1");

    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri("/item/9/sales?d1=2024-07-01&d2=2024-07-03")
            .cookie(cookie)
            .to_request(),
    )
    .await;
    assert_eq!(body.as_array().map(Vec::len), Some(3));
    assert_eq!(body[2], json!({"date": "2024-07-03", "sales": 12, "balance": 60, "price": 500.0}));
}

#[actix_rt::test]
async fn balance_and_subscription_changes_are_recorded() {
    let state = state("http://127.0.0.1:9".to_string()).await;
    let app = app!(state);
    let cookie = log_in!(app, "seller@example.com", "secret1");

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/user/add-balance")
            .cookie(cookie.clone())
            .set_json(json!({ "amount": 1500 }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/user/add-balance")
            .cookie(cookie.clone())
            .set_json(json!({ "amount": -5 }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/user/upgrade-subscription")
            .cookie(cookie.clone())
            .set_json(json!({ "plan": "Business" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/user/upgrade-subscription")
            .cookie(cookie.clone())
            .set_json(json!({ "plan": "pro" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/user/upgrade-subscription")
            .cookie(cookie.clone())
            .set_json(json!({ "plan": "Platinum" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let profile: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri("/user/profile")
            .cookie(cookie.clone())
            .to_request(),
    )
    .await;
    assert_eq!(profile["balance"], json!(510.0));
    assert_eq!(profile["subscription_type"], "Pro");

    let ops: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri("/user/operations")
            .cookie(cookie)
            .to_request(),
    )
    .await;
    let kinds = ops
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["type"].as_str().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    assert_eq!(kinds, vec!["subscription", "payment"]);
    assert_eq!(ops[0]["amount"], json!(-1990.0));
    assert_eq!(ops[1]["amount"], json!(1500.0));
}

#[actix_rt::test]
async fn ai_helper_without_key_is_unavailable() {
    let state = state("http://127.0.0.1:9".to_string()).await;
    let app = app!(state);
    let cookie = log_in!(app, "seller@example.com", "secret1");

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/analysis/ai-helper")
            .cookie(cookie.clone())
            .set_json(json!({ "content_type": "ad_copy", "prompt": "кроссовки" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let resp = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/analysis/ai-helper")
            .cookie(cookie)
            .set_json(json!({ "content_type": "poem", "prompt": "кроссовки" }))
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[actix_rt::test]
async fn logout_clears_session() {
    let state = state("http://127.0.0.1:9".to_string()).await;
    let app = app!(state);
    let cookie = log_in!(app, "seller@example.com", "secret1");

    let body: Value = test::call_and_read_body_json(
        &app,
        test::TestRequest::get()
            .uri("/auth/check")
            .cookie(cookie.clone())
            .to_request(),
    )
    .await;
    assert_eq!(body["authenticated"], json!(true));
    assert_eq!(body["user"]["email"], "seller@example.com");

    let resp = test::call_service(
        &app,
        test::TestRequest::get()
            .uri("/auth/logout")
            .cookie(cookie)
            .to_request(),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let removal = resp.response().cookies().next().map(|c| c.value().to_string());
    assert_eq!(removal.as_deref(), Some(""));
}
