use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use chrono::Utc;
use serde_json::Value;
use sqlx::SqlitePool;
use tempfile::TempDir;
use tower::ServiceExt;

use action_log_tracker::{
    config::Config,
    db::connect_and_bootstrap,
    handlers::router,
    notify::SmsNotifier,
    state::AppState,
};

pub struct TestApp {
    pub app: Router,
    pub db: SqlitePool,
    _temp_dir: TempDir,
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("request should execute");
        let status = response.status();
        let body = to_bytes(response.into_body(), 1024 * 1024)
            .await
            .expect("response body should be readable");
        let parsed = serde_json::from_slice::<Value>(&body).unwrap_or(Value::Null);
        (status, parsed)
    }

    /// Users are provisioned out of band in production; tests seed them
    /// straight into the table.
    pub async fn seed_user(
        &self,
        id: &str,
        role: &str,
        designation: &str,
        department_id: Option<&str>,
        department_unit_id: Option<&str>,
    ) {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO users (
              id, username, first_name, last_name, email, phone_number, role,
              designation, department_id, department_unit_id, is_active, created_at, updated_at
            ) VALUES (?1, ?2, ?3, '', '', '', ?4, ?5, ?6, ?7, 1, ?8, ?8)
            "#,
        )
        .bind(id)
        .bind(id)
        .bind(id)
        .bind(role)
        .bind(designation)
        .bind(department_id)
        .bind(department_unit_id)
        .bind(now)
        .execute(&self.db)
        .await
        .expect("user should seed");
    }
}

pub async fn build_test_app() -> TestApp {
    let temp_dir = TempDir::new().expect("temp directory should be created");
    let db_path = temp_dir.path().join("test-action-logs.db");
    let db_url = format!("sqlite://{}", db_path.display());

    let config = Config {
        bind_addr: "127.0.0.1:0".to_string(),
        database_url: db_url,
        sms_gateway_url: None,
        sms_gateway_token: None,
        sms_from_number: "+10000000000".to_string(),
        delegation_sweep_interval_secs: 300,
    };

    let db = connect_and_bootstrap(&config)
        .await
        .expect("db bootstrap should succeed");
    let notifier = SmsNotifier::from_config(&config);

    let state = AppState {
        config,
        db: db.clone(),
        notifier,
    };
    let app = router(state);

    TestApp {
        app,
        db,
        _temp_dir: temp_dir,
    }
}

pub fn json_request(method: &str, uri: &str, user_id: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", user_id)
        .body(Body::from(body.to_string()))
        .expect("request should build")
}

pub fn get_request(uri: &str, user_id: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-user-id", user_id)
        .body(Body::empty())
        .expect("request should build")
}
