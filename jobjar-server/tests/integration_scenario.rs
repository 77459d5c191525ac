use axum::http::StatusCode;
use jobjar_server::{server, storage};
use jobjar_shared::domain::{LessonCategory, Percentages};
use reqwest::Client;
use serde_json::{Value, json};
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::Path;

const LOGIN_PATH: &str = "/api/v1/auth/login";
const PARENT: (&str, &str) = ("parent", "secret123");
const ALICE: (&str, &str) = ("alice", "kidpass");
const BOB: (&str, &str) = ("bob", "bobpass");

struct TestServer {
    base: String,
    client: Client,
    handle: tokio::task::JoinHandle<()>,
    _tempdir: tempfile::TempDir,
}

impl TestServer {
    async fn spawn() -> Option<Self> {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let (addr, handle) = match start_server(&db_path).await {
            Ok(v) => v,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => {
                eprintln!("Skipping test due to sandbox restrictions: {e}");
                return None;
            }
            Err(e) => panic!("failed to start server: {e}"),
        };
        Some(Self {
            base: format!("http://{}", addr),
            client: Client::new(),
            handle,
            _tempdir: dir,
        })
    }

    async fn login_full(&self, (username, password): (&str, &str)) -> Value {
        self.request_expect(
            "POST",
            LOGIN_PATH,
            None,
            Some(json!({"username": username, "password": password})),
            StatusCode::OK,
        )
        .await
    }

    async fn login(&self, creds: (&str, &str)) -> String {
        let body = self.login_full(creds).await;
        body.get("token")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .expect("token missing from auth response")
    }

    async fn request(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let url = format!("{}{}", self.base, path);
        let mut req = match method {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "PATCH" => self.client.patch(&url),
            "DELETE" => self.client.delete(&url),
            other => panic!("unsupported method {other}"),
        };
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        if let Some(b) = body {
            req = req.json(&b);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status();
        let text = resp.text().await.unwrap();
        let val = if text.is_empty() {
            json!(null)
        } else {
            serde_json::from_str(&text).unwrap_or(json!({"raw": text}))
        };
        (status, val)
    }

    async fn request_expect(
        &self,
        method: &str,
        path: &str,
        token: Option<&str>,
        body: Option<Value>,
        expected: StatusCode,
    ) -> Value {
        let (status, value) = self.request(method, path, token, body).await;
        assert_eq!(
            status, expected,
            "{method} {path} returned {status:?} with body {value:?}",
        );
        value
    }

    /// Child id for a seeded child name, looked up through the parent API.
    async fn child_id(&self, parent: &str, name: &str) -> i64 {
        let children = self
            .request_expect("GET", "/api/v1/children", Some(parent), None, StatusCode::OK)
            .await;
        children
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["name"] == name)
            .and_then(|c| c["id"].as_i64())
            .unwrap_or_else(|| panic!("child {name} missing from {children:?}"))
    }

    async fn create_job(&self, parent: &str, child_id: i64, amount: &str) -> i64 {
        let job = self
            .request_expect(
                "POST",
                "/api/v1/jobs",
                Some(parent),
                Some(json!({
                    "title": "Wash the car",
                    "description": "Inside and out",
                    "amount": amount,
                    "assignedToId": child_id,
                })),
                StatusCode::CREATED,
            )
            .await;
        assert_eq!(job["status"], "assigned");
        assert_eq!(job["icon"], "briefcase");
        job["id"].as_i64().unwrap()
    }

    async fn child(&self, token: &str, child_id: i64) -> Value {
        self.request_expect(
            "GET",
            &format!("/api/v1/children/{child_id}"),
            Some(token),
            None,
            StatusCode::OK,
        )
        .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn hash(pwd: &str) -> String {
    bcrypt::hash(pwd, 4).unwrap()
}

async fn start_server(
    tmp_db: &Path,
) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
    let config = server::AppConfig {
        jwt_secret: "testsecret".into(),
        listen_port: None,
        dev_cors_origin: None,
        default_child_password: "password123".into(),
        seed: Some(storage::SeedConfig {
            family_name: "Testers".into(),
            account_types: None,
            parents: vec![storage::SeedParent {
                username: PARENT.0.into(),
                password_hash: hash(PARENT.1),
                name: "Pat".into(),
            }],
            children: vec![
                storage::SeedChild {
                    username: ALICE.0.into(),
                    password_hash: hash(ALICE.1),
                    name: "Alice".into(),
                    age: 10,
                    allocation: Some(Percentages::new(20, 30, 25, 25)),
                },
                storage::SeedChild {
                    username: BOB.0.into(),
                    password_hash: hash(BOB.1),
                    name: "Bob".into(),
                    age: 7,
                    allocation: None,
                },
            ],
            lessons: vec![storage::SeedLesson {
                category: LessonCategory::Saving,
                title: "Pay yourself first".into(),
                content: "Put some money aside before spending.".into(),
                video_url: None,
                quizzes: vec![storage::SeedQuiz {
                    question: "When should you save?".into(),
                    options: vec!["Never".into(), "Before spending".into()],
                    correct_answer: 1,
                }],
            }],
        }),
    };

    let store = storage::Store::connect_sqlite(tmp_db.to_str().unwrap())
        .await
        .expect("db");
    let seeded = store
        .seed_from_config(config.seed.as_ref().unwrap())
        .await
        .expect("seed");
    assert!(seeded);
    // A second run leaves the data alone
    assert!(
        !store
            .seed_from_config(config.seed.as_ref().unwrap())
            .await
            .expect("reseed")
    );

    let state = server::AppState::new(config, store);
    let app = server::router(state);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0)).await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    Ok((addr, handle))
}

fn assert_balances(child: &Value, total: &str, spending: &str, savings: &str, roth: &str, brokerage: &str) {
    assert_eq!(child["totalEarned"], total, "{child:?}");
    assert_eq!(child["spendingBalance"], spending, "{child:?}");
    assert_eq!(child["savingsBalance"], savings, "{child:?}");
    assert_eq!(child["rothIraBalance"], roth, "{child:?}");
    assert_eq!(child["brokerageBalance"], brokerage, "{child:?}");
}

#[tokio::test]
async fn public_endpoints_work() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let health = server
        .request_expect("GET", "/healthz", None, None, StatusCode::OK)
        .await;
    assert_eq!(health, json!({"raw": "ok"}));
    let version = server
        .request_expect("GET", "/api/version", None, None, StatusCode::OK)
        .await;
    assert!(version.get("version").and_then(|v| v.as_str()).is_some());

    let auth = server.login_full(PARENT).await;
    assert!(!auth["token"].as_str().unwrap().is_empty());
    assert_eq!(auth["user"]["role"], "parent");
    assert_eq!(auth["user"]["username"], "parent");

    let token = auth["token"].as_str().unwrap();
    let me = server
        .request_expect("GET", "/api/v1/auth/me", Some(token), None, StatusCode::OK)
        .await;
    assert_eq!(me["name"], "Pat");
    assert_eq!(me["familyId"], auth["user"]["familyId"]);

    server
        .request_expect(
            "POST",
            LOGIN_PATH,
            None,
            Some(json!({"username": "parent", "password": "wrong"})),
            StatusCode::UNAUTHORIZED,
        )
        .await;
    server
        .request_expect(
            "POST",
            LOGIN_PATH,
            None,
            Some(json!({"username": "nobody", "password": "x"})),
            StatusCode::UNAUTHORIZED,
        )
        .await;
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let cases: Vec<(&str, &str, Option<Value>)> = vec![
        ("GET", "/api/v1/auth/me", None),
        ("GET", "/api/v1/children", None),
        ("POST", "/api/v1/children", Some(json!({"name": "X", "age": 5}))),
        ("GET", "/api/v1/jobs", None),
        ("PATCH", "/api/v1/jobs/1", Some(json!({"status": "approved"}))),
        ("DELETE", "/api/v1/jobs/1", None),
        ("GET", "/api/v1/payments", None),
        ("PATCH", "/api/v1/payments/job/1", None),
        ("GET", "/api/v1/account-types/1", None),
        ("PUT", "/api/v1/account-types/1", None),
        ("PATCH", "/api/v1/allocation/1", None),
        ("GET", "/api/v1/lessons", None),
        ("GET", "/api/v1/dashboard-stats", None),
    ];
    for (method, path, body) in cases.iter() {
        server
            .request_expect(method, path, None, body.clone(), StatusCode::UNAUTHORIZED)
            .await;
    }
    server
        .request_expect(
            "GET",
            "/api/v1/children",
            Some("not-a-jwt"),
            None,
            StatusCode::UNAUTHORIZED,
        )
        .await;
}

#[tokio::test]
async fn approval_splits_payment_and_credits_balances() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent = server.login(PARENT).await;
    let alice = server.login(ALICE).await;
    let alice_id = server.child_id(&parent, "Alice").await;
    let job_id = server.create_job(&parent, alice_id, "10").await;
    let job_path = format!("/api/v1/jobs/{job_id}");

    // Child reports progress, but cannot approve
    let job = server
        .request_expect(
            "PATCH",
            &job_path,
            Some(&alice),
            Some(json!({"status": "in_progress"})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(job["status"], "in_progress");
    server
        .request_expect(
            "PATCH",
            &job_path,
            Some(&alice),
            Some(json!({"status": "completed"})),
            StatusCode::OK,
        )
        .await;
    server
        .request_expect(
            "PATCH",
            &job_path,
            Some(&alice),
            Some(json!({"status": "approved"})),
            StatusCode::FORBIDDEN,
        )
        .await;

    let job = server
        .request_expect(
            "PATCH",
            &job_path,
            Some(&parent),
            Some(json!({"status": "approved", "customAllocation": null})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(job["status"], "approved");
    assert_eq!(job["amount"], "10.00");

    let payment = server
        .request_expect(
            "GET",
            &format!("/api/v1/payments/job/{job_id}"),
            Some(&alice),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(payment["amount"], "10.00");
    assert_eq!(payment["spendingAmount"], "2.00");
    assert_eq!(payment["savingsAmount"], "3.00");
    assert_eq!(payment["rothIraAmount"], "2.50");
    assert_eq!(payment["brokerageAmount"], "2.50");

    let child = server.child(&alice, alice_id).await;
    assert_balances(&child, "10.00", "2.00", "3.00", "2.50", "2.50");
    assert_eq!(child["completedJobs"], 1);

    // Approving twice must not pay twice
    let err = server
        .request_expect(
            "PATCH",
            &job_path,
            Some(&parent),
            Some(json!({"status": "approved"})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(err["code"], "ALREADY_APPROVED");
    let err = server
        .request_expect(
            "PATCH",
            &job_path,
            Some(&parent),
            Some(json!({"status": "assigned"})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(err["code"], "INVALID_STATUS_TRANSITION");
    let err = server
        .request_expect(
            "PATCH",
            &job_path,
            Some(&parent),
            Some(json!({"amount": 20})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(err["code"], "ALREADY_APPROVED");

    let child = server.child(&parent, alice_id).await;
    assert_balances(&child, "10.00", "2.00", "3.00", "2.50", "2.50");

    let payments = server
        .request_expect("GET", "/api/v1/payments", Some(&parent), None, StatusCode::OK)
        .await;
    assert_eq!(payments.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn default_split_sums_to_amount() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent = server.login(PARENT).await;
    let bob_id = server.child_id(&parent, "Bob").await;
    // Bob has 25/35/20/20; 3.33 does not divide evenly
    let job_id = server.create_job(&parent, bob_id, "3.33").await;
    server
        .request_expect(
            "PATCH",
            &format!("/api/v1/jobs/{job_id}"),
            Some(&parent),
            Some(json!({"status": "approved"})),
            StatusCode::OK,
        )
        .await;
    let payment = server
        .request_expect(
            "GET",
            &format!("/api/v1/payments/job/{job_id}"),
            Some(&parent),
            None,
            StatusCode::OK,
        )
        .await;
    let total: f64 = ["spendingAmount", "savingsAmount", "rothIraAmount", "brokerageAmount"]
        .iter()
        .map(|k| payment[*k].as_str().unwrap().parse::<f64>().unwrap())
        .sum();
    assert!((total - 3.33).abs() < 1e-9, "{payment:?}");
    let child = server.child(&parent, bob_id).await;
    assert_eq!(child["totalEarned"], "3.33");
}

#[tokio::test]
async fn custom_allocation_is_validated_before_writing() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent = server.login(PARENT).await;
    let alice_id = server.child_id(&parent, "Alice").await;
    let job_id = server.create_job(&parent, alice_id, "10.00").await;
    let job_path = format!("/api/v1/jobs/{job_id}");

    let err = server
        .request_expect(
            "PATCH",
            &job_path,
            Some(&parent),
            Some(json!({
                "status": "approved",
                "customAllocation": {
                    "spendingAmount": 5,
                    "savingsAmount": 4.5,
                    "rothIraAmount": 0,
                    "brokerageAmount": 0
                }
            })),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(err["code"], "INVALID_ALLOCATION");

    // Nothing changed: still assigned, no payment, no balance
    let job = server
        .request_expect("GET", &job_path, Some(&parent), None, StatusCode::OK)
        .await;
    assert_eq!(job["status"], "assigned");
    server
        .request_expect(
            "GET",
            &format!("/api/v1/payments/job/{job_id}"),
            Some(&parent),
            None,
            StatusCode::NOT_FOUND,
        )
        .await;
    let child = server.child(&parent, alice_id).await;
    assert_balances(&child, "0.00", "0.00", "0.00", "0.00", "0.00");

    // customAllocation only makes sense when approving
    server
        .request_expect(
            "PATCH",
            &job_path,
            Some(&parent),
            Some(json!({
                "status": "completed",
                "customAllocation": {
                    "spendingAmount": 10,
                    "savingsAmount": 0,
                    "rothIraAmount": 0,
                    "brokerageAmount": 0
                }
            })),
            StatusCode::BAD_REQUEST,
        )
        .await;

    server
        .request_expect(
            "PATCH",
            &job_path,
            Some(&parent),
            Some(json!({
                "status": "approved",
                "customAllocation": {
                    "spendingAmount": "10.00",
                    "savingsAmount": "0",
                    "rothIraAmount": "0",
                    "brokerageAmount": "0"
                }
            })),
            StatusCode::OK,
        )
        .await;
    let child = server.child(&parent, alice_id).await;
    assert_balances(&child, "10.00", "10.00", "0.00", "0.00", "0.00");
}

#[tokio::test]
async fn payment_edit_and_job_delete_keep_balances_consistent() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent = server.login(PARENT).await;
    let alice_id = server.child_id(&parent, "Alice").await;
    let job_id = server.create_job(&parent, alice_id, "10").await;
    server
        .request_expect(
            "PATCH",
            &format!("/api/v1/jobs/{job_id}"),
            Some(&parent),
            Some(json!({"status": "approved"})),
            StatusCode::OK,
        )
        .await;
    let payment_path = format!("/api/v1/payments/job/{job_id}");

    let err = server
        .request_expect(
            "PATCH",
            &payment_path,
            Some(&parent),
            Some(json!({
                "spendingAmount": 1,
                "savingsAmount": 1,
                "rothIraAmount": 1,
                "brokerageAmount": 1
            })),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(err["code"], "INVALID_ALLOCATION");

    let payment = server
        .request_expect(
            "PATCH",
            &payment_path,
            Some(&parent),
            Some(json!({
                "spendingAmount": 0,
                "savingsAmount": 5,
                "rothIraAmount": 2.5,
                "brokerageAmount": 2.5
            })),
            StatusCode::OK,
        )
        .await;
    assert_eq!(payment["spendingAmount"], "0.00");
    assert_eq!(payment["savingsAmount"], "5.00");
    let child = server.child(&parent, alice_id).await;
    assert_balances(&child, "10.00", "0.00", "5.00", "2.50", "2.50");

    // A second, untouched job keeps its own credit through the delete
    let other_id = server.create_job(&parent, alice_id, "4").await;
    server
        .request_expect(
            "PATCH",
            &format!("/api/v1/jobs/{other_id}"),
            Some(&parent),
            Some(json!({"status": "approved"})),
            StatusCode::OK,
        )
        .await;

    server
        .request_expect(
            "DELETE",
            &format!("/api/v1/jobs/{job_id}"),
            Some(&parent),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    let child = server.child(&parent, alice_id).await;
    assert_balances(&child, "4.00", "0.80", "1.20", "1.00", "1.00");
    assert_eq!(child["completedJobs"], 1);
    server
        .request_expect(
            "GET",
            &payment_path,
            Some(&parent),
            None,
            StatusCode::NOT_FOUND,
        )
        .await;
    server
        .request_expect(
            "DELETE",
            &format!("/api/v1/jobs/{job_id}"),
            Some(&parent),
            None,
            StatusCode::NOT_FOUND,
        )
        .await;
}

#[tokio::test]
async fn account_type_toggle_redistributes_allocations() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let auth = server.login_full(PARENT).await;
    let parent = auth["token"].as_str().unwrap().to_string();
    let family_id = auth["user"]["familyId"].as_i64().unwrap();
    let alice_id = server.child_id(&parent, "Alice").await;
    let types_path = format!("/api/v1/account-types/{family_id}");
    let alloc_path = format!("/api/v1/allocation/{alice_id}");

    let types = server
        .request_expect("GET", &types_path, Some(&parent), None, StatusCode::OK)
        .await;
    assert_eq!(types["spendingEnabled"], true);
    assert_eq!(types["brokerageEnabled"], true);

    let two = json!({
        "spendingEnabled": true,
        "savingsEnabled": true,
        "rothIraEnabled": false,
        "brokerageEnabled": false
    });
    for _ in 0..2 {
        let types = server
            .request_expect("PUT", &types_path, Some(&parent), Some(two.clone()), StatusCode::OK)
            .await;
        assert_eq!(types["rothIraEnabled"], false);
        let alloc = server
            .request_expect("GET", &alloc_path, Some(&parent), None, StatusCode::OK)
            .await;
        assert_eq!(alloc["spendingPercentage"], 50);
        assert_eq!(alloc["savingsPercentage"], 50);
        assert_eq!(alloc["rothIraPercentage"], 0);
        assert_eq!(alloc["brokeragePercentage"], 0);
    }

    let err = server
        .request_expect(
            "PATCH",
            &alloc_path,
            Some(&parent),
            Some(json!({
                "spendingPercentage": 40,
                "savingsPercentage": 50,
                "rothIraPercentage": 0,
                "brokeragePercentage": 10
            })),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(err["code"], "INVALID_PERCENTAGES");
    let alloc = server
        .request_expect(
            "PATCH",
            &alloc_path,
            Some(&parent),
            Some(json!({
                "spendingPercentage": 60,
                "savingsPercentage": 40,
                "rothIraPercentage": 0,
                "brokeragePercentage": 0
            })),
            StatusCode::OK,
        )
        .await;
    assert_eq!(alloc["spendingPercentage"], 60);

    server
        .request_expect(
            "PUT",
            &types_path,
            Some(&parent),
            Some(json!({
                "spendingEnabled": true,
                "savingsEnabled": true,
                "rothIraEnabled": true,
                "brokerageEnabled": false
            })),
            StatusCode::OK,
        )
        .await;
    let alloc = server
        .request_expect("GET", &alloc_path, Some(&parent), None, StatusCode::OK)
        .await;
    assert_eq!(alloc["spendingPercentage"], 34);
    assert_eq!(alloc["savingsPercentage"], 33);
    assert_eq!(alloc["rothIraPercentage"], 33);
    assert_eq!(alloc["brokeragePercentage"], 0);

    let err = server
        .request_expect(
            "PUT",
            &types_path,
            Some(&parent),
            Some(json!({
                "spendingEnabled": false,
                "savingsEnabled": false,
                "rothIraEnabled": false,
                "brokerageEnabled": false
            })),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(err["code"], "NO_ACCOUNTS_ENABLED");
    let types = server
        .request_expect("GET", &types_path, Some(&parent), None, StatusCode::OK)
        .await;
    assert_eq!(types["rothIraEnabled"], true);

    server
        .request_expect(
            "GET",
            &format!("/api/v1/account-types/{}", family_id + 1),
            Some(&parent),
            None,
            StatusCode::FORBIDDEN,
        )
        .await;
}

#[tokio::test]
async fn allocation_without_account_types_needs_full_hundred() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent = server.login(PARENT).await;
    let bob_id = server.child_id(&parent, "Bob").await;
    let alloc_path = format!("/api/v1/allocation/{bob_id}");

    let alloc = server
        .request_expect("GET", &alloc_path, Some(&parent), None, StatusCode::OK)
        .await;
    assert_eq!(alloc["spendingPercentage"], 25);
    assert_eq!(alloc["savingsPercentage"], 35);

    for bad in [
        json!({"spendingPercentage": 50, "savingsPercentage": 50, "rothIraPercentage": 10, "brokeragePercentage": 0}),
        json!({"spendingPercentage": 120, "savingsPercentage": -20, "rothIraPercentage": 0, "brokeragePercentage": 0}),
    ] {
        let err = server
            .request_expect("PATCH", &alloc_path, Some(&parent), Some(bad), StatusCode::BAD_REQUEST)
            .await;
        assert_eq!(err["code"], "INVALID_PERCENTAGES");
    }
    server
        .request_expect(
            "PATCH",
            &alloc_path,
            Some(&parent),
            Some(json!({"spendingPercentage": 10, "savingsPercentage": 20, "rothIraPercentage": 30, "brokeragePercentage": 40})),
            StatusCode::OK,
        )
        .await;
}

#[tokio::test]
async fn malformed_bodies_and_oversized_amounts_get_coded_400s() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let auth = server.login_full(PARENT).await;
    let parent = auth["token"].as_str().unwrap().to_string();
    let family_id = auth["user"]["familyId"].as_i64().unwrap();
    let alice_id = server.child_id(&parent, "Alice").await;
    let job_id = server.create_job(&parent, alice_id, "10").await;
    server
        .request_expect(
            "PATCH",
            &format!("/api/v1/jobs/{job_id}"),
            Some(&parent),
            Some(json!({"status": "approved"})),
            StatusCode::OK,
        )
        .await;

    let cases = [
        (
            format!("/api/v1/payments/job/{job_id}"),
            json!({"spendingAmount": 10, "savingsAmount": 0}),
        ),
        (
            format!("/api/v1/allocation/{alice_id}"),
            json!({"spendingPercentage": "lots", "savingsPercentage": 0, "rothIraPercentage": 0, "brokeragePercentage": 0}),
        ),
    ];
    for (path, body) in cases {
        let err = server
            .request_expect("PATCH", &path, Some(&parent), Some(body), StatusCode::BAD_REQUEST)
            .await;
        assert_eq!(err["code"], "INVALID_BODY", "{path}: {err:?}");
    }
    let err = server
        .request_expect(
            "PUT",
            &format!("/api/v1/account-types/{family_id}"),
            Some(&parent),
            Some(json!({"spendingEnabled": true})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    assert_eq!(err["code"], "INVALID_BODY");

    for amount in ["1000000.01", "79000000000000000000000000000"] {
        let err = server
            .request_expect(
                "POST",
                "/api/v1/jobs",
                Some(&parent),
                Some(json!({"title": "Build a shed", "amount": amount, "assignedToId": alice_id})),
                StatusCode::BAD_REQUEST,
            )
            .await;
        assert_eq!(err["code"], "INVALID_AMOUNT", "{amount}: {err:?}");
    }

    // Nothing above touched the approved payment or the balances
    let child = server.child(&parent, alice_id).await;
    assert_balances(&child, "10.00", "2.00", "3.00", "2.50", "2.50");
}

#[tokio::test]
async fn child_access_control() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent = server.login(PARENT).await;
    let alice = server.login(ALICE).await;
    let alice_id = server.child_id(&parent, "Alice").await;
    let bob_id = server.child_id(&parent, "Bob").await;
    let alice_job = server.create_job(&parent, alice_id, "2").await;
    let bob_job = server.create_job(&parent, bob_id, "3").await;

    let jobs = server
        .request_expect("GET", "/api/v1/jobs", Some(&alice), None, StatusCode::OK)
        .await;
    let jobs = jobs.as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["id"], alice_job);

    let denied: Vec<(&str, String, Option<Value>)> = vec![
        (
            "POST",
            "/api/v1/jobs".into(),
            Some(json!({"title": "x", "amount": 1, "assignedToId": alice_id})),
        ),
        ("GET", format!("/api/v1/jobs/{bob_job}"), None),
        (
            "PATCH",
            format!("/api/v1/jobs/{bob_job}"),
            Some(json!({"status": "completed"})),
        ),
        (
            "PATCH",
            format!("/api/v1/jobs/{alice_job}"),
            Some(json!({"title": "Easier chore"})),
        ),
        ("DELETE", format!("/api/v1/jobs/{alice_job}"), None),
        ("GET", format!("/api/v1/children/{bob_id}"), None),
        ("GET", format!("/api/v1/allocation/{bob_id}"), None),
        (
            "PATCH",
            format!("/api/v1/allocation/{alice_id}"),
            Some(json!({"spendingPercentage": 100, "savingsPercentage": 0, "rothIraPercentage": 0, "brokeragePercentage": 0})),
        ),
        (
            "POST",
            "/api/v1/children".into(),
            Some(json!({"name": "Eve", "age": 5})),
        ),
        (
            "PATCH",
            format!("/api/v1/payments/job/{alice_job}"),
            Some(json!({"spendingAmount": 2, "savingsAmount": 0, "rothIraAmount": 0, "brokerageAmount": 0})),
        ),
        ("GET", format!("/api/v1/learning-progress?childId={bob_id}"), None),
        (
            "POST",
            "/api/v1/achievements".into(),
            Some(json!({"childId": alice_id, "title": "Self award", "description": "x"})),
        ),
    ];
    for (method, path, body) in denied {
        server
            .request_expect(method, &path, Some(&alice), body, StatusCode::FORBIDDEN)
            .await;
    }

    server
        .request_expect(
            "GET",
            &format!("/api/v1/allocation/{alice_id}"),
            Some(&alice),
            None,
            StatusCode::OK,
        )
        .await;
}

#[tokio::test]
async fn child_lifecycle_and_learning() {
    let Some(server) = TestServer::spawn().await else {
        return;
    };
    let parent = server.login(PARENT).await;

    let child = server
        .request_expect(
            "POST",
            "/api/v1/children",
            Some(&parent),
            Some(json!({"name": "Mary Jane", "age": 8})),
            StatusCode::CREATED,
        )
        .await;
    let mary_id = child["id"].as_i64().unwrap();
    assert_balances(&child, "0.00", "0.00", "0.00", "0.00", "0.00");
    server
        .request_expect(
            "POST",
            "/api/v1/children",
            Some(&parent),
            Some(json!({"name": "maryjane", "age": 9})),
            StatusCode::BAD_REQUEST,
        )
        .await;

    let mary = server.login(("maryjane", "password123")).await;
    let alloc = server
        .request_expect(
            "GET",
            &format!("/api/v1/allocation/{mary_id}"),
            Some(&mary),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(alloc["spendingPercentage"], 25);
    assert_eq!(alloc["savingsPercentage"], 35);
    assert_eq!(alloc["rothIraPercentage"], 20);
    assert_eq!(alloc["brokeragePercentage"], 20);

    let updated = server
        .request_expect(
            "PATCH",
            &format!("/api/v1/children/{mary_id}"),
            Some(&parent),
            Some(json!({"age": 9})),
            StatusCode::OK,
        )
        .await;
    assert_eq!(updated["age"], 9);
    assert_eq!(updated["name"], "Mary Jane");

    // Lessons: the seeded one plus a family lesson
    let lessons = server
        .request_expect("GET", "/api/v1/lessons", Some(&mary), None, StatusCode::OK)
        .await;
    let lesson_id = lessons[0]["id"].as_i64().unwrap();
    assert_eq!(lessons[0]["isCustom"], false);
    server
        .request_expect(
            "POST",
            "/api/v1/lessons",
            Some(&parent),
            Some(json!({"category": "investing", "title": "Index funds", "content": "Own a bit of everything."})),
            StatusCode::CREATED,
        )
        .await;
    let investing = server
        .request_expect(
            "GET",
            "/api/v1/lessons?category=investing",
            Some(&mary),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(investing.as_array().unwrap().len(), 1);
    assert_eq!(investing[0]["isCustom"], true);

    let quizzes = server
        .request_expect(
            "GET",
            &format!("/api/v1/lessons/{lesson_id}/quizzes"),
            Some(&mary),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(quizzes[0]["options"], json!(["Never", "Before spending"]));
    assert_eq!(quizzes[0]["correctAnswer"], 1);

    let progress_path = format!("/api/v1/lessons/{lesson_id}/progress");
    server
        .request_expect(
            "POST",
            &progress_path,
            Some(&mary),
            Some(json!({"quizScore": 101})),
            StatusCode::BAD_REQUEST,
        )
        .await;
    for _ in 0..2 {
        let progress = server
            .request_expect(
                "POST",
                &progress_path,
                Some(&mary),
                Some(json!({"quizScore": 80})),
                StatusCode::OK,
            )
            .await;
        assert_eq!(progress["completed"], true);
        assert_eq!(progress["quizScore"], 80);
    }
    let child = server.child(&mary, mary_id).await;
    assert_eq!(child["learningStreak"], 1);

    server
        .request_expect(
            "GET",
            "/api/v1/learning-progress",
            Some(&parent),
            None,
            StatusCode::BAD_REQUEST,
        )
        .await;
    let progress = server
        .request_expect(
            "GET",
            &format!("/api/v1/learning-progress?childId={mary_id}"),
            Some(&parent),
            None,
            StatusCode::OK,
        )
        .await;
    assert_eq!(progress.as_array().unwrap().len(), 1);

    server
        .request_expect(
            "POST",
            "/api/v1/achievements",
            Some(&parent),
            Some(json!({"childId": mary_id, "title": "First lesson", "description": "Finished a lesson"})),
            StatusCode::CREATED,
        )
        .await;
    let job_id = server.create_job(&parent, mary_id, "1.50").await;

    let stats = server
        .request_expect("GET", "/api/v1/dashboard-stats", Some(&mary), None, StatusCode::OK)
        .await;
    assert_eq!(stats["child"]["id"], mary_id);
    assert_eq!(stats["learningStreak"], 1);
    assert_eq!(stats["achievements"][0]["icon"], "trophy");
    assert_eq!(stats["activeJobs"][0]["id"], job_id);
    assert_eq!(stats["allocation"]["savingsPercentage"], 35);

    server
        .request_expect(
            "DELETE",
            &format!("/api/v1/children/{mary_id}"),
            Some(&parent),
            None,
            StatusCode::NO_CONTENT,
        )
        .await;
    server
        .request_expect(
            "GET",
            &format!("/api/v1/children/{mary_id}"),
            Some(&parent),
            None,
            StatusCode::NOT_FOUND,
        )
        .await;
    server
        .request_expect(
            "GET",
            &format!("/api/v1/jobs/{job_id}"),
            Some(&parent),
            None,
            StatusCode::NOT_FOUND,
        )
        .await;
    // The deleted child's token no longer works
    server
        .request_expect("GET", "/api/v1/jobs", Some(&mary), None, StatusCode::UNAUTHORIZED)
        .await;
}
