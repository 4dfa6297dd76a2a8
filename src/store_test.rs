use super::*;
use crate::storage::MemoryStorage;
use reqwest::Method;
use serde_json::{Value, json};
use std::time::Duration;

// =========================================================================
// MockTransport
// =========================================================================

enum Reply {
    Json(Value),
    Status(u16, &'static str),
    Down,
}

struct Scripted {
    path: String,
    delay: Duration,
    reply: Reply,
}

#[derive(Default)]
struct MockTransport {
    script: Mutex<Vec<Scripted>>,
    seen: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn reply(&self, path: &str, reply: Reply) {
        self.reply_after(path, Duration::ZERO, reply);
    }

    fn reply_after(&self, path: &str, delay: Duration, reply: Reply) {
        self.script
            .lock()
            .unwrap()
            .push(Scripted { path: path.to_owned(), delay, reply });
    }

    fn seen(&self) -> Vec<ApiRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: ApiRequest) -> Result<Value, StoreError> {
        self.seen.lock().unwrap().push(request.clone());
        let scripted = {
            let mut script = self.script.lock().unwrap();
            script
                .iter()
                .position(|s| s.path == request.path)
                .map(|index| script.remove(index))
        };
        let Some(scripted) = scripted else {
            return Err(StoreError::Status { status: 404, body: String::new() });
        };
        if !scripted.delay.is_zero() {
            tokio::time::sleep(scripted.delay).await;
        }
        match scripted.reply {
            Reply::Json(value) => Ok(value),
            Reply::Status(status, body) => Err(StoreError::Status { status, body: body.to_owned() }),
            Reply::Down => Err(StoreError::Transport("connection refused".to_owned())),
        }
    }
}

/// Memory storage whose `set` blocks the calling thread for `delay`.
struct SlowSetStorage {
    inner: MemoryStorage,
    delay: Duration,
}

impl TokenStorage for SlowSetStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        std::thread::sleep(self.delay);
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key)
    }
}

fn store_with(mock: &Arc<MockTransport>, storage: &Arc<MemoryStorage>, options: StoreOptions) -> Store {
    Store::new(mock.clone(), storage.clone(), options)
}

fn plain_store(mock: &Arc<MockTransport>) -> Store {
    store_with(mock, &Arc::new(MemoryStorage::new()), StoreOptions::default())
}

fn fenced_store(mock: &Arc<MockTransport>) -> Store {
    store_with(mock, &Arc::new(MemoryStorage::new()), StoreOptions { fence_stale_responses: true })
}

fn ok(data: Value) -> Reply {
    Reply::Json(json!({ "code": 0, "msg": "请求成功", "data": data }))
}

fn post_json(id: &str, column: &str) -> Value {
    json!({ "_id": id, "title": format!("post {id}"), "column": column })
}

fn credentials() -> LoginPayload {
    LoginPayload { email: "viking@test.com".into(), password: "111111".into() }
}

// =========================================================================
// fetch dispatchers
// =========================================================================

#[tokio::test]
async fn fetch_columns_replaces_columns_and_returns_envelope() {
    let mock = MockTransport::new();
    mock.reply("/columns", ok(json!({ "list": [{ "_id": "c1", "title": "A" }, { "_id": "c2", "title": "B" }] })));
    let store = plain_store(&mock);

    let env = store.fetch_columns().await.unwrap();
    assert_eq!(env.data.list.len(), 2);
    assert_eq!(store.snapshot().columns, env.data.list);

    let seen = mock.seen();
    assert_eq!(seen[0].method, Method::GET);
    assert!(seen[0].bearer.is_none());
}

#[tokio::test]
async fn fetch_column_discards_prior_list() {
    let mock = MockTransport::new();
    mock.reply("/columns", ok(json!({ "list": [{ "_id": "a", "title": "A" }, { "_id": "b", "title": "B" }] })));
    mock.reply("/columns/x", ok(json!({ "_id": "x", "title": "T" })));
    let store = plain_store(&mock);

    store.fetch_columns().await.unwrap();
    store.fetch_column("x").await.unwrap();

    let columns = store.snapshot().columns;
    assert_eq!(columns.len(), 1);
    assert_eq!(columns[0].id, "x");
    assert_eq!(columns[0].title, "T");
    assert_eq!(store.column_by_id("x").map(|c| c.title), Some("T".to_owned()));
    assert!(store.column_by_id("a").is_none());
}

#[tokio::test]
async fn fetch_posts_uses_column_path_and_feeds_deriver() {
    let mock = MockTransport::new();
    mock.reply("/columns/c1/posts", ok(json!({ "list": [post_json("1", "c1"), post_json("2", "c2")] })));
    let store = plain_store(&mock);

    store.fetch_posts("c1").await.unwrap();
    let in_c1 = store.posts_by_column_id("c1");
    assert_eq!(in_c1.len(), 1);
    assert_eq!(in_c1[0].id.as_deref(), Some("1"));
    assert_eq!(store.post_by_id("2").map(|p| p.column), Some("c2".to_owned()));
}

#[tokio::test]
async fn failed_request_commits_nothing() {
    let mock = MockTransport::new();
    mock.reply("/columns/c1/posts", ok(json!({ "list": [post_json("1", "c1")] })));
    mock.reply("/posts/9", Reply::Status(500, "boom"));
    mock.reply("/posts/8", Reply::Down);
    let store = plain_store(&mock);
    store.fetch_posts("c1").await.unwrap();

    let err = store.fetch_post("9").await.unwrap_err();
    assert!(matches!(err, StoreError::Status { status: 500, .. }));
    let err = store.fetch_post("8").await.unwrap_err();
    assert!(matches!(err, StoreError::Transport(_)));

    assert_eq!(store.snapshot().posts.len(), 1);
    assert!(!store.snapshot().error.status, "request helper never sets the error field");
}

#[tokio::test]
async fn malformed_envelope_is_decode_error() {
    let mock = MockTransport::new();
    mock.reply("/columns", Reply::Json(json!({ "code": 0, "msg": "ok" })));
    let store = plain_store(&mock);

    let err = store.fetch_columns().await.unwrap_err();
    assert_eq!(err.error_code(), "E_DECODE");
    assert!(store.snapshot().columns.is_empty());
}

// =========================================================================
// post edits
// =========================================================================

#[tokio::test]
async fn create_update_delete_post_round() {
    let mock = MockTransport::new();
    mock.reply("/columns/c1/posts", ok(json!({ "list": [post_json("1", "c1"), post_json("2", "c1")] })));
    mock.reply("/posts", ok(post_json("3", "c1")));
    mock.reply("/posts/2", ok(json!({ "_id": "2", "title": "edited", "column": "c1" })));
    mock.reply("/posts/1", ok(post_json("1", "c1")));
    let store = plain_store(&mock);
    store.fetch_posts("c1").await.unwrap();

    let payload = PostPayload { title: Some("post 3".into()), column: Some("c1".into()), ..PostPayload::default() };
    store.create_post(&payload).await.unwrap();
    let ids: Vec<_> = store.snapshot().posts.into_iter().filter_map(|p| p.id).collect();
    assert_eq!(ids, vec!["1", "2", "3"]);

    let edit = PostPayload { title: Some("edited".into()), ..PostPayload::default() };
    store.update_post("2", &edit).await.unwrap();
    assert_eq!(store.post_by_id("2").map(|p| p.title), Some("edited".to_owned()));
    assert_eq!(store.snapshot().posts.len(), 3);

    store.delete_post("1").await.unwrap();
    let ids: Vec<_> = store.snapshot().posts.into_iter().filter_map(|p| p.id).collect();
    assert_eq!(ids, vec!["2", "3"]);

    let seen = mock.seen();
    assert_eq!(seen[1].method, Method::POST);
    assert_eq!(seen[1].body, Some(json!({ "title": "post 3", "column": "c1" })));
    assert_eq!(seen[2].method, Method::PATCH);
    assert_eq!(seen[2].path, "/posts/2");
    assert_eq!(seen[2].body, Some(json!({ "title": "edited" })));
    assert_eq!(seen[3].method, Method::DELETE);
}

#[tokio::test]
async fn delete_post_accepts_id_only_response() {
    let mock = MockTransport::new();
    mock.reply("/columns/c1/posts", ok(json!({ "list": [post_json("1", "c1"), post_json("2", "c1")] })));
    mock.reply("/posts/1", ok(json!({ "_id": "1" })));
    let store = plain_store(&mock);
    store.fetch_posts("c1").await.unwrap();

    let env = store.delete_post("1").await.unwrap();
    assert_eq!(env.data.id, "1");
    let ids: Vec<_> = store.snapshot().posts.into_iter().filter_map(|p| p.id).collect();
    assert_eq!(ids, vec!["2"]);
}

// =========================================================================
// auth
// =========================================================================

#[tokio::test]
async fn login_persists_token_and_authorizes_later_requests() {
    let mock = MockTransport::new();
    mock.reply("/user/login", ok(json!({ "token": "jwt-1" })));
    mock.reply("/user/current", ok(json!({ "_id": "u1", "nickName": "viking", "column": "c1" })));
    let storage = Arc::new(MemoryStorage::new());
    let store = store_with(&mock, &storage, StoreOptions::default());

    let user = store.login_and_fetch(&credentials()).await.unwrap();
    assert_eq!(user.data.nick_name.as_deref(), Some("viking"));

    let state = store.snapshot();
    assert_eq!(state.token, "jwt-1");
    assert!(state.user.is_login);
    assert_eq!(state.user.column.as_deref(), Some("c1"));
    assert_eq!(storage.get(TOKEN_STORAGE_KEY).unwrap().as_deref(), Some("jwt-1"));

    let seen = mock.seen();
    assert_eq!(seen[0].body, Some(json!({ "email": "viking@test.com", "password": "111111" })));
    assert!(seen[0].bearer.is_none());
    assert_eq!(seen[1].bearer.as_deref(), Some("jwt-1"));
}

#[tokio::test]
async fn restored_token_is_sent_from_start() {
    let mock = MockTransport::new();
    mock.reply("/user/current", ok(json!({ "_id": "u1" })));
    let storage = Arc::new(MemoryStorage::with_entry(TOKEN_STORAGE_KEY, "saved"));
    let store = store_with(&mock, &storage, StoreOptions::default());

    assert_eq!(store.snapshot().token, "saved");
    store.fetch_current_user().await.unwrap();
    assert_eq!(mock.seen()[0].bearer.as_deref(), Some("saved"));
}

#[tokio::test]
async fn logout_clears_token_everywhere() {
    let mock = MockTransport::new();
    mock.reply("/user/login", ok(json!({ "token": "jwt-1" })));
    mock.reply("/columns", ok(json!({ "list": [] })));
    let storage = Arc::new(MemoryStorage::new());
    let store = store_with(&mock, &storage, StoreOptions::default());

    store.login(&credentials()).await.unwrap();
    store.logout();

    let state = store.snapshot();
    assert_eq!(state.token, "");
    assert_eq!(state.user, User::default());
    assert_eq!(storage.get(TOKEN_STORAGE_KEY).unwrap(), None);

    store.fetch_columns().await.unwrap();
    assert!(mock.seen()[1].bearer.is_none());
}

#[tokio::test]
async fn login_and_fetch_stops_when_login_fails() {
    let mock = MockTransport::new();
    mock.reply("/user/login", Reply::Status(401, r#"{"error":"wrong password"}"#));
    let store = plain_store(&mock);

    let err = store.login_and_fetch(&credentials()).await.unwrap_err();
    assert_eq!(err.user_message(), "wrong password");
    assert_eq!(mock.seen().len(), 1);
    assert!(store.snapshot().token.is_empty());
}

#[tokio::test]
async fn login_and_fetch_keeps_token_when_profile_fails() {
    let mock = MockTransport::new();
    mock.reply("/user/login", ok(json!({ "token": "jwt-1" })));
    mock.reply("/user/current", Reply::Down);
    let store = plain_store(&mock);

    assert!(store.login_and_fetch(&credentials()).await.is_err());
    let state = store.snapshot();
    assert_eq!(state.token, "jwt-1");
    assert!(!state.user.is_login);
}

// =========================================================================
// ordering and fencing
// =========================================================================

#[tokio::test]
async fn concurrent_fetches_commit_in_completion_order() {
    let mock = MockTransport::new();
    mock.reply_after("/posts/slow", Duration::from_millis(80), ok(post_json("slow", "c1")));
    mock.reply_after("/posts/fast", Duration::from_millis(5), ok(post_json("fast", "c1")));
    let store = plain_store(&mock);

    let (slow, fast) = tokio::join!(store.fetch_post("slow"), store.fetch_post("fast"));
    assert!(slow.is_ok());
    assert!(fast.is_ok());

    let posts = store.snapshot().posts;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].id.as_deref(), Some("slow"));
}

#[tokio::test]
async fn fencing_drops_stale_response() {
    let mock = MockTransport::new();
    mock.reply_after("/posts/slow", Duration::from_millis(80), ok(post_json("slow", "c1")));
    mock.reply_after("/posts/fast", Duration::from_millis(5), ok(post_json("fast", "c1")));
    let store = fenced_store(&mock);

    let (slow, fast) = tokio::join!(store.fetch_post("slow"), store.fetch_post("fast"));
    assert!(matches!(slow, Err(StoreError::Superseded { mutation: "fetchPost" })));
    assert!(fast.is_ok());

    let posts = store.snapshot().posts;
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].id.as_deref(), Some("fast"));
}

#[tokio::test]
async fn fencing_keeps_incremental_edits() {
    let mock = MockTransport::new();
    mock.reply_after("/posts", Duration::from_millis(60), ok(post_json("new", "c1")));
    mock.reply("/columns/c1/posts", ok(json!({ "list": [post_json("1", "c1")] })));
    let store = fenced_store(&mock);

    let payload = PostPayload { title: Some("new".into()), ..PostPayload::default() };
    let (created, listed) = tokio::join!(store.create_post(&payload), store.fetch_posts("c1"));
    assert!(created.is_ok());
    assert!(listed.is_ok());
    assert_eq!(store.snapshot().posts.len(), 2);
}

#[tokio::test]
async fn fencing_logout_beats_in_flight_login() {
    let mock = MockTransport::new();
    mock.reply_after("/user/login", Duration::from_millis(60), ok(json!({ "token": "late" })));
    let storage = Arc::new(MemoryStorage::new());
    let store = store_with(&mock, &storage, StoreOptions { fence_stale_responses: true });

    let credentials = credentials();
    let login = store.login(&credentials);
    let logout = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.logout();
    };
    let (login, ()) = tokio::join!(login, logout);

    assert!(matches!(login, Err(StoreError::Superseded { mutation: "login" })));
    assert!(store.snapshot().token.is_empty());
    assert_eq!(storage.get(TOKEN_STORAGE_KEY).unwrap(), None);
}

// =========================================================================
// tracked
// =========================================================================

#[tokio::test]
async fn tracked_success_clears_error_and_loading() {
    let mock = MockTransport::new();
    mock.reply("/columns", ok(json!({ "list": [] })));
    let store = plain_store(&mock);
    store.set_error(GlobalError::raised("old"));

    store.tracked(store.fetch_columns()).await.unwrap();
    let state = store.snapshot();
    assert!(!state.loading);
    assert_eq!(state.error, GlobalError::default());
}

#[tokio::test]
async fn tracked_raises_loading_while_in_flight() {
    let mock = MockTransport::new();
    mock.reply_after("/columns", Duration::from_millis(40), ok(json!({ "list": [] })));
    let store = plain_store(&mock);

    let observer = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.snapshot().loading
    };
    let (result, loading_mid_flight) = tokio::join!(store.tracked(store.fetch_columns()), observer);
    assert!(result.is_ok());
    assert!(loading_mid_flight);
    assert!(!store.snapshot().loading);
}

#[tokio::test]
async fn tracked_failure_records_backend_message() {
    let mock = MockTransport::new();
    mock.reply("/posts/1", Reply::Status(404, r#"{"error":"post not found"}"#));
    let store = plain_store(&mock);

    assert!(store.tracked(store.fetch_post("1")).await.is_err());
    let state = store.snapshot();
    assert!(!state.loading);
    assert_eq!(state.error, GlobalError::raised("post not found"));
}

// =========================================================================
// token persistence ordering
// =========================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn logout_after_visible_login_wins_in_storage() {
    let mock = MockTransport::new();
    mock.reply("/user/login", ok(json!({ "token": "jwt-1" })));
    let storage = Arc::new(SlowSetStorage { inner: MemoryStorage::new(), delay: Duration::from_millis(150) });
    let store = Store::new(mock.clone(), storage.clone(), StoreOptions::default());

    let login = tokio::spawn({
        let store = store.clone();
        async move { store.login(&credentials()).await }
    });

    tokio::time::timeout(Duration::from_secs(5), async {
        while store.snapshot().token.is_empty() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("login never committed");
    store.logout();
    login.await.unwrap().unwrap();

    assert!(store.snapshot().token.is_empty());
    assert_eq!(storage.get(TOKEN_STORAGE_KEY).unwrap(), None);
}
