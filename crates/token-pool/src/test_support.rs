//! In-process mock token endpoint shared by the pool tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::routing::get;
use tokio::net::TcpListener;
use wechat_auth::TokenClient;

use crate::holder::{RefreshSettings, TokenHolder};

/// What the mock endpoint answers with.
#[derive(Debug, Clone)]
pub(crate) enum MockReply {
    /// Same token on every call
    Token { access_token: String, expires_in: i64 },
    /// `tok-{appid}-{n}` where `n` counts calls for that app
    Numbered { expires_in: i64 },
    /// Error payload without `access_token`
    Error { errcode: i64, errmsg: String },
}

#[derive(Clone)]
struct MockState {
    reply: Arc<Mutex<MockReply>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

pub(crate) struct MockTokenServer {
    pub url: String,
    state: MockState,
    _task: tokio::task::JoinHandle<()>,
}

impl MockTokenServer {
    pub async fn start(reply: MockReply) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = MockState {
            reply: Arc::new(Mutex::new(reply)),
            hits: Arc::new(Mutex::new(HashMap::new())),
        };

        let app = axum::Router::new()
            .route("/cgi-bin/token", get(token_handler))
            .with_state(state.clone());
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}/cgi-bin/token"),
            state,
            _task: task,
        }
    }

    pub fn set_reply(&self, reply: MockReply) {
        *self.state.reply.lock().unwrap() = reply;
    }

    pub fn hits(&self, app_id: &str) -> usize {
        self.state
            .hits
            .lock()
            .unwrap()
            .get(app_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn client(&self) -> TokenClient {
        TokenClient::with_timeout(self.url.clone(), Duration::from_secs(5)).unwrap()
    }

    pub fn holder(&self, app_id: &str, settings: RefreshSettings) -> TokenHolder {
        TokenHolder::new(
            wechat_auth::Credential::new(app_id, format!("secret-{app_id}")),
            self.client(),
            settings,
        )
    }
}

async fn token_handler(
    State(state): State<MockState>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::Json<serde_json::Value> {
    let app_id = params.get("appid").cloned().unwrap_or_default();
    let n = {
        let mut hits = state.hits.lock().unwrap();
        let count = hits.entry(app_id.clone()).or_insert(0);
        *count += 1;
        *count
    };

    let reply = state.reply.lock().unwrap().clone();
    let body = match reply {
        MockReply::Token {
            access_token,
            expires_in,
        } => serde_json::json!({ "access_token": access_token, "expires_in": expires_in }),
        MockReply::Numbered { expires_in } => {
            serde_json::json!({ "access_token": format!("tok-{app_id}-{n}"), "expires_in": expires_in })
        }
        MockReply::Error { errcode, errmsg } => {
            serde_json::json!({ "errcode": errcode, "errmsg": errmsg })
        }
    };
    axum::Json(body)
}

/// Poll `check` until it holds or `timeout` elapses.
pub(crate) async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
