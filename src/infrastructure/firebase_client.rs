// Firebase Realtime Database client over the REST and streaming APIs
use crate::application::state_client::{
    PayloadListener, RemoteStateClient, SensorFeed, StateListener, Subscription,
};
use crate::domain::device_state::DeviceState;
use crate::domain::error::SyncError;
use crate::infrastructure::sse::SseDecoder;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        SyncError::Connectivity(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct FirebaseClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
    state_path: String,
    sensor_path: String,
    reconnect_delay: Duration,
    request_timeout: Duration,
    /// True while the device record stream is delivering events
    state_stream_live: Arc<watch::Sender<bool>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ChangeKind {
    Put,
    Patch,
}

#[derive(Debug, Deserialize)]
struct StreamChange {
    path: String,
    data: Value,
}

impl FirebaseClient {
    pub fn new(
        base_url: &str,
        auth_token: Option<String>,
        state_path: &str,
        sensor_path: &str,
    ) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token: auth_token.filter(|t| !t.is_empty()),
            state_path: state_path.trim_matches('/').to_string(),
            sensor_path: sensor_path.trim_matches('/').to_string(),
            reconnect_delay: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            state_stream_live: Arc::new(watch::channel(false).0),
        })
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn record_url(&self, path: &str) -> String {
        let mut url = format!("{}/{}.json", self.base_url, path.trim_matches('/'));
        if let Some(token) = &self.auth_token {
            url.push_str("?auth=");
            url.push_str(&urlencoding::encode(token));
        }
        url
    }

    async fn get_value(&self, path: &str) -> Result<Value, SyncError> {
        let response = self
            .http
            .get(self.record_url(path))
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Connectivity(format!(
                "read of {} failed with status {}: {}",
                path, status, body
            )));
        }

        Ok(response.json::<Value>().await?)
    }

    async fn put_value(&self, path: &str, value: &impl serde::Serialize) -> Result<(), SyncError> {
        let response = self
            .http
            .put(self.record_url(path))
            .timeout(self.request_timeout)
            .json(value)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Connectivity(format!(
                "write of {} failed with status {}: {}",
                path, status, body
            )));
        }
        Ok(())
    }

    /// Stream `path` in a background task, handing the full value to
    /// `on_value` after every change. Dropping the subscription aborts the task.
    fn subscribe_path(
        &self,
        path: &str,
        on_value: PayloadListener,
        live: Option<Arc<watch::Sender<bool>>>,
    ) -> Subscription {
        let http = self.http.clone();
        let url = self.record_url(path);
        let delay = self.reconnect_delay;
        let label = path.to_string();

        let task_live = live.clone();
        let handle = tokio::spawn(async move {
            stream_loop(http, url, label, delay, on_value, task_live).await;
        });
        Subscription::new(move || {
            handle.abort();
            mark_live(live.as_deref(), false);
        })
    }
}

fn mark_live(live: Option<&watch::Sender<bool>>, up: bool) {
    if let Some(live) = live {
        live.send_if_modified(|current| {
            let changed = *current != up;
            *current = up;
            changed
        });
    }
}

async fn stream_loop(
    http: reqwest::Client,
    url: String,
    label: String,
    delay: Duration,
    on_value: PayloadListener,
    live: Option<Arc<watch::Sender<bool>>>,
) {
    loop {
        match stream_once(&http, &url, &on_value, live.as_deref()).await {
            Ok(()) => tracing::warn!("Stream for {} closed by server", label),
            Err(e) => tracing::warn!("Stream for {} failed: {}", label, e),
        }
        mark_live(live.as_deref(), false);
        tracing::debug!("Reconnecting stream for {} in {:?}", label, delay);
        tokio::time::sleep(delay).await;
    }
}

async fn stream_once(
    http: &reqwest::Client,
    url: &str,
    on_value: &PayloadListener,
    live: Option<&watch::Sender<bool>>,
) -> Result<(), SyncError> {
    let response = http
        .get(url)
        .header(ACCEPT, "text/event-stream")
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(SyncError::Connectivity(format!(
            "stream request failed with status {}",
            response.status()
        )));
    }

    let mut body = response.bytes_stream();
    let mut decoder = SseDecoder::default();
    // Each connection starts with a full snapshot, so the tree is rebuilt per connection
    let mut tree = Value::Null;

    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        for event in decoder.push(&chunk)? {
            let kind = match event.event.as_str() {
                "put" => ChangeKind::Put,
                "patch" => ChangeKind::Patch,
                "keep-alive" => continue,
                "cancel" => {
                    return Err(SyncError::Connectivity(
                        "stream cancelled by server".to_string(),
                    ));
                }
                "auth_revoked" => {
                    return Err(SyncError::Connectivity("credential revoked".to_string()));
                }
                other => {
                    tracing::debug!("Ignoring stream event {}", other);
                    continue;
                }
            };

            let change: StreamChange = match serde_json::from_str(&event.data) {
                Ok(change) => change,
                Err(e) => {
                    tracing::warn!("Malformed stream payload: {}", e);
                    continue;
                }
            };
            apply_change(&mut tree, &change.path, change.data, kind);
            mark_live(live, true);
            on_value(tree.clone());
        }
    }
    Ok(())
}

/// Apply a streamed put or patch at `path` within the cached value.
fn apply_change(tree: &mut Value, path: &str, data: Value, kind: ChangeKind) {
    if kind == ChangeKind::Patch {
        if let Value::Object(children) = data {
            for (key, value) in children {
                let child = format!("{}/{}", path.trim_end_matches('/'), key);
                apply_change(tree, &child, value, ChangeKind::Put);
            }
        }
        return;
    }

    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        *tree = data;
        return;
    };

    let mut node = tree;
    for segment in parents {
        node = child_object(node)
            .entry(segment.to_string())
            .or_insert(Value::Null);
    }
    let children = child_object(node);
    if data.is_null() {
        children.remove(*last);
    } else {
        children.insert(last.to_string(), data);
    }
}

fn child_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

#[async_trait]
impl RemoteStateClient for FirebaseClient {
    async fn read(&self) -> Result<Option<DeviceState>, SyncError> {
        let value = self.get_value(&self.state_path).await?;
        if value.is_null() {
            return Ok(None);
        }
        DeviceState::from_value(value).map(Some)
    }

    async fn write(&self, state: &DeviceState) -> Result<(), SyncError> {
        tracing::debug!(speed = state.speed, power = state.power, "Writing device state");
        self.put_value(&self.state_path, state).await
    }

    async fn subscribe(&self, listener: StateListener) -> Result<Subscription, SyncError> {
        let on_value: PayloadListener = Arc::new(move |value: Value| {
            if value.is_null() {
                listener(None);
                return;
            }
            match DeviceState::from_value(value) {
                Ok(state) => listener(Some(state)),
                Err(e) => tracing::warn!("Dropping malformed device record: {}", e),
            }
        });
        Ok(self.subscribe_path(
            &self.state_path,
            on_value,
            Some(self.state_stream_live.clone()),
        ))
    }

    fn stream_status(&self) -> Option<watch::Receiver<bool>> {
        Some(self.state_stream_live.subscribe())
    }
}

#[async_trait]
impl SensorFeed for FirebaseClient {
    async fn subscribe_payloads(
        &self,
        listener: PayloadListener,
    ) -> Result<Subscription, SyncError> {
        Ok(self.subscribe_path(&self.sensor_path, listener, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(token: Option<&str>) -> FirebaseClient {
        FirebaseClient::new(
            "https://fan-demo.firebaseio.com/",
            token.map(str::to_string),
            "/FanControl/",
            "esp8266/data",
        )
        .unwrap()
    }

    #[test]
    fn test_record_url() {
        assert_eq!(
            client(None).record_url("FanControl"),
            "https://fan-demo.firebaseio.com/FanControl.json"
        );
        assert_eq!(
            client(Some("a b/c")).record_url("esp8266/data"),
            "https://fan-demo.firebaseio.com/esp8266/data.json?auth=a%20b%2Fc"
        );
        assert_eq!(
            client(Some("")).record_url("FanControl"),
            "https://fan-demo.firebaseio.com/FanControl.json"
        );
    }

    #[test]
    fn test_root_put_replaces_tree() {
        let mut tree = json!({ "speed": 10 });
        apply_change(&mut tree, "/", json!({ "status": true, "speed": 50 }), ChangeKind::Put);
        assert_eq!(tree, json!({ "status": true, "speed": 50 }));

        apply_change(&mut tree, "/", Value::Null, ChangeKind::Put);
        assert!(tree.is_null());
    }

    #[test]
    fn test_nested_put_and_delete() {
        let mut tree = json!({ "speed": 50, "schedule": { "enabled": false } });
        apply_change(&mut tree, "/schedule/enabled", json!(true), ChangeKind::Put);
        apply_change(&mut tree, "/speed", Value::Null, ChangeKind::Put);
        assert_eq!(tree, json!({ "schedule": { "enabled": true } }));
    }

    #[test]
    fn test_put_into_empty_tree_creates_parents() {
        let mut tree = Value::Null;
        apply_change(&mut tree, "/schedule/startTime", json!("09:00"), ChangeKind::Put);
        assert_eq!(tree, json!({ "schedule": { "startTime": "09:00" } }));
    }

    #[test]
    fn test_patch_merges_children() {
        let mut tree = json!({ "status": true, "speed": 50, "nightMode": false });
        apply_change(
            &mut tree,
            "/",
            json!({ "speed": 80, "nightMode": null, "autoMode": true }),
            ChangeKind::Patch,
        );
        assert_eq!(tree, json!({ "status": true, "speed": 80, "autoMode": true }));
    }

    fn server_client(server: &MockServer) -> FirebaseClient {
        FirebaseClient::new(&server.uri(), Some("secret".to_string()), "FanControl", "esp8266/data")
            .unwrap()
            .with_reconnect_delay(Duration::from_millis(20))
    }

    fn collecting_listener() -> (PayloadListener, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let listener: PayloadListener =
            Arc::new(move |value: Value| sink.lock().unwrap().push(value));
        (listener, seen)
    }

    async fn mount_stream(server: &MockServer, status: u16, body: &str) {
        Mock::given(method("GET"))
            .and(path("/FanControl.json"))
            .and(header("accept", "text/event-stream"))
            .respond_with(
                ResponseTemplate::new(status).set_body_raw(body.to_string(), "text/event-stream"),
            )
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_read_absent_record_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/FanControl.json"))
            .and(query_param("auth", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Null))
            .expect(1)
            .mount(&server)
            .await;

        assert_eq!(server_client(&server).read().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_read_decodes_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/FanControl.json"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "status": false, "speed": 35 })),
            )
            .mount(&server)
            .await;

        let state = server_client(&server).read().await.unwrap().unwrap();
        assert!(!state.power);
        assert_eq!(state.speed, 35);
    }

    #[tokio::test]
    async fn test_read_error_status_is_connectivity() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/FanControl.json"))
            .respond_with(ResponseTemplate::new(401).set_body_string("Permission denied"))
            .mount(&server)
            .await;

        match server_client(&server).read().await {
            Err(SyncError::Connectivity(msg)) => assert!(msg.contains("Permission denied")),
            other => panic!("expected connectivity error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_write_puts_whole_record() {
        let server = MockServer::start().await;
        let state = DeviceState {
            speed: 70,
            night_mode: true,
            ..Default::default()
        };
        Mock::given(method("PUT"))
            .and(path("/FanControl.json"))
            .and(query_param("auth", "secret"))
            .and(body_json(serde_json::to_value(&state).unwrap()))
            .respond_with(ResponseTemplate::new(200).set_body_json(&state))
            .expect(1)
            .mount(&server)
            .await;

        server_client(&server).write(&state).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_server_error_is_connectivity() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/FanControl.json"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        match server_client(&server).write(&DeviceState::default()).await {
            Err(SyncError::Connectivity(msg)) => assert!(msg.contains("500")),
            other => panic!("expected connectivity error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_stream_delivers_whole_records() {
        let server = MockServer::start().await;
        mount_stream(
            &server,
            200,
            "event: put\ndata: {\"path\":\"/\",\"data\":{\"status\":true,\"speed\":50}}\n\n\
             event: keep-alive\ndata: null\n\n\
             event: patch\ndata: {\"path\":\"/\",\"data\":{\"speed\":80}}\n\n\
             event: put\ndata: {\"path\":\"/nightMode\",\"data\":true}\n\n",
        )
        .await;
        let client = server_client(&server);
        let (listener, seen) = collecting_listener();
        let live = watch::channel(false).0;

        stream_once(&client.http, &client.record_url("FanControl"), &listener, Some(&live))
            .await
            .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                json!({ "status": true, "speed": 50 }),
                json!({ "status": true, "speed": 80 }),
                json!({ "status": true, "speed": 80, "nightMode": true }),
            ]
        );
        assert!(*live.borrow());
    }

    #[tokio::test]
    async fn test_stream_cancel_and_revoke_are_errors() {
        for event in ["cancel", "auth_revoked"] {
            let server = MockServer::start().await;
            let body = format!(
                "event: put\ndata: {{\"path\":\"/\",\"data\":{{\"speed\":20}}}}\n\n\
                 event: {event}\ndata: null\n\n\
                 event: put\ndata: {{\"path\":\"/\",\"data\":{{\"speed\":90}}}}\n\n"
            );
            mount_stream(&server, 200, &body).await;
            let client = server_client(&server);
            let (listener, seen) = collecting_listener();

            let result =
                stream_once(&client.http, &client.record_url("FanControl"), &listener, None).await;

            assert!(matches!(result, Err(SyncError::Connectivity(_))), "{event}");
            assert_eq!(*seen.lock().unwrap(), vec![json!({ "speed": 20 })], "{event}");
        }
    }

    #[tokio::test]
    async fn test_stream_rejected_status_is_error() {
        let server = MockServer::start().await;
        mount_stream(&server, 401, "").await;
        let client = server_client(&server);
        let (listener, seen) = collecting_listener();
        let live = watch::channel(false).0;

        let result =
            stream_once(&client.http, &client.record_url("FanControl"), &listener, Some(&live))
                .await;

        assert!(matches!(result, Err(SyncError::Connectivity(_))));
        assert!(seen.lock().unwrap().is_empty());
        assert!(!*live.borrow());
    }

    #[tokio::test]
    async fn test_subscribe_reports_record_and_liveness() {
        let server = MockServer::start().await;
        mount_stream(
            &server,
            200,
            "event: put\ndata: {\"path\":\"/\",\"data\":{\"status\":true,\"speed\":55}}\n\n",
        )
        .await;
        let client = server_client(&server);
        let mut status = client.stream_status().unwrap();
        assert!(!*status.borrow());

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let listener: StateListener = Arc::new(move |state: Option<DeviceState>| {
            let _ = tx.send(state);
        });
        let subscription = client.subscribe(listener).await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(first.speed, 55);
        tokio::time::timeout(Duration::from_secs(2), status.wait_for(|live| *live))
            .await
            .unwrap()
            .unwrap();

        subscription.unsubscribe();
        assert!(!*status.borrow_and_update());
    }
}
