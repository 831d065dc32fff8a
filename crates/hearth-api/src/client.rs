// Hub API HTTP client.
//
// Wraps `reqwest::Client` with hub-specific URL construction, per-call
// bearer tokens, error classification, and the one-shot sub-device routing
// selector. The long-poll `listen` call lives here too, but is exempt from
// activity reporting -- it is expected to be outstanding at all times.

use std::sync::RwLock;
use std::time::Duration;

use reqwest::Method;
use secrecy::SecretString;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, trace};
use url::Url;

use crate::error::{self, Error};
use crate::token;
use crate::transport::TransportConfig;

/// Extra headroom on the listen request so the server-side long-poll
/// timeout fires before the client-side transport timeout.
const LISTEN_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

/// An event as delivered by the hub's `listen` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Raw HTTP client for the hub API.
///
/// Handles URL construction, fresh-per-call bearer tokens, and translation
/// of error bodies into the typed taxonomy. Thread-safe; the one-shot slave
/// selector is the only piece of mutable state.
pub struct HttpClient {
    http: reqwest::Client,
    base_url: Url,
    username: String,
    origin: String,
    signing_key: [u8; 32],
    /// Sub-device to route the next call through. Consumed by exactly
    /// one call, then cleared.
    next_slave: RwLock<Option<String>>,
    /// Count of in-flight non-listen calls, for connectivity reporting.
    active_calls: watch::Sender<u32>,
}

impl HttpClient {
    /// Create a client from a `TransportConfig`.
    ///
    /// The password is hashed into the signing key immediately and not
    /// retained. `base_url` is the hub root (e.g. `http://192.168.1.50`).
    pub fn new(
        base_url: Url,
        username: String,
        password: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self::with_client(http, base_url, username, password))
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(
        http: reqwest::Client,
        base_url: Url,
        username: String,
        password: &SecretString,
    ) -> Self {
        let origin = base_url.host_str().unwrap_or("hub").to_owned();
        let signing_key = token::signing_key(password);
        let (active_calls, _) = watch::channel(0);
        Self {
            http,
            base_url,
            username,
            origin,
            signing_key,
            next_slave: RwLock::new(None),
            active_calls,
        }
    }

    /// The hub base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Route the next call (and only the next call) through the named
    /// sub-device's forwarding endpoint. `None` clears a pending selection.
    pub fn set_slave_for_next_call(&self, slave: Option<&str>) {
        *self.next_slave.write().expect("slave selector lock poisoned") =
            slave.map(str::to_owned);
    }

    /// Subscribe to the in-flight non-listen call count.
    pub fn activity(&self) -> watch::Receiver<u32> {
        self.active_calls.subscribe()
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// Issue a single request and decode the response body.
    ///
    /// The one-shot slave selector is consumed here: if set, the path is
    /// rewritten to `slave/{name}/{path}` and the selector cleared before
    /// the request is sent.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, Error> {
        let slave = self
            .next_slave
            .write()
            .expect("slave selector lock poisoned")
            .take();
        let routed = slave.map_or_else(|| path.to_owned(), |name| format!("slave/{name}/{path}"));
        let url = self.api_url(&routed)?;
        debug!("{method} {url}");

        // Guard, not inc/dec around the await: a caller bounding the call
        // with `tokio::time::timeout` drops this future mid-flight, and the
        // count must still come back down.
        let _active = ActivityGuard::begin(&self.active_calls);
        self.send(method, url, query, body, timeout).await
    }

    /// GET a path and deserialize the body.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, Error> {
        let value = self.call(Method::GET, path, &[], None, None).await?;
        decode(value)
    }

    /// POST a JSON body to a path.
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, Error> {
        self.call(Method::POST, path, &[], Some(body), None).await
    }

    /// PUT a JSON body to a path.
    pub async fn put(&self, path: &str, body: &Value) -> Result<Value, Error> {
        self.call(Method::PUT, path, &[], Some(body), None).await
    }

    /// DELETE a path.
    pub async fn delete(&self, path: &str) -> Result<Value, Error> {
        self.call(Method::DELETE, path, &[], None, None).await
    }

    /// Long-poll for outstanding events.
    ///
    /// Held open by the hub until events arrive or `timeout` elapses, then
    /// answered with a (possibly empty) batch. Not counted as activity and
    /// never routed through a slave.
    pub async fn listen(
        &self,
        session_id: &str,
        timeout: Duration,
    ) -> Result<Vec<WireEvent>, Error> {
        let url = self.api_url("listen")?;
        trace!("GET {url} (long poll {}s)", timeout.as_secs());

        let query = [
            ("session_id", session_id.to_owned()),
            ("timeout", timeout.as_secs().to_string()),
        ];
        let resp = self
            .http
            .get(url)
            .query(&query)
            .bearer_auth(self.fresh_token())
            .timeout(timeout + LISTEN_TIMEOUT_MARGIN)
            .send()
            .await
            .map_err(Error::from_transport)?;

        let value = read_body(resp).await?;
        if value.is_null() {
            return Ok(Vec::new());
        }
        decode(value)
    }

    // ── Internals ────────────────────────────────────────────────────

    fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/api/{path}"))?)
    }

    fn fresh_token(&self) -> String {
        token::bearer_token(&self.username, &self.origin, &self.signing_key)
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<&Value>,
        timeout: Option<Duration>,
    ) -> Result<Value, Error> {
        let mut builder = self
            .http
            .request(method, url)
            .query(query)
            .bearer_auth(self.fresh_token());
        if let Some(body) = body {
            builder = builder.json(body);
        }
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let resp = builder.send().await.map_err(Error::from_transport)?;
        read_body(resp).await
    }
}

/// Holds one slot of the in-flight call count, released on drop so a
/// cancelled call cannot leave phantom activity behind.
struct ActivityGuard<'a>(&'a watch::Sender<u32>);

impl<'a> ActivityGuard<'a> {
    fn begin(sender: &'a watch::Sender<u32>) -> Self {
        sender.send_modify(|n| *n += 1);
        Self(sender)
    }
}

impl Drop for ActivityGuard<'_> {
    fn drop(&mut self) {
        self.0.send_modify(|n| *n -= 1);
    }
}

/// Read a response body, classifying non-success statuses through the
/// known-error table.
async fn read_body(resp: reqwest::Response) -> Result<Value, Error> {
    let status = resp.status();
    let text = resp.text().await.map_err(Error::from_transport)?;

    if !status.is_success() {
        return Err(error::classify(status.as_u16(), &text));
    }
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&text).map_err(|e| {
        let preview = &text[..text.len().min(200)];
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body: text.clone(),
        }
    })
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, Error> {
    // Deserialize by reference; the body is only stringified on failure.
    T::deserialize(&value).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: value.to_string(),
    })
}
