//! Fire-and-forget telemetry collaborator.
//!
//! The core never speaks HTTP; it exposes a pure `emit_event(tag, key,
//! hash)` callback. This binary's adapter turns that into a detached GET
//! against the configured counter endpoint. Failures are logged and
//! otherwise ignored, never surfaced to the request in flight.

/// The pure callback interface the core dispatcher calls into; `tag` is one
/// of `ios_playlist&segments=<N>` or `ios_view`.
pub trait TelemetrySink: Send + Sync {
    fn emit_event(&self, tag: &str, key: &str, hash: Option<&str>);
}

/// Fires `GET http://<host>/?action=<tag>&key=<key>&hash=<hash>` on a
/// detached task. Never blocks the caller and never propagates an error.
pub struct ReqwestTelemetrySink {
    host: String,
    client: reqwest::Client,
}

impl ReqwestTelemetrySink {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), client: reqwest::Client::new() }
    }
}

impl TelemetrySink for ReqwestTelemetrySink {
    fn emit_event(&self, tag: &str, key: &str, hash: Option<&str>) {
        let url = format!("http://{}/?action={}&key={}&hash={}", self.host, tag, key, hash.unwrap_or(""));
        let client = self.client.clone();
        tokio::spawn(async move {
            if let Err(err) = client.get(&url).send().await {
                tracing::debug!(%url, %err, "telemetry beacon failed");
            }
        });
    }
}

/// No-op sink used when no telemetry host is configured.
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn emit_event(&self, _tag: &str, _key: &str, _hash: Option<&str>) {}
}
