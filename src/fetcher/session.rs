use std::sync::{Arc, LazyLock, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_ENCODING, ACCEPT_LANGUAGE, COOKIE, REFERER};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::app::{PortalError, Result};
use crate::config::PortalConfig;
use crate::domain::{AuthState, ConnectionStatus, DeviceIdentity};
use crate::fetcher::{ConcurrencyLimiter, Fetcher, Portal, SingleFlight};

/// Path prefixes probed in order during discovery.
pub const DISCOVERY_CANDIDATES: &[&str] = &["stalker_portal", "", "c", "mag"];
pub const FALLBACK_BASE_PATH: &str = "stalker_portal";

const PROBE_ENDPOINT: &str = "server/api/load_js.php";
const LOAD_ENDPOINT: &str = "server/load.php";
const MAX_RESOLVE_RETRIES: usize = 1;
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(15);
const PROFILE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static TOKEN_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r#"(?i)access_token\s*=\s*['"]([^'"]+)['"]"#,
        r#"(?i)token\s*:\s*['"]([^'"]+)['"]"#,
        r#"(?i)var\s+token\s*=\s*['"]([^'"]+)['"]"#,
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Transport to a single portal: path discovery, handshake, identity
/// headers and authenticated requests.
///
/// Cloning is cheap; all clones share the token and base URL.
#[derive(Clone)]
pub struct PortalSession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    client: Client,
    identity: DeviceIdentity,
    model: &'static str,
    timezone: String,
    base_url: RwLock<Url>,
    base_path: RwLock<Option<String>>,
    auth: RwLock<AuthState>,
    subscription_expires: RwLock<Option<NaiveDateTime>>,
    auth_flight: SingleFlight<(), ()>,
    network: ConcurrencyLimiter,
    cancel: CancellationToken,
}

enum HandshakeToken {
    Found(String),
    Missing { html: bool },
}

impl PortalSession {
    pub fn new(
        config: &PortalConfig,
        network: ConcurrencyLimiter,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let base_url = normalize_base(&config.url)?;

        let mut headers = HeaderMap::new();
        headers.insert(
            "X-User-Agent",
            header_value(&format!("Model: {}; Link: Ethernet", config.model()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
        headers.insert("X-Requested-With", HeaderValue::from_static("XMLHttpRequest"));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("gzip, deflate"));

        let client = Client::builder()
            .timeout(config.timeout())
            .gzip(true)
            .deflate(true)
            .brotli(true)
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()?;

        Ok(Self {
            inner: Arc::new(SessionInner {
                client,
                identity: config.identity(),
                model: config.model(),
                timezone: config.timezone.clone(),
                base_url: RwLock::new(base_url),
                base_path: RwLock::new(None),
                auth: RwLock::new(AuthState::default()),
                subscription_expires: RwLock::new(None),
                auth_flight: SingleFlight::new(),
                network,
                cancel,
            }),
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    pub fn token(&self) -> Option<String> {
        read(&self.inner.auth).token.clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        read(&self.inner.auth).status
    }

    pub fn base_url(&self) -> Url {
        read(&self.inner.base_url).clone()
    }

    /// The discovered API prefix, once a handshake has run.
    pub fn base_path(&self) -> Option<String> {
        read(&self.inner.base_path).clone()
    }

    pub fn subscription_expires(&self) -> Option<NaiveDateTime> {
        *read(&self.inner.subscription_expires)
    }

    /// Forgets the current token and authenticates again.
    pub async fn login(&self) -> Result<()> {
        self.clear_token();
        self.authenticate().await
    }

    pub fn logout(&self) {
        let mut auth = write(&self.inner.auth);
        auth.token = None;
        auth.status = ConnectionStatus::Idle;
        *write(&self.inner.subscription_expires) = None;
        info!("Logged out");
    }

    /// Ensures a token is present. Concurrent callers share one handshake.
    pub async fn authenticate(&self) -> Result<()> {
        if self.token().is_some() {
            return Ok(());
        }
        let session = self.clone();
        self.inner
            .auth_flight
            .run((), move || async move {
                if session.token().is_some() {
                    return Ok(());
                }
                session.set_status(ConnectionStatus::Connecting);
                match session.perform_authentication().await {
                    Ok(()) => {
                        session.set_status(ConnectionStatus::Connected);
                        Ok(())
                    }
                    Err(e) if e.is_cancelled() => {
                        debug!("Authentication cancelled");
                        session.set_status(ConnectionStatus::Idle);
                        Err(e)
                    }
                    Err(e) => {
                        error!("Authentication failed: {}", e);
                        session.set_status(ConnectionStatus::Failed);
                        Err(e)
                    }
                }
            })
            .await
    }

    async fn perform_authentication(&self) -> Result<()> {
        let mut resolve_attempts = 0;

        let token = loop {
            let base_path = self.discover_base_path().await?;
            *write(&self.inner.base_path) = Some(base_path.clone());

            let body = self.handshake(&base_path).await?;
            match extract_token(&body) {
                HandshakeToken::Found(token) => break token,
                HandshakeToken::Missing { html } => {
                    if html && resolve_attempts < MAX_RESOLVE_RETRIES {
                        resolve_attempts += 1;
                        let current = self.base_url();
                        if let Some(resolved) = self.resolve_url(&current).await {
                            if resolved != current {
                                info!(from = %current, to = %resolved, "Retrying handshake on resolved URL");
                                *write(&self.inner.base_url) = resolved;
                                continue;
                            }
                        }
                    }
                    warn!("Handshake returned no token, using MAC as stateless token");
                    break self.inner.identity.lower_mac();
                }
            }
        };

        write(&self.inner.auth).token = Some(token);
        self.refresh_profile().await;
        Ok(())
    }

    /// First candidate prefix whose probe endpoint answers 200 with a
    /// non-HTML body, else [`FALLBACK_BASE_PATH`].
    async fn discover_base_path(&self) -> Result<String> {
        let base = self.base_url();
        for candidate in DISCOVERY_CANDIDATES {
            if self.inner.cancel.is_cancelled() {
                return Err(PortalError::Cancelled);
            }
            let url = endpoint(&base, candidate, PROBE_ENDPOINT)?;
            let probe = self
                .inner
                .client
                .get(url.clone())
                .header(COOKIE, self.cookie())
                .send()
                .await;

            match probe {
                Ok(response) if response.status() == StatusCode::OK => match response.text().await {
                    Ok(body) if !looks_like_html(&body) => {
                        info!(path = candidate, "Discovered portal base path");
                        return Ok(candidate.to_string());
                    }
                    Ok(_) => debug!(%url, "Probe returned HTML"),
                    Err(e) => debug!(%url, "Probe body unreadable: {}", e),
                },
                Ok(response) => debug!(%url, status = %response.status(), "Probe rejected"),
                Err(e) => debug!(%url, "Probe failed: {}", e),
            }
        }

        warn!(
            "No candidate path answered, falling back to {}",
            FALLBACK_BASE_PATH
        );
        Ok(FALLBACK_BASE_PATH.to_string())
    }

    async fn handshake(&self, base_path: &str) -> Result<Vec<u8>> {
        let identity = &self.inner.identity;
        let mut url = endpoint(&self.base_url(), base_path, LOAD_ENDPOINT)?;
        url.query_pairs_mut()
            .append_pair("type", "stb")
            .append_pair("action", "handshake")
            .append_pair("token", "")
            .append_pair("mac", &identity.lower_mac())
            .append_pair("stb_type", self.inner.model)
            .append_pair("sn", &identity.serial_number)
            .append_pair("device_id", &identity.device_id)
            .append_pair("device_id2", &identity.device_id2)
            .append_pair("signature", &identity.signature);

        debug!(%url, "Handshake");
        let request = self
            .inner
            .client
            .get(url)
            .header(COOKIE, self.cookie())
            .header(REFERER, self.referer());

        let _permit = self.inner.network.acquire_or_cancel(&self.inner.cancel).await?;
        let response = request.send().await?;
        let status = response.status();
        let body = response.bytes().await?.to_vec();
        if !status.is_success() && body.is_empty() {
            return Err(PortalError::AuthFailed(format!("handshake returned {status}")));
        }
        Ok(body)
    }

    /// Follows redirects on `url`. When the final location differs, returns
    /// its API root (UI sub-paths and query stripped).
    async fn resolve_url(&self, url: &Url) -> Option<Url> {
        let response = match self
            .inner
            .client
            .get(url.clone())
            .timeout(RESOLVE_TIMEOUT)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                debug!(%url, "URL resolution failed: {}", e);
                return None;
            }
        };

        let mut resolved = response.url().clone();
        if resolved.host_str() == url.host_str()
            && resolved.scheme() == url.scheme()
            && resolved.port_or_known_default() == url.port_or_known_default()
            && resolved.path() == url.path()
        {
            return None;
        }

        let mut path = resolved.path().to_string();
        for marker in ["/stalker_portal", "/c/"] {
            if let Some(idx) = path.find(marker) {
                path.truncate(idx);
            }
        }
        let path = path.trim_end_matches('/');
        resolved.set_query(None);
        resolved.set_fragment(None);
        resolved.set_path(&format!("{path}/"));
        Some(resolved)
    }

    async fn refresh_profile(&self) {
        match self.fetch_json("stb", "get_profile", &[]).await {
            Ok(value) => {
                let expires = value
                    .pointer("/js/expire_billing_date")
                    .and_then(Value::as_str)
                    .and_then(|s| NaiveDateTime::parse_from_str(s, PROFILE_DATE_FORMAT).ok());
                if let Some(expires) = expires {
                    info!(%expires, "Subscription expiry");
                }
                *write(&self.inner.subscription_expires) = expires;
            }
            Err(e) if e.is_cancelled() => debug!("Profile fetch cancelled"),
            Err(e) => warn!("Profile fetch failed: {}", e),
        }
    }

    fn clear_token(&self) {
        write(&self.inner.auth).token = None;
    }

    fn set_status(&self, status: ConnectionStatus) {
        write(&self.inner.auth).status = status;
    }

    fn cookie(&self) -> String {
        format!(
            "mac={}; stb_lang=en; timezone={}",
            self.inner.identity.encoded_mac(),
            self.inner.timezone
        )
    }

    /// Same host and port as the portal; only these get the identity cookie.
    fn is_portal_host(&self, url: &Url) -> bool {
        let base = self.base_url();
        base.host_str() == url.host_str()
            && base.port_or_known_default() == url.port_or_known_default()
    }

    fn referer(&self) -> String {
        let base = self.base_url();
        format!("{}/stalker_portal/c/index.html", base.as_str().trim_end_matches('/'))
    }

    fn api_url(&self, kind: &str, action: &str, token: &str, params: &[(&str, String)]) -> Result<Url> {
        let base_path = self
            .base_path()
            .unwrap_or_else(|| FALLBACK_BASE_PATH.to_string());
        let identity = &self.inner.identity;
        let mut url = endpoint(&self.base_url(), &base_path, LOAD_ENDPOINT)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("type", kind)
                .append_pair("action", action)
                .append_pair("mac", &identity.lower_mac())
                .append_pair("sn", &identity.serial_number)
                .append_pair("device_id", &identity.device_id)
                .append_pair("device_id2", &identity.device_id2)
                .append_pair("signature", &identity.signature);
            if !token.is_empty() {
                query.append_pair("token", token);
            }
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Vec<u8>> {
        let _permit = self.inner.network.acquire_or_cancel(&self.inner.cancel).await?;
        if self.inner.cancel.is_cancelled() {
            return Err(PortalError::Cancelled);
        }
        let response = request.send().await?;
        response.error_for_status_ref()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl Portal for PortalSession {
    async fn fetch_raw(
        &self,
        kind: &str,
        action: &str,
        params: &[(&str, String)],
    ) -> Result<Vec<u8>> {
        if self.token().is_none() {
            self.authenticate().await?;
        }
        let token = self.token().ok_or(PortalError::NoToken)?;
        let url = self.api_url(kind, action, &token, params)?;
        debug!(kind, action, "Portal request");

        let request = self
            .inner
            .client
            .get(url)
            .header(COOKIE, self.cookie())
            .header(REFERER, self.referer())
            .bearer_auth(&token);
        self.send(request).await
    }
}

#[async_trait]
impl Fetcher for PortalSession {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if self.inner.cancel.is_cancelled() {
            return Err(PortalError::Cancelled);
        }
        let url = Url::parse(url)?;
        let mut request = self.inner.client.get(url.clone());
        if self.is_portal_host(&url) {
            request = request.header(COOKIE, self.cookie());
        }
        let response = request.send().await?;
        response.error_for_status_ref()?;
        Ok(response.bytes().await?.to_vec())
    }
}

fn extract_token(body: &[u8]) -> HandshakeToken {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        if let Some(token) = value
            .pointer("/js/token")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
        {
            return HandshakeToken::Found(token.to_string());
        }
        return HandshakeToken::Missing { html: false };
    }

    let text = String::from_utf8_lossy(body);
    for pattern in TOKEN_PATTERNS.iter() {
        if let Some(token) = pattern.captures(&text).and_then(|c| c.get(1)) {
            debug!("Token extracted from inline script");
            return HandshakeToken::Found(token.as_str().to_string());
        }
    }
    HandshakeToken::Missing {
        html: looks_like_html(&text),
    }
}

fn looks_like_html(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("<!doctype") || lower.contains("<html") || lower.contains("<script")
}

/// Adds a scheme when missing and makes the path a directory so relative
/// joins stay under it.
fn normalize_base(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PortalError::InvalidUrl("empty portal URL".to_string()));
    }
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    let mut url = Url::parse(&with_scheme)?;
    if url.host_str().is_none() {
        return Err(PortalError::InvalidUrl(with_scheme));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn endpoint(base: &Url, prefix: &str, endpoint: &str) -> Result<Url> {
    let relative = if prefix.is_empty() {
        endpoint.to_string()
    } else {
        format!("{prefix}/{endpoint}")
    };
    Ok(base.join(&relative)?)
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| PortalError::Config(e.to_string()))
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server, ServerGuard};

    const MAC: &str = "00:1A:79:AB:CD:EF";
    const PROBE: &str = "/stalker_portal/server/api/load_js.php";
    const LOAD: &str = "/stalker_portal/server/load.php";

    fn session_for(url: &str) -> PortalSession {
        session_with_cancel(url, CancellationToken::new())
    }

    fn session_with_cancel(url: &str, cancel: CancellationToken) -> PortalSession {
        let config = PortalConfig {
            url: url.to_string(),
            mac: MAC.to_string(),
            ..PortalConfig::default()
        };
        PortalSession::new(&config, ConcurrencyLimiter::new("network", 4), cancel).unwrap()
    }

    fn action(name: &str) -> Matcher {
        Matcher::UrlEncoded("action".into(), name.into())
    }

    async fn mock_probe(server: &mut ServerGuard) -> mockito::Mock {
        server
            .mock("GET", PROBE)
            .with_status(200)
            .with_body("{}")
            .create_async()
            .await
    }

    async fn mock_handshake(server: &mut ServerGuard, body: &str) -> mockito::Mock {
        server
            .mock("GET", LOAD)
            .match_query(action("handshake"))
            .with_status(200)
            .with_body(body)
            .create_async()
            .await
    }

    #[test]
    fn test_normalize_base() {
        assert_eq!(
            normalize_base("portal.example/c").unwrap().as_str(),
            "http://portal.example/c/"
        );
        assert_eq!(
            normalize_base(" https://portal.example ").unwrap().as_str(),
            "https://portal.example/"
        );
        assert!(matches!(normalize_base(""), Err(PortalError::InvalidUrl(_))));
    }

    #[test]
    fn test_extract_token_variants() {
        assert!(matches!(
            extract_token(br#"{"js":{"token":"abc"}}"#),
            HandshakeToken::Found(t) if t == "abc"
        ));
        assert!(matches!(
            extract_token(b"<html><script>var token = 'inline-1';</script></html>"),
            HandshakeToken::Found(t) if t == "inline-1"
        ));
        assert!(matches!(
            extract_token(b"<html><script>cfg = { token: \"inline-2\" }</script></html>"),
            HandshakeToken::Found(t) if t == "inline-2"
        ));
        assert!(matches!(
            extract_token(b"<!DOCTYPE html><html>login</html>"),
            HandshakeToken::Missing { html: true }
        ));
        assert!(matches!(
            extract_token(br#"{"js":{}}"#),
            HandshakeToken::Missing { html: false }
        ));
    }

    #[tokio::test]
    async fn test_discovery_skips_html_candidates() {
        let mut server = Server::new_async().await;
        let _html = server
            .mock("GET", PROBE)
            .with_status(200)
            .with_body("<!DOCTYPE html><html></html>")
            .create_async()
            .await;
        let _probe = server
            .mock("GET", "/server/api/load_js.php")
            .with_status(200)
            .with_body("var stb = {};")
            .create_async()
            .await;
        let handshake = server
            .mock("GET", "/server/load.php")
            .match_query(action("handshake"))
            .with_body(r#"{"js":{"token":"tok-1"}}"#)
            .expect(1)
            .create_async()
            .await;
        let _profile = server
            .mock("GET", "/server/load.php")
            .match_query(action("get_profile"))
            .with_body(r#"{"js":{"expire_billing_date":"2030-01-02 03:04:05"}}"#)
            .create_async()
            .await;

        let session = session_for(&server.url());
        session.authenticate().await.unwrap();

        handshake.assert_async().await;
        assert_eq!(session.base_path().as_deref(), Some(""));
        assert_eq!(session.token().as_deref(), Some("tok-1"));
        assert_eq!(session.status(), ConnectionStatus::Connected);
        assert_eq!(
            session.subscription_expires().unwrap().to_string(),
            "2030-01-02 03:04:05"
        );
    }

    #[tokio::test]
    async fn test_discovery_falls_back_when_nothing_answers() {
        let mut server = Server::new_async().await;
        let handshake = server
            .mock("GET", LOAD)
            .match_query(action("handshake"))
            .with_body(r#"{"js":{"token":"tok-2"}}"#)
            .expect(1)
            .create_async()
            .await;

        let session = session_for(&server.url());
        session.authenticate().await.unwrap();

        handshake.assert_async().await;
        assert_eq!(session.base_path().as_deref(), Some(FALLBACK_BASE_PATH));
        assert_eq!(session.token().as_deref(), Some("tok-2"));
    }

    #[tokio::test]
    async fn test_handshake_without_token_uses_mac() {
        let mut server = Server::new_async().await;
        let _probe = mock_probe(&mut server).await;
        let _handshake = mock_handshake(&mut server, r#"{"js":{}}"#).await;

        let session = session_for(&server.url());
        session.authenticate().await.unwrap();

        assert_eq!(session.token().as_deref(), Some("00:1a:79:ab:cd:ef"));
        assert_eq!(session.status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_html_login_page_retries_once_on_resolved_url() {
        let mut target = Server::new_async().await;
        let _target_probe = mock_probe(&mut target).await;
        let target_handshake = target
            .mock("GET", LOAD)
            .match_query(action("handshake"))
            .with_body(r#"{"js":{"token":"resolved-token"}}"#)
            .expect(1)
            .create_async()
            .await;

        let mut origin = Server::new_async().await;
        let _origin_handshake =
            mock_handshake(&mut origin, "<!DOCTYPE html><html>login</html>").await;
        let redirect = origin
            .mock("GET", "/")
            .with_status(302)
            .with_header("location", &format!("{}/stalker_portal/c/index.html", target.url()))
            .expect(1)
            .create_async()
            .await;

        let session = session_for(&origin.url());
        session.authenticate().await.unwrap();

        redirect.assert_async().await;
        target_handshake.assert_async().await;
        assert_eq!(session.token().as_deref(), Some("resolved-token"));
        assert_eq!(session.base_url().as_str(), format!("{}/", target.url()));
    }

    #[tokio::test]
    async fn test_resolution_retry_is_bounded() {
        let mut target = Server::new_async().await;
        let target_handshake =
            mock_handshake(&mut target, "<!DOCTYPE html><html>login</html>").await;
        let target_redirect = target
            .mock("GET", "/")
            .with_status(302)
            .with_header("location", "/elsewhere/")
            .expect(0)
            .create_async()
            .await;

        let mut origin = Server::new_async().await;
        let _origin_handshake =
            mock_handshake(&mut origin, "<!DOCTYPE html><html>login</html>").await;
        let _redirect = origin
            .mock("GET", "/")
            .with_status(302)
            .with_header("location", &format!("{}/c/", target.url()))
            .create_async()
            .await;

        let session = session_for(&origin.url());
        session.authenticate().await.unwrap();

        target_redirect.assert_async().await;
        assert!(target_handshake.matched_async().await);
        assert_eq!(session.token().as_deref(), Some("00:1a:79:ab:cd:ef"));
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_handshake() {
        let mut server = Server::new_async().await;
        let probe = server
            .mock("GET", PROBE)
            .with_body("{}")
            .expect(1)
            .create_async()
            .await;
        let handshake = server
            .mock("GET", LOAD)
            .match_query(action("handshake"))
            .with_body(r#"{"js":{"token":"shared"}}"#)
            .expect(1)
            .create_async()
            .await;

        let session = session_for(&server.url());
        let (a, b, c) = tokio::join!(
            session.authenticate(),
            session.authenticate(),
            session.authenticate()
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());

        probe.assert_async().await;
        handshake.assert_async().await;
        assert_eq!(session.token().as_deref(), Some("shared"));
    }

    #[tokio::test]
    async fn test_fetch_sends_identity_cookie_and_bearer() {
        let mut server = Server::new_async().await;
        let _probe = mock_probe(&mut server).await;
        let _handshake = mock_handshake(&mut server, r#"{"js":{"token":"tok-9"}}"#).await;

        let identity = DeviceIdentity::derive(MAC);
        let categories = server
            .mock("GET", LOAD)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("type".into(), "vod".into()),
                action("get_categories"),
                Matcher::UrlEncoded("token".into(), "tok-9".into()),
                Matcher::UrlEncoded("mac".into(), "00:1a:79:ab:cd:ef".into()),
                Matcher::UrlEncoded("sn".into(), identity.serial_number.clone()),
                Matcher::UrlEncoded("device_id".into(), identity.device_id.clone()),
                Matcher::UrlEncoded("signature".into(), identity.signature.clone()),
            ]))
            .match_header("authorization", "Bearer tok-9")
            .match_header(
                "cookie",
                Matcher::Regex("mac=00%3A1a%3A79%3Aab%3Acd%3Aef; stb_lang=en; timezone=".into()),
            )
            .match_header("x-user-agent", "Model: MAG322; Link: Ethernet")
            .match_header("x-requested-with", "XMLHttpRequest")
            .with_body(r#"{"js":[{"id":"1","title":"Action"}]}"#)
            .expect(1)
            .create_async()
            .await;

        let session = session_for(&server.url());
        let value = session.fetch_json("vod", "get_categories", &[]).await.unwrap();

        categories.assert_async().await;
        assert_eq!(value["js"][0]["title"], "Action");
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_decoding_error() {
        let mut server = Server::new_async().await;
        let _probe = mock_probe(&mut server).await;
        let _handshake = mock_handshake(&mut server, r#"{"js":{"token":"t"}}"#).await;
        let _list = server
            .mock("GET", LOAD)
            .match_query(action("get_ordered_list"))
            .with_body("Fatal error: not json")
            .create_async()
            .await;

        let session = session_for(&server.url());
        let err = session
            .fetch_json("vod", "get_ordered_list", &[("p", "1".to_string())])
            .await
            .unwrap_err();
        match err {
            PortalError::Decoding { body, .. } => assert!(body.contains("not json")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_session_does_not_hit_network() {
        let mut server = Server::new_async().await;
        let probe = server
            .mock("GET", PROBE)
            .with_body("{}")
            .expect(0)
            .create_async()
            .await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let session = session_with_cancel(&server.url(), cancel);
        let err = session.fetch_json("vod", "get_categories", &[]).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(session.status(), ConnectionStatus::Idle);
        probe.assert_async().await;
    }

    #[tokio::test]
    async fn test_logout_clears_token() {
        let mut server = Server::new_async().await;
        let _probe = mock_probe(&mut server).await;
        let _handshake = mock_handshake(&mut server, r#"{"js":{"token":"t"}}"#).await;

        let session = session_for(&server.url());
        session.login().await.unwrap();
        assert!(session.token().is_some());

        session.logout();
        assert!(session.token().is_none());
        assert_eq!(session.status(), ConnectionStatus::Idle);
    }

    #[tokio::test]
    async fn test_identity_cookie_stays_on_portal_host() {
        let mut portal = Server::new_async().await;
        let mut cdn = Server::new_async().await;
        let own = portal
            .mock("GET", "/misc/logo.png")
            .match_header("cookie", Matcher::Regex("mac=00%3A1a%3A79".into()))
            .with_body("portal-bytes")
            .expect(1)
            .create_async()
            .await;
        let foreign = cdn
            .mock("GET", "/posters/1.jpg")
            .match_header("cookie", Matcher::Missing)
            .with_body("cdn-bytes")
            .expect(1)
            .create_async()
            .await;

        let session = session_for(&portal.url());
        let logo = session.fetch(&format!("{}/misc/logo.png", portal.url())).await.unwrap();
        let poster = session.fetch(&format!("{}/posters/1.jpg", cdn.url())).await.unwrap();

        assert_eq!(logo, b"portal-bytes");
        assert_eq!(poster, b"cdn-bytes");
        own.assert_async().await;
        foreign.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_portal_is_a_network_error() {
        let session = session_for("http://127.0.0.1:9");
        let err = session.login().await.unwrap_err();

        assert!(matches!(err, PortalError::Network(_)));
        assert_eq!(session.status(), ConnectionStatus::Failed);
        assert_eq!(session.base_path().as_deref(), Some(FALLBACK_BASE_PATH));
    }
}
