//! Apple Push Notification service transport.
//!
//! Requests go over HTTP/2 to the host matching each device token's own
//! environment, authenticated with an ES256 provider token that is cached and
//! re-minted after 50 minutes (Apple rejects tokens older than one hour).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::{
    DispatchReport, NotificationPayload, PushDispatcher, PushTarget, SendFailure, fan_out,
    truncate_string,
};
use crate::config::env_string;
use crate::domain::{ApnsEnvironment, DeactivationReason, SubscriptionKind, Transport};
use crate::utils::http_client::build_client;
use crate::{Error, Result};

pub const PRODUCTION_URL: &str = "https://api.push.apple.com";
pub const SANDBOX_URL: &str = "https://api.sandbox.push.apple.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_CONCURRENCY: usize = 32;
const TOKEN_REFRESH_AFTER_MINUTES: i64 = 50;

/// Clock used by [`ApnsTokenCache`].
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Clone)]
pub struct ApnsConfig {
    pub key_id: String,
    pub team_id: String,
    pub bundle_id: String,
    /// PKCS#8 PEM of the `.p8` signing key.
    pub private_key_pem: String,
    pub production_url: String,
    pub sandbox_url: String,
}

impl std::fmt::Debug for ApnsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApnsConfig")
            .field("key_id", &self.key_id)
            .field("team_id", &self.team_id)
            .field("bundle_id", &self.bundle_id)
            .field("production_url", &self.production_url)
            .field("sandbox_url", &self.sandbox_url)
            .finish_non_exhaustive()
    }
}

impl ApnsConfig {
    pub fn new(
        key_id: impl Into<String>,
        team_id: impl Into<String>,
        bundle_id: impl Into<String>,
        private_key_pem: impl Into<String>,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            team_id: team_id.into(),
            bundle_id: bundle_id.into(),
            private_key_pem: private_key_pem.into(),
            production_url: PRODUCTION_URL.to_string(),
            sandbox_url: SANDBOX_URL.to_string(),
        }
    }

    /// `Ok(None)` when no APNs variable is set at all.
    pub fn from_env() -> Result<Option<Self>> {
        let key_id = env_string("APNS_KEY_ID");
        let team_id = env_string("APNS_TEAM_ID");
        let bundle_id = env_string("APNS_BUNDLE_ID");
        let inline_key = env_string("APNS_PRIVATE_KEY");
        let key_path = env_string("APNS_PRIVATE_KEY_PATH");

        if key_id.is_none()
            && team_id.is_none()
            && bundle_id.is_none()
            && inline_key.is_none()
            && key_path.is_none()
        {
            return Ok(None);
        }

        let (Some(key_id), Some(team_id), Some(bundle_id)) = (key_id, team_id, bundle_id) else {
            return Err(Error::config(
                "APNS_KEY_ID, APNS_TEAM_ID and APNS_BUNDLE_ID must all be set",
            ));
        };

        let private_key_pem = match (inline_key, key_path) {
            // Env files usually carry the PEM on one line with literal \n.
            (Some(inline), _) => inline.replace("\\n", "\n"),
            (None, Some(path)) => std::fs::read_to_string(&path).map_err(|e| {
                Error::config(format!("Failed to read APNS_PRIVATE_KEY_PATH {}: {}", path, e))
            })?,
            (None, None) => {
                return Err(Error::config(
                    "APNS_PRIVATE_KEY or APNS_PRIVATE_KEY_PATH must be set",
                ));
            }
        };

        let mut config = Self::new(key_id, team_id, bundle_id, private_key_pem);
        if let Some(url) = env_string("APNS_PRODUCTION_URL") {
            config.production_url = url;
        }
        if let Some(url) = env_string("APNS_SANDBOX_URL") {
            config.sandbox_url = url;
        }
        Ok(Some(config))
    }

    /// Base URL for a token registered in `environment`. Unknown means production.
    pub fn base_url_for(&self, environment: Option<ApnsEnvironment>) -> &str {
        match environment.unwrap_or_default() {
            ApnsEnvironment::Sandbox => &self.sandbox_url,
            ApnsEnvironment::Production => &self.production_url,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ProviderClaims {
    iss: String,
    iat: i64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    jwt: String,
    issued_at: DateTime<Utc>,
}

/// Cached APNs provider token.
///
/// Readers share the current token; only one caller re-signs when it ages
/// past the refresh threshold.
pub struct ApnsTokenCache {
    key: EncodingKey,
    key_id: String,
    team_id: String,
    refresh_after: chrono::Duration,
    clock: Clock,
    current: RwLock<Option<CachedToken>>,
    refresh_guard: Mutex<()>,
}

impl ApnsTokenCache {
    pub fn new(config: &ApnsConfig) -> Result<Self> {
        Self::with_clock(config, Arc::new(Utc::now))
    }

    pub fn with_clock(config: &ApnsConfig, clock: Clock) -> Result<Self> {
        let key = EncodingKey::from_ec_pem(config.private_key_pem.as_bytes())
            .map_err(|e| Error::config(format!("Invalid APNs private key: {}", e)))?;
        Ok(Self {
            key,
            key_id: config.key_id.clone(),
            team_id: config.team_id.clone(),
            refresh_after: chrono::Duration::minutes(TOKEN_REFRESH_AFTER_MINUTES),
            clock,
            current: RwLock::new(None),
            refresh_guard: Mutex::new(()),
        })
    }

    fn fresh(&self, now: DateTime<Utc>) -> Option<String> {
        self.current
            .read()
            .as_ref()
            .filter(|cached| now - cached.issued_at < self.refresh_after)
            .map(|cached| cached.jwt.clone())
    }

    /// Current provider token, minting a new one if the cached one is too old.
    pub fn token(&self) -> Result<String> {
        let now = (self.clock)();
        if let Some(jwt) = self.fresh(now) {
            return Ok(jwt);
        }

        let _guard = self.refresh_guard.lock();
        // Another caller may have refreshed while we waited.
        if let Some(jwt) = self.fresh(now) {
            return Ok(jwt);
        }

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());
        let claims = ProviderClaims {
            iss: self.team_id.clone(),
            iat: now.timestamp(),
        };
        let jwt = jsonwebtoken::encode(&header, &claims, &self.key)
            .map_err(|e| Error::transport(format!("Failed to sign APNs token: {}", e)))?;

        tracing::debug!(key_id = %self.key_id, "Minted APNs provider token");
        *self.current.write() = Some(CachedToken {
            jwt: jwt.clone(),
            issued_at: now,
        });
        Ok(jwt)
    }

    /// Drop the cached token so the next call re-signs.
    pub fn invalidate(&self) {
        *self.current.write() = None;
    }
}

#[derive(Debug, Serialize)]
struct ApnsAlert<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct ApnsAps<'a> {
    alert: ApnsAlert<'a>,
    sound: &'static str,
}

#[derive(Debug, Serialize)]
struct ApnsBody<'a> {
    aps: ApnsAps<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    related_event_id: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ApnsErrorBody {
    reason: Option<String>,
}

/// Map an APNs error response to a failure, flagging dead tokens.
fn classify_failure(status: u16, reason: Option<&str>) -> SendFailure {
    let message = format!(
        "APNs rejected notification: status {} reason {}",
        status,
        reason.unwrap_or("<none>")
    );
    match (status, reason) {
        (_, Some("BadDeviceToken")) | (_, Some("DeviceTokenNotForTopic")) => {
            SendFailure::permanent(DeactivationReason::BadDeviceToken, message)
        }
        (410, _) | (_, Some("Unregistered")) => {
            SendFailure::permanent(DeactivationReason::NotRegistered, message)
        }
        _ => SendFailure::transient(message),
    }
}

/// APNs device tokens are hex-encoded byte strings.
fn is_hex_token(token: &str) -> bool {
    !token.is_empty() && token.len() % 2 == 0 && token.bytes().all(|b| b.is_ascii_hexdigit())
}

pub struct ApnsDispatcher {
    config: ApnsConfig,
    tokens: ApnsTokenCache,
    client: reqwest::Client,
}

impl ApnsDispatcher {
    pub fn new(config: ApnsConfig) -> Result<Self> {
        let tokens = ApnsTokenCache::new(&config)?;
        Self::with_token_cache(config, tokens)
    }

    pub fn with_token_cache(config: ApnsConfig, tokens: ApnsTokenCache) -> Result<Self> {
        Ok(Self {
            config,
            tokens,
            client: build_client(REQUEST_TIMEOUT)?,
        })
    }

    async fn send_one(
        &self,
        target: &PushTarget,
        payload: &NotificationPayload,
    ) -> std::result::Result<(), SendFailure> {
        let SubscriptionKind::Native {
            token, environment, ..
        } = &target.kind
        else {
            return Err(SendFailure::transient("not a native subscription"));
        };
        if !is_hex_token(token) {
            return Err(SendFailure::permanent(
                DeactivationReason::BadDeviceToken,
                "APNs device token is not hex",
            ));
        }

        let jwt = self
            .tokens
            .token()
            .map_err(|e| SendFailure::transient(e.to_string()))?;

        let url = format!("{}/3/device/{}", self.config.base_url_for(*environment), token);
        let body = ApnsBody {
            aps: ApnsAps {
                alert: ApnsAlert {
                    title: &payload.title,
                    body: &payload.body,
                },
                sound: "default",
            },
            notification_id: payload.notification_id.as_deref(),
            related_event_id: payload.related_event_id.as_deref(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&jwt)
            .header("apns-topic", &self.config.bundle_id)
            .header("apns-push-type", "alert")
            .header("apns-priority", "10")
            .json(&body)
            .send()
            .await
            .map_err(|e| SendFailure::transient(format!("APNs request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let reason = serde_json::from_str::<ApnsErrorBody>(&text)
            .ok()
            .and_then(|b| b.reason);

        if reason.as_deref() == Some("ExpiredProviderToken") {
            self.tokens.invalidate();
        }

        let mut failure = classify_failure(status.as_u16(), reason.as_deref());
        if reason.is_none() && !text.is_empty() {
            failure.message = format!("{} body {}", failure.message, truncate_string(&text, 200));
        }
        Err(failure)
    }
}

#[async_trait]
impl PushDispatcher for ApnsDispatcher {
    fn transport(&self) -> Transport {
        Transport::Apns
    }

    async fn send(&self, targets: &[PushTarget], payload: &NotificationPayload) -> DispatchReport {
        let report = fan_out(targets, DEFAULT_CONCURRENCY, |target| {
            self.send_one(target, payload).boxed()
        })
        .await;

        for outcome in report.per_target.iter().filter(|o| !o.success) {
            tracing::warn!(
                user_id = %outcome.user_id,
                subscription_id = %outcome.subscription_id,
                error = outcome.error.as_deref().unwrap_or_default(),
                "APNs delivery failed"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::pkcs8::{EncodePrivateKey, LineEnding};
    use rstest::rstest;

    fn test_config() -> ApnsConfig {
        let secret = p256::SecretKey::random(&mut p256::elliptic_curve::rand_core::OsRng);
        let pem = secret.to_pkcs8_pem(LineEnding::LF).unwrap();
        ApnsConfig::new("KEY123", "TEAM456", "com.example.app", pem.to_string())
    }

    fn decode_claims(jwt: &str) -> serde_json::Value {
        let claims_b64 = jwt.split('.').nth(1).unwrap();
        let bytes = super::super::web_push::decode_b64url(claims_b64).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_token_reused_before_refresh_and_reminted_after() {
        let start = Utc::now();
        let now = Arc::new(Mutex::new(start));
        let clock_now = now.clone();
        let cache =
            ApnsTokenCache::with_clock(&test_config(), Arc::new(move || *clock_now.lock()))
                .unwrap();

        let first = cache.token().unwrap();
        let claims = decode_claims(&first);
        assert_eq!(claims["iss"], "TEAM456");
        assert_eq!(claims["iat"], start.timestamp());

        *now.lock() = start + chrono::Duration::minutes(49);
        assert_eq!(cache.token().unwrap(), first);

        *now.lock() = start + chrono::Duration::minutes(51);
        let refreshed = cache.token().unwrap();
        assert_ne!(refreshed, first);
        assert_eq!(
            decode_claims(&refreshed)["iat"],
            (start + chrono::Duration::minutes(51)).timestamp()
        );
    }

    #[rstest]
    #[case("a1b2c3d4", true)]
    #[case("A1B2C3D4E5F6", true)]
    #[case("", false)]
    #[case("abc", false)]
    #[case("../../3/device/x", false)]
    #[case("zz00", false)]
    fn test_is_hex_token(#[case] token: &str, #[case] valid: bool) {
        assert_eq!(is_hex_token(token), valid);
    }

    #[test]
    fn test_token_header_carries_key_id() {
        let cache = ApnsTokenCache::new(&test_config()).unwrap();
        let header = jsonwebtoken::decode_header(&cache.token().unwrap()).unwrap();
        assert_eq!(header.alg, Algorithm::ES256);
        assert_eq!(header.kid.as_deref(), Some("KEY123"));
    }

    #[test]
    fn test_invalidate_forces_new_token() {
        let start = Utc::now();
        let now = Arc::new(Mutex::new(start));
        let clock_now = now.clone();
        let cache =
            ApnsTokenCache::with_clock(&test_config(), Arc::new(move || *clock_now.lock()))
                .unwrap();
        let first = cache.token().unwrap();

        *now.lock() = start + chrono::Duration::seconds(5);
        cache.invalidate();
        assert_ne!(cache.token().unwrap(), first);
    }

    #[test]
    fn test_host_follows_token_environment() {
        let config = test_config();
        assert_eq!(config.base_url_for(Some(ApnsEnvironment::Sandbox)), SANDBOX_URL);
        assert_eq!(
            config.base_url_for(Some(ApnsEnvironment::Production)),
            PRODUCTION_URL
        );
        assert_eq!(config.base_url_for(None), PRODUCTION_URL);
    }

    #[rstest]
    #[case(400, Some("BadDeviceToken"), Some(DeactivationReason::BadDeviceToken))]
    #[case(400, Some("DeviceTokenNotForTopic"), Some(DeactivationReason::BadDeviceToken))]
    #[case(410, Some("Unregistered"), Some(DeactivationReason::NotRegistered))]
    #[case(410, None, Some(DeactivationReason::NotRegistered))]
    #[case(403, Some("ExpiredProviderToken"), None)]
    #[case(429, Some("TooManyRequests"), None)]
    #[case(503, None, None)]
    fn test_classify_failure(
        #[case] status: u16,
        #[case] reason: Option<&str>,
        #[case] expected: Option<DeactivationReason>,
    ) {
        assert_eq!(classify_failure(status, reason).deactivate, expected);
    }
}
