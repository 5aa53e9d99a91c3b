//! Firebase Cloud Messaging (HTTP v1) transport for Android devices.

use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{
    DispatchReport, NotificationPayload, PushDispatcher, PushTarget, SendFailure, fan_out,
    truncate_string,
};
use crate::config::env_string;
use crate::domain::{DeactivationReason, SubscriptionKind, Transport};
use crate::utils::http_client::build_client;
use crate::{Error, Result};

pub const DEFAULT_API_BASE: &str = "https://fcm.googleapis.com";
const MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// FCM has no multicast in v1; tokens are sent in chunks of this size.
const BATCH_SIZE: usize = 500;
const DEFAULT_CONCURRENCY: usize = 32;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Access tokens are renewed this long before they expire.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Error code reported for tokens that will never work again.
pub const TOKEN_NOT_REGISTERED: &str = "registration-token-not-registered";

/// Subset of a Google service account key file.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Clone)]
pub enum TokenSource {
    ServiceAccount(ServiceAccountKey),
    /// Pre-issued bearer token; never refreshed.
    Static(String),
}

#[derive(Clone)]
pub struct FcmConfig {
    pub project_id: String,
    pub api_base: String,
    pub token_source: TokenSource,
}

impl std::fmt::Debug for FcmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FcmConfig")
            .field("project_id", &self.project_id)
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl FcmConfig {
    pub fn from_service_account(key: ServiceAccountKey, project_id: Option<String>) -> Result<Self> {
        let project_id = project_id
            .or_else(|| key.project_id.clone())
            .ok_or_else(|| Error::config("FCM project id missing from FCM_PROJECT_ID and the service account"))?;
        Ok(Self {
            project_id,
            api_base: DEFAULT_API_BASE.to_string(),
            token_source: TokenSource::ServiceAccount(key),
        })
    }

    pub fn with_static_token(
        project_id: impl Into<String>,
        api_base: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            api_base: api_base.into(),
            token_source: TokenSource::Static(token.into()),
        }
    }

    /// Reads `FCM_SERVICE_ACCOUNT_JSON` or `FCM_SERVICE_ACCOUNT_PATH`.
    /// `Ok(None)` when neither is set.
    pub fn from_env() -> Result<Option<Self>> {
        let raw = match (
            env_string("FCM_SERVICE_ACCOUNT_JSON"),
            env_string("FCM_SERVICE_ACCOUNT_PATH"),
        ) {
            (Some(json), _) => json,
            (None, Some(path)) => std::fs::read_to_string(&path).map_err(|e| {
                Error::config(format!("Failed to read FCM_SERVICE_ACCOUNT_PATH {}: {}", path, e))
            })?,
            (None, None) => return Ok(None),
        };

        let key: ServiceAccountKey = serde_json::from_str(&raw)
            .map_err(|e| Error::config(format!("Invalid FCM service account: {}", e)))?;
        let mut config = Self::from_service_account(key, env_string("FCM_PROJECT_ID"))?;
        if let Some(base) = env_string("FCM_API_BASE") {
            config.api_base = base;
        }
        Ok(Some(config))
    }

    fn send_url(&self) -> String {
        format!(
            "{}/v1/projects/{}/messages:send",
            self.api_base.trim_end_matches('/'),
            self.project_id
        )
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Debug, Clone)]
struct AccessToken {
    value: String,
    expires_at: i64,
}

#[derive(Debug, Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct FcmAndroid {
    priority: &'static str,
}

#[derive(Debug, Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    #[serde(skip_serializing_if = "std::collections::BTreeMap::is_empty")]
    data: std::collections::BTreeMap<&'static str, &'a str>,
    android: FcmAndroid,
}

#[derive(Debug, Serialize)]
struct FcmRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Debug, Deserialize)]
struct FcmErrorEnvelope {
    error: FcmError,
}

#[derive(Debug, Deserialize)]
struct FcmError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<FcmErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct FcmErrorDetail {
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

/// Map an FCM error response to a failure, flagging unregistered tokens.
fn classify_failure(status: u16, body: &str) -> SendFailure {
    let parsed = serde_json::from_str::<FcmErrorEnvelope>(body).ok();
    let error_code = parsed
        .as_ref()
        .and_then(|e| e.error.details.iter().find_map(|d| d.error_code.clone()));

    let unregistered = status == 404 || error_code.as_deref() == Some("UNREGISTERED");
    if unregistered {
        return SendFailure::permanent(
            DeactivationReason::NotRegistered,
            format!("FCM error {}: {}", status, TOKEN_NOT_REGISTERED),
        );
    }

    let detail = match &parsed {
        Some(env) => format!(
            "{} {}",
            env.error.status.as_deref().unwrap_or_default(),
            env.error.message
        ),
        None => truncate_string(body, 200),
    };
    SendFailure::transient(format!("FCM error {}: {}", status, detail.trim()))
}

pub struct FcmDispatcher {
    config: FcmConfig,
    client: reqwest::Client,
    token: Mutex<Option<AccessToken>>,
}

impl FcmDispatcher {
    pub fn new(config: FcmConfig) -> Result<Self> {
        if let TokenSource::ServiceAccount(key) = &config.token_source {
            // Fail at startup rather than on first send.
            EncodingKey::from_rsa_pem(key.private_key.as_bytes())
                .map_err(|e| Error::config(format!("Invalid FCM private key: {}", e)))?;
        }
        Ok(Self {
            config,
            client: build_client(REQUEST_TIMEOUT)?,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let key = match &self.config.token_source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::ServiceAccount(key) => key,
        };

        let mut cached = self.token.lock().await;
        let now = Utc::now().timestamp();
        if let Some(token) = cached.as_ref()
            && token.expires_at - TOKEN_EXPIRY_MARGIN_SECS > now
        {
            return Ok(token.value.clone());
        }

        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: MESSAGING_SCOPE,
            aud: &key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| Error::config(format!("Invalid FCM private key: {}", e)))?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
            .map_err(|e| Error::transport(format!("Failed to sign FCM assertion: {}", e)))?;

        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer")
            .append_pair("assertion", &assertion)
            .finish();

        let response = self
            .client
            .post(&key.token_uri)
            .header(reqwest::header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(form)
            .send()
            .await
            .map_err(|e| Error::transport(format!("FCM token exchange failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::transport(format!(
                "FCM token exchange returned {}: {}",
                status,
                truncate_string(&body, 200)
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::transport(format!("Invalid FCM token response: {}", e)))?;
        tracing::debug!(expires_in = token.expires_in, "Refreshed FCM access token");

        *cached = Some(AccessToken {
            value: token.access_token.clone(),
            expires_at: now + token.expires_in,
        });
        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn send_one(
        &self,
        target: &PushTarget,
        payload: &NotificationPayload,
        access_token: &str,
    ) -> std::result::Result<(), SendFailure> {
        let SubscriptionKind::Native { token, .. } = &target.kind else {
            return Err(SendFailure::transient("not a native subscription"));
        };

        let mut data = std::collections::BTreeMap::new();
        if let Some(id) = payload.notification_id.as_deref() {
            data.insert("notification_id", id);
        }
        if let Some(id) = payload.related_event_id.as_deref() {
            data.insert("related_event_id", id);
        }

        let request = FcmRequest {
            message: FcmMessage {
                token,
                notification: FcmNotification {
                    title: &payload.title,
                    body: &payload.body,
                },
                data,
                android: FcmAndroid { priority: "high" },
            },
        };

        let response = self
            .client
            .post(self.config.send_url())
            .bearer_auth(access_token)
            .json(&request)
            .send()
            .await
            .map_err(|e| SendFailure::transient(format!("FCM request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status.as_u16(), &body))
    }
}

#[async_trait]
impl PushDispatcher for FcmDispatcher {
    fn transport(&self) -> Transport {
        Transport::Fcm
    }

    async fn send(&self, targets: &[PushTarget], payload: &NotificationPayload) -> DispatchReport {
        if targets.is_empty() {
            return DispatchReport::default();
        }

        // One exchange per batch; a dead token endpoint fails the batch at once.
        let access_token = match self.access_token().await {
            Ok(token) => token,
            Err(e) => {
                tracing::warn!(targets = targets.len(), error = %e, "FCM access token unavailable");
                return DispatchReport::fail_all(targets, &SendFailure::transient(e.to_string()));
            }
        };

        let mut report = DispatchReport::default();
        for chunk in targets.chunks(BATCH_SIZE) {
            let chunk_report = fan_out(chunk, DEFAULT_CONCURRENCY, |target| {
                self.send_one(target, payload, &access_token).boxed()
            })
            .await;
            report.merge(chunk_report);
        }

        for outcome in report.per_target.iter().filter(|o| !o.success) {
            tracing::warn!(
                user_id = %outcome.user_id,
                subscription_id = %outcome.subscription_id,
                error = outcome.error.as_deref().unwrap_or_default(),
                "FCM delivery failed"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(404, "", true)]
    #[case(
        400,
        r#"{"error":{"code":400,"message":"bad","status":"INVALID_ARGUMENT","details":[{"@type":"type.googleapis.com/google.firebase.fcm.v1.FcmError","errorCode":"UNREGISTERED"}]}}"#,
        true
    )]
    #[case(
        400,
        r#"{"error":{"code":400,"message":"bad","status":"INVALID_ARGUMENT","details":[{"errorCode":"INVALID_ARGUMENT"}]}}"#,
        false
    )]
    #[case(503, "unavailable", false)]
    fn test_classify_failure(#[case] status: u16, #[case] body: &str, #[case] permanent: bool) {
        let failure = classify_failure(status, body);
        assert_eq!(failure.deactivate.is_some(), permanent);
        if permanent {
            assert!(failure.message.contains(TOKEN_NOT_REGISTERED));
            assert_eq!(failure.deactivate, Some(DeactivationReason::NotRegistered));
        }
    }

    #[test]
    fn test_send_url() {
        let config = FcmConfig::with_static_token("demo-project", "http://localhost:9/", "t");
        assert_eq!(
            config.send_url(),
            "http://localhost:9/v1/projects/demo-project/messages:send"
        );
    }

    #[test]
    fn test_service_account_project_fallback() {
        let key: ServiceAccountKey = serde_json::from_str(
            r#"{"client_email":"svc@demo.iam.gserviceaccount.com","private_key":"x","project_id":"demo"}"#,
        )
        .unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
        let config = FcmConfig::from_service_account(key, None).unwrap();
        assert_eq!(config.project_id, "demo");
    }
}
