//! Web Push transport: RFC 8291 payload encryption and RFC 8292 VAPID auth.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes128Gcm, KeyInit};
use async_trait::async_trait;
use futures::FutureExt;
use base64::Engine as _;
use chrono::Utc;
use dashmap::DashMap;
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::ecdsa::SigningKey;
use p256::ecdsa::signature::Signer;
use p256::elliptic_curve::rand_core::{OsRng, RngCore};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use serde::Serialize;
use sha2::Sha256;
use std::time::Duration;
use url::Url;

use super::{
    DispatchReport, NotificationPayload, PushDispatcher, PushTarget, SendFailure, fan_out,
    truncate_string,
};
use crate::config::env_string;
use crate::domain::{DeactivationReason, SubscriptionKind, Transport};
use crate::utils::http_client::build_client;
use crate::{Error, Result};

const SALT_LEN: usize = 16;
const PUBLIC_KEY_LEN: usize = 65;
const AUTH_SECRET_LEN: usize = 16;
const RECORD_SIZE: u32 = 4096;
const DEFAULT_CONCURRENCY: usize = 16;
const MAX_PAYLOAD_BYTES: usize = 3500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
const MESSAGE_TTL_SECS: u32 = 24 * 60 * 60;
const VAPID_JWT_EXP_SECS: i64 = 12 * 60 * 60;
const VAPID_JWT_SKEW_SECS: i64 = 60;

const IKM_INFO_PREFIX: &[u8] = b"WebPush: info\0";
const CEK_INFO: &[u8] = b"Content-Encoding: aes128gcm\0";
const NONCE_INFO: &[u8] = b"Content-Encoding: nonce\0";

#[derive(Debug, Clone)]
struct CachedVapidJwt {
    jwt: String,
    exp_unix: i64,
}

/// VAPID key pair and contact subject.
#[derive(Debug, Clone)]
pub struct WebPushConfig {
    vapid_public_key_b64: String,
    vapid_private_key_raw: [u8; 32],
    vapid_subject: String,
}

impl WebPushConfig {
    /// Build from base64url raw keys (65-byte uncompressed public, 32-byte private).
    pub fn new(
        vapid_public_key_b64: impl Into<String>,
        vapid_private_key_b64: &str,
        vapid_subject: impl Into<String>,
    ) -> Result<Self> {
        let vapid_public_key_b64 = vapid_public_key_b64.into();
        let public_raw = decode_b64url(&vapid_public_key_b64)
            .map_err(|e| Error::config(format!("Invalid WEB_PUSH_VAPID_PUBLIC_KEY: {}", e)))?;
        if public_raw.len() != PUBLIC_KEY_LEN {
            return Err(Error::config(format!(
                "WEB_PUSH_VAPID_PUBLIC_KEY must decode to {} bytes",
                PUBLIC_KEY_LEN
            )));
        }

        let private_raw: [u8; 32] = decode_b64url(vapid_private_key_b64)
            .map_err(|e| Error::config(format!("Invalid WEB_PUSH_VAPID_PRIVATE_KEY: {}", e)))?
            .try_into()
            .map_err(|_| Error::config("WEB_PUSH_VAPID_PRIVATE_KEY must decode to 32 bytes"))?;

        SigningKey::from_bytes((&private_raw).into())
            .map_err(|_| Error::config("WEB_PUSH_VAPID_PRIVATE_KEY is not a valid P-256 scalar"))?;

        Ok(Self {
            vapid_public_key_b64,
            vapid_private_key_raw: private_raw,
            vapid_subject: vapid_subject.into(),
        })
    }

    /// `Ok(None)` when neither key is set.
    pub fn from_env() -> Result<Option<Self>> {
        match (
            env_string("WEB_PUSH_VAPID_PUBLIC_KEY"),
            env_string("WEB_PUSH_VAPID_PRIVATE_KEY"),
        ) {
            (None, None) => Ok(None),
            (Some(public), Some(private)) => {
                let subject = env_string("WEB_PUSH_VAPID_SUBJECT")
                    .unwrap_or_else(|| "mailto:admin@localhost".to_string());
                Self::new(public, &private, subject).map(Some)
            }
            _ => Err(Error::config(
                "Both WEB_PUSH_VAPID_PUBLIC_KEY and WEB_PUSH_VAPID_PRIVATE_KEY must be set",
            )),
        }
    }

    pub fn vapid_public_key_b64(&self) -> &str {
        &self.vapid_public_key_b64
    }
}

/// Sends encrypted payloads to browser push services.
pub struct WebPushDispatcher {
    config: WebPushConfig,
    client: reqwest::Client,
    vapid_jwt_cache: DashMap<String, CachedVapidJwt>,
}

impl WebPushDispatcher {
    pub fn new(config: WebPushConfig) -> Result<Self> {
        Ok(Self {
            config,
            client: build_client(REQUEST_TIMEOUT)?,
            vapid_jwt_cache: DashMap::new(),
        })
    }

    pub fn vapid_public_key(&self) -> &str {
        self.config.vapid_public_key_b64()
    }

    async fn send_one(
        &self,
        target: &PushTarget,
        body: &[u8],
    ) -> std::result::Result<(), SendFailure> {
        let SubscriptionKind::WebPush {
            endpoint,
            p256dh,
            auth,
        } = &target.kind
        else {
            return Err(SendFailure::transient("not a web push subscription"));
        };

        let request = self
            .build_request(endpoint, p256dh, auth, body)
            .map_err(|e| SendFailure::transient(e.to_string()))?;

        let response = request
            .send()
            .await
            .map_err(|e| SendFailure::transient(format!("Web push request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        if matches!(status.as_u16(), 404 | 410) {
            return Err(SendFailure::permanent(
                DeactivationReason::EndpointGone,
                format!("push endpoint gone ({})", status),
            ));
        }

        let body_text = response
            .text()
            .await
            .unwrap_or_else(|_| "<failed to read response body>".to_string());
        Err(SendFailure::transient(format!(
            "Web push failed: status {} body {}",
            status,
            truncate_string(&body_text, 500)
        )))
    }

    fn build_request(
        &self,
        endpoint: &str,
        p256dh: &str,
        auth: &str,
        plaintext: &[u8],
    ) -> Result<reqwest::RequestBuilder> {
        let aud = push_service_audience(endpoint)?;
        let jwt = self.vapid_jwt_for(&aud)?;

        let client_public: [u8; PUBLIC_KEY_LEN] = decode_b64url(p256dh)
            .map_err(|e| Error::transport(format!("Invalid p256dh key: {}", e)))?
            .try_into()
            .map_err(|_| Error::transport("Invalid p256dh key length"))?;
        let client_auth: [u8; AUTH_SECRET_LEN] = decode_b64url(auth)
            .map_err(|e| Error::transport(format!("Invalid auth key: {}", e)))?
            .try_into()
            .map_err(|_| Error::transport("Invalid auth secret length"))?;

        let encrypted = encrypt_aes128gcm(plaintext, &client_public, &client_auth)?;

        Ok(self
            .client
            .post(endpoint)
            .header("TTL", MESSAGE_TTL_SECS.to_string())
            .header("Urgency", "high")
            .header("Content-Encoding", "aes128gcm")
            .header("Content-Type", "application/octet-stream")
            .header(
                "Authorization",
                format!("vapid t={}, k={}", jwt, self.config.vapid_public_key_b64),
            )
            .body(encrypted))
    }

    fn vapid_jwt_for(&self, aud: &str) -> Result<String> {
        let now = Utc::now().timestamp();
        if let Some(entry) = self.vapid_jwt_cache.get(aud)
            && entry.exp_unix - VAPID_JWT_SKEW_SECS > now
        {
            return Ok(entry.jwt.clone());
        }

        let exp_unix = now + VAPID_JWT_EXP_SECS;
        let jwt = build_vapid_jwt(
            aud,
            &self.config.vapid_subject,
            &self.config.vapid_private_key_raw,
            exp_unix,
        )?;
        self.vapid_jwt_cache.insert(
            aud.to_string(),
            CachedVapidJwt {
                jwt: jwt.clone(),
                exp_unix,
            },
        );
        Ok(jwt)
    }
}

#[async_trait]
impl PushDispatcher for WebPushDispatcher {
    fn transport(&self) -> Transport {
        Transport::WebPush
    }

    async fn send(&self, targets: &[PushTarget], payload: &NotificationPayload) -> DispatchReport {
        let body = match WebPushMessage::from_payload(payload).into_bytes_capped(MAX_PAYLOAD_BYTES) {
            Ok(body) => body,
            Err(e) => {
                return DispatchReport::fail_all(targets, &SendFailure::transient(e.to_string()));
            }
        };

        let report = fan_out(targets, DEFAULT_CONCURRENCY, |target| {
            self.send_one(target, &body).boxed()
        })
        .await;

        for outcome in report.per_target.iter().filter(|o| !o.success) {
            tracing::warn!(
                user_id = %outcome.user_id,
                subscription_id = %outcome.subscription_id,
                error = outcome.error.as_deref().unwrap_or_default(),
                "Web push delivery failed"
            );
        }
        report
    }
}

/// JSON document the service worker receives.
#[derive(Debug, Clone, Serialize)]
struct WebPushMessage {
    title: String,
    body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    related_event_id: Option<String>,
    categories: Vec<String>,
    created_at: String,
}

impl WebPushMessage {
    fn from_payload(payload: &NotificationPayload) -> Self {
        Self {
            title: truncate_string(&payload.title, 120),
            body: truncate_string(&payload.body, 600),
            notification_id: payload.notification_id.clone(),
            related_event_id: payload.related_event_id.clone(),
            categories: payload.categories.iter().map(|c| c.to_string()).collect(),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    /// Serialize, dropping the body if the document would exceed `max_bytes`.
    fn into_bytes_capped(mut self, max_bytes: usize) -> Result<Vec<u8>> {
        let bytes = serde_json::to_vec(&self)?;
        if bytes.len() <= max_bytes {
            return Ok(bytes);
        }

        self.title = truncate_string(&self.title, 80);
        self.body = "Open the app to view details.".to_string();
        Ok(serde_json::to_vec(&self)?)
    }
}

/// `scheme://host[:port]` of the push endpoint, used as the VAPID audience.
fn push_service_audience(endpoint: &str) -> Result<String> {
    let url = Url::parse(endpoint)
        .map_err(|e| Error::transport(format!("Invalid push endpoint URL: {}", e)))?;
    let host = match url
        .host()
        .ok_or_else(|| Error::transport("Push endpoint missing host"))?
    {
        url::Host::Domain(d) => d.to_string(),
        url::Host::Ipv4(ip) => ip.to_string(),
        url::Host::Ipv6(ip) => format!("[{}]", ip),
    };

    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    })
}

pub(crate) fn decode_b64url(input: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(input.trim_end_matches('=').as_bytes())
}

pub(crate) fn encode_b64url(input: &[u8]) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(input)
}

fn hkdf_sha256<const N: usize>(salt: &[u8], ikm: &[u8], info: &[u8]) -> Result<[u8; N]> {
    let mut okm = [0u8; N];
    Hkdf::<Sha256>::new(Some(salt), ikm)
        .expand(info, &mut okm)
        .map_err(|_| Error::transport("HKDF expand failed"))?;
    Ok(okm)
}

/// Encrypt one record with `aes128gcm` and prepend the RFC 8188 header.
///
/// Body layout: salt (16) | record size (4, BE) | key id len (1) | sender public key (65) | ciphertext.
fn encrypt_aes128gcm(
    plaintext: &[u8],
    receiver_public_raw: &[u8; PUBLIC_KEY_LEN],
    auth_secret: &[u8; AUTH_SECRET_LEN],
) -> Result<Vec<u8>> {
    if plaintext.is_empty() {
        return Err(Error::transport("Web push payload cannot be empty"));
    }

    let mut rng = OsRng;
    let mut salt = [0u8; SALT_LEN];
    rng.fill_bytes(&mut salt);

    let receiver_public = p256::PublicKey::from_sec1_bytes(receiver_public_raw)
        .map_err(|_| Error::transport("Invalid receiver public key"))?;

    let sender_secret = EphemeralSecret::random(&mut rng);
    let sender_public_point = p256::PublicKey::from(&sender_secret).to_encoded_point(false);
    let sender_public_raw = sender_public_point.as_bytes();

    let shared = sender_secret.diffie_hellman(&receiver_public);

    let mut key_info = Vec::with_capacity(IKM_INFO_PREFIX.len() + PUBLIC_KEY_LEN * 2);
    key_info.extend_from_slice(IKM_INFO_PREFIX);
    key_info.extend_from_slice(receiver_public_raw);
    key_info.extend_from_slice(sender_public_raw);

    let ikm: [u8; 32] = hkdf_sha256(auth_secret, shared.raw_secret_bytes().as_slice(), &key_info)?;
    let cek: [u8; 16] = hkdf_sha256(&salt, &ikm, CEK_INFO)?;
    let nonce: [u8; 12] = hkdf_sha256(&salt, &ikm, NONCE_INFO)?;

    // Single record: the last-record delimiter (0x02) is the only padding.
    let mut record = Vec::with_capacity(plaintext.len() + 1);
    record.extend_from_slice(plaintext);
    record.push(2);

    let cipher = Aes128Gcm::new_from_slice(&cek)
        .map_err(|_| Error::transport("Invalid content encryption key length"))?;
    let ciphertext = cipher
        .encrypt((&nonce).into(), record.as_slice())
        .map_err(|_| Error::transport("AES-GCM encryption failed"))?;

    let mut body =
        Vec::with_capacity(SALT_LEN + 4 + 1 + sender_public_raw.len() + ciphertext.len());
    body.extend_from_slice(&salt);
    body.extend_from_slice(&RECORD_SIZE.to_be_bytes());
    body.push(sender_public_raw.len() as u8);
    body.extend_from_slice(sender_public_raw);
    body.extend_from_slice(&ciphertext);
    Ok(body)
}

/// Compact ES256 JWT with `aud`, `exp` and `sub` claims.
fn build_vapid_jwt(
    aud: &str,
    subject: &str,
    private_key_raw: &[u8; 32],
    exp_unix: i64,
) -> Result<String> {
    #[derive(Serialize)]
    struct Claims<'a> {
        aud: &'a str,
        exp: i64,
        sub: &'a str,
    }

    let header_b64 = encode_b64url(br#"{"typ":"JWT","alg":"ES256"}"#);
    let claims_b64 = encode_b64url(&serde_json::to_vec(&Claims {
        aud,
        exp: exp_unix,
        sub: subject,
    })?);
    let signing_input = format!("{}.{}", header_b64, claims_b64);

    let signing_key = SigningKey::from_bytes(private_key_raw.into())
        .map_err(|_| Error::config("Invalid VAPID private key"))?;
    let signature: p256::ecdsa::Signature = signing_key.sign(signing_input.as_bytes());

    Ok(format!(
        "{}.{}",
        signing_input,
        encode_b64url(signature.to_bytes().as_slice())
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::VerifyingKey;
    use p256::ecdsa::signature::Verifier;

    #[test]
    fn test_audience_keeps_explicit_port() {
        assert_eq!(
            push_service_audience("https://fcm.googleapis.com/fcm/send/abc").unwrap(),
            "https://fcm.googleapis.com"
        );
        assert_eq!(
            push_service_audience("http://127.0.0.1:8080/push/1").unwrap(),
            "http://127.0.0.1:8080"
        );
        assert!(push_service_audience("not a url").is_err());
    }

    #[test]
    fn test_receiver_can_decrypt() {
        let receiver_secret = p256::SecretKey::random(&mut OsRng);
        let receiver_public = receiver_secret.public_key().to_encoded_point(false);
        let receiver_public_raw: [u8; PUBLIC_KEY_LEN] =
            receiver_public.as_bytes().try_into().unwrap();
        let mut auth = [0u8; AUTH_SECRET_LEN];
        OsRng.fill_bytes(&mut auth);

        let body = encrypt_aes128gcm(b"{\"title\":\"hi\"}", &receiver_public_raw, &auth).unwrap();

        let salt = &body[..SALT_LEN];
        assert_eq!(&body[SALT_LEN..SALT_LEN + 4], &RECORD_SIZE.to_be_bytes());
        assert_eq!(body[SALT_LEN + 4] as usize, PUBLIC_KEY_LEN);
        let key_start = SALT_LEN + 5;
        let sender_public_raw = &body[key_start..key_start + PUBLIC_KEY_LEN];
        let ciphertext = &body[key_start + PUBLIC_KEY_LEN..];

        let sender_public = p256::PublicKey::from_sec1_bytes(sender_public_raw).unwrap();
        let shared = p256::ecdh::diffie_hellman(
            receiver_secret.to_nonzero_scalar(),
            sender_public.as_affine(),
        );

        let mut key_info = IKM_INFO_PREFIX.to_vec();
        key_info.extend_from_slice(&receiver_public_raw);
        key_info.extend_from_slice(sender_public_raw);
        let ikm: [u8; 32] =
            hkdf_sha256(&auth, shared.raw_secret_bytes().as_slice(), &key_info).unwrap();
        let cek: [u8; 16] = hkdf_sha256(salt, &ikm, CEK_INFO).unwrap();
        let nonce: [u8; 12] = hkdf_sha256(salt, &ikm, NONCE_INFO).unwrap();

        let plaintext = Aes128Gcm::new_from_slice(&cek)
            .unwrap()
            .decrypt((&nonce).into(), ciphertext)
            .unwrap();
        assert_eq!(plaintext.last(), Some(&2));
        assert_eq!(&plaintext[..plaintext.len() - 1], b"{\"title\":\"hi\"}");
    }

    #[test]
    fn test_vapid_jwt_signature_verifies() {
        let signing_key = SigningKey::random(&mut OsRng);
        let private_raw: [u8; 32] = signing_key.to_bytes().into();

        let jwt = build_vapid_jwt(
            "https://push.example.net",
            "mailto:ops@example.com",
            &private_raw,
            1_900_000_000,
        )
        .unwrap();

        let (signing_input, sig_b64) = jwt.rsplit_once('.').unwrap();
        let signature =
            p256::ecdsa::Signature::from_slice(&decode_b64url(sig_b64).unwrap()).unwrap();
        VerifyingKey::from(&signing_key)
            .verify(signing_input.as_bytes(), &signature)
            .unwrap();

        let claims_b64 = signing_input.split('.').nth(1).unwrap();
        let claims: serde_json::Value =
            serde_json::from_slice(&decode_b64url(claims_b64).unwrap()).unwrap();
        assert_eq!(claims["aud"], "https://push.example.net");
        assert_eq!(claims["exp"], 1_900_000_000);
    }

    #[test]
    fn test_oversized_message_drops_body() {
        let payload = NotificationPayload::new("Title", "x".repeat(600));
        let bytes = WebPushMessage::from_payload(&payload)
            .into_bytes_capped(200)
            .unwrap();
        let doc: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["body"], "Open the app to view details.");
    }
}
