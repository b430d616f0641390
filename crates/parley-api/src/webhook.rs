use axum::{extract::State, http::HeaderMap, response::IntoResponse};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, warn};

use parley_db::{IdentityClaim, now_ms};

use crate::blocking;
use crate::error::ApiError;
use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Identity-provider event envelope. Only `user.created` and `user.updated`
/// are handled; everything else is acknowledged and ignored.
#[derive(Debug, Deserialize)]
struct IdentityEvent {
    #[serde(rename = "type")]
    kind: String,
    data: IdentityUserData,
}

#[derive(Debug, Deserialize)]
struct IdentityUserData {
    id: String,
    #[serde(default)]
    first_name: Option<String>,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    email_addresses: Vec<EmailAddress>,
    #[serde(default)]
    primary_email_address_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmailAddress {
    id: String,
    email_address: String,
}

impl IdentityUserData {
    fn primary_email(&self) -> Option<&str> {
        let by_id = self.primary_email_address_id.as_deref().and_then(|primary| {
            self.email_addresses
                .iter()
                .find(|e| e.id == primary)
                .map(|e| e.email_address.as_str())
        });
        by_id.or_else(|| self.email_addresses.first().map(|e| e.email_address.as_str()))
    }

    fn display_name(&self) -> Option<String> {
        let full = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if !full.is_empty() {
            return Some(full);
        }
        if let Some(username) = self.username.as_deref().map(str::trim)
            && !username.is_empty()
        {
            return Some(username.to_string());
        }
        self.primary_email().map(str::to_string)
    }
}

/// Verify an svix-style signature: HMAC-SHA256 over `{id}.{timestamp}.{payload}`
/// keyed with the base64-decoded secret. The signature header carries one or
/// more space-separated `v1,<base64>` entries; any match passes.
fn verify_signature(secret: &str, msg_id: &str, timestamp: &str, payload: &[u8], signatures: &str) -> bool {
    let raw_secret = secret.strip_prefix("whsec_").unwrap_or(secret);
    let Ok(key) = BASE64.decode(raw_secret) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(&key) else {
        return false;
    };
    mac.update(format!("{msg_id}.{timestamp}.").as_bytes());
    mac.update(payload);
    let expected = BASE64.encode(mac.finalize().into_bytes());

    signatures
        .split(' ')
        .filter_map(|entry| entry.strip_prefix("v1,"))
        .any(|sig| sig == expected)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, ApiError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidInput(format!("missing {name} header")))
}

pub async fn identity(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<impl IntoResponse, ApiError> {
    let Some(secret) = state.webhook_secret.as_deref() else {
        warn!("identity webhook received but no webhook secret is configured");
        return Err(ApiError::Internal);
    };

    let msg_id = header(&headers, "svix-id")?;
    let timestamp = header(&headers, "svix-timestamp")?;
    let signatures = header(&headers, "svix-signature")?;

    if !verify_signature(secret, msg_id, timestamp, body.as_bytes(), signatures) {
        warn!(msg_id, "identity webhook signature mismatch");
        return Err(ApiError::Unauthenticated);
    }

    let event: IdentityEvent = serde_json::from_str(&body)
        .map_err(|e| ApiError::InvalidInput(format!("malformed webhook payload: {e}")))?;

    match event.kind.as_str() {
        "user.created" | "user.updated" => {
            let claim = IdentityClaim {
                subject_id: event.data.id.clone(),
                name: event.data.display_name().unwrap_or_default(),
                email: event.data.primary_email().unwrap_or_default().to_string(),
                image_url: event.data.image_url.clone().unwrap_or_default(),
            };
            let subject = claim.subject_id.clone();
            let db = state.db.clone();
            blocking(move || Ok(db.upsert_from_webhook(&claim, now_ms())?)).await?;
            info!(subject, kind = event.kind, "identity webhook applied");
        }
        other => {
            info!(kind = other, "ignoring identity webhook event");
        }
    }

    Ok("OK")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, msg_id: &str, timestamp: &str, payload: &[u8]) -> String {
        let key = BASE64.decode(secret.strip_prefix("whsec_").unwrap_or(secret)).unwrap();
        let mut mac = HmacSha256::new_from_slice(&key).unwrap();
        mac.update(format!("{msg_id}.{timestamp}.").as_bytes());
        mac.update(payload);
        format!("v1,{}", BASE64.encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn signature_roundtrip() {
        let secret = format!("whsec_{}", BASE64.encode(b"test-key"));
        let payload = br#"{"type":"user.created"}"#;
        let sig = sign(&secret, "msg_1", "1718000000", payload);

        assert!(verify_signature(&secret, "msg_1", "1718000000", payload, &sig));
        assert!(!verify_signature(&secret, "msg_2", "1718000000", payload, &sig));
        assert!(!verify_signature(&secret, "msg_1", "1718000001", payload, &sig));

        let wrong = format!("whsec_{}", BASE64.encode(b"other-key"));
        assert!(!verify_signature(&wrong, "msg_1", "1718000000", payload, &sig));
    }

    #[test]
    fn signature_accepts_any_listed_entry() {
        let secret = format!("whsec_{}", BASE64.encode(b"test-key"));
        let payload = b"{}";
        let good = sign(&secret, "m", "0", payload);
        let combined = format!("v1,bogus {good}");
        assert!(verify_signature(&secret, "m", "0", payload, &combined));
    }

    #[test]
    fn display_name_falls_back() {
        let mut data = IdentityUserData {
            id: "user_1".into(),
            first_name: Some("Ada".into()),
            last_name: Some("Lovelace".into()),
            username: Some("ada".into()),
            image_url: None,
            email_addresses: vec![EmailAddress {
                id: "em_1".into(),
                email_address: "ada@example.com".into(),
            }],
            primary_email_address_id: Some("em_1".into()),
        };
        assert_eq!(data.display_name().as_deref(), Some("Ada Lovelace"));

        data.first_name = None;
        data.last_name = None;
        assert_eq!(data.display_name().as_deref(), Some("ada"));

        data.username = None;
        assert_eq!(data.display_name().as_deref(), Some("ada@example.com"));

        data.email_addresses.clear();
        assert_eq!(data.display_name(), None);
    }

    #[test]
    fn primary_email_prefers_marked_address() {
        let data = IdentityUserData {
            id: "user_1".into(),
            first_name: None,
            last_name: None,
            username: None,
            image_url: None,
            email_addresses: vec![
                EmailAddress { id: "em_1".into(), email_address: "a@example.com".into() },
                EmailAddress { id: "em_2".into(), email_address: "b@example.com".into() },
            ],
            primary_email_address_id: Some("em_2".into()),
        };
        assert_eq!(data.primary_email(), Some("b@example.com"));
    }
}
