use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::constants::{OTP_DIGITS, REFERRAL_CODE_LEN};

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Passwords
// =============================================================================

/// Hash a password using Argon2id
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against an Argon2id hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            tracing::warn!("Stored password hash is unreadable: {}", e);
            false
        }
    }
}

// =============================================================================
// Session tokens
// =============================================================================

/// JWT claims carried by every session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: String,
    pub email: String,
    /// `user` or `admin`
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issue an HS256 session token
pub fn issue_token(
    user_id: &str,
    email: &str,
    role: &str,
    secret: &str,
    ttl_secs: i64,
) -> Result<String, jsonwebtoken::errors::Error> {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        role: role.to_string(),
        iat: now,
        exp: now.saturating_add(ttl_secs),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
}

/// Validate and decode a session token (signature and expiry)
pub fn validate_token(token: &str, secret: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )?;
    Ok(data.claims)
}

// =============================================================================
// One-time passcodes and referral codes
// =============================================================================

/// Generate a zero-padded numeric passcode
pub fn generate_otp() -> String {
    let max = 10u32.pow(OTP_DIGITS as u32);
    let code = rand::thread_rng().gen_range(0..max);
    format!("{:0width$}", code, width = OTP_DIGITS)
}

/// Keyed hash of an OTP bound to the address it was sent to
///
/// `otp_hash = HMAC-SHA256(pepper, email + ":" + code)`; the plain code is
/// never stored.
pub fn hash_otp(email: &str, code: &str, pepper: &str) -> String {
    HmacSha256::new_from_slice(pepper.as_bytes())
        .map(|mut mac| {
            mac.update(otp_message(email, code).as_bytes());
            hex::encode(mac.finalize().into_bytes())
        })
        .unwrap_or_default()
}

/// Constant-time check of a submitted code against its stored hash
pub fn verify_otp(email: &str, code: &str, stored_hash: &str, pepper: &str) -> bool {
    verify_hmac(&otp_message(email, code), stored_hash, pepper)
}

fn otp_message(email: &str, code: &str) -> String {
    format!("{}:{}", email.trim().to_lowercase(), code.trim())
}

/// Generate a referral code from an alphabet without look-alike characters
pub fn generate_referral_code() -> String {
    const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    (0..REFERRAL_CODE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

// =============================================================================
// Webhook signatures
// =============================================================================

/// Verify a hex-encoded HMAC-SHA256 signature
pub fn verify_hmac(data: &str, signature: &str, secret: &str) -> bool {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => {
            tracing::error!("Failed to create HMAC instance");
            return false;
        }
    };

    mac.update(data.as_bytes());

    let sig_bytes = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => {
            tracing::warn!("Invalid hex signature format");
            return false;
        }
    };

    mac.verify_slice(&sig_bytes).is_ok()
}

/// Validate timestamp is within `max_age_secs` of `now`, in either direction
pub fn validate_timestamp(timestamp: i64, max_age_secs: i64, now: i64) -> bool {
    let age_seconds = (now - timestamp).abs();

    if age_seconds > max_age_secs {
        tracing::warn!(
            "Timestamp too old: {} seconds (max: {})",
            age_seconds,
            max_age_secs
        );
        return false;
    }

    true
}

/// Why a webhook signature was rejected
#[derive(Debug, PartialEq, Eq)]
pub enum SignatureError {
    Malformed,
    Mismatch,
    Expired,
}

/// Verify a payment processor `Stripe-Signature` header
///
/// Header format: `t=<unix>,v1=<hex>[,v1=<hex>...]`. The signed payload is
/// `"{t}.{body}"`; any `v1` entry may match.
pub fn verify_stripe_signature(
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                timestamp = Some(value.parse::<i64>().map_err(|_| SignatureError::Malformed)?)
            }
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed)?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed);
    }

    let signed_payload = format!("{}.{}", timestamp, payload);
    if !signatures
        .iter()
        .any(|sig| verify_hmac(&signed_payload, sig, secret))
    {
        return Err(SignatureError::Mismatch);
    }

    if !validate_timestamp(timestamp, tolerance_secs, now) {
        return Err(SignatureError::Expired);
    }

    Ok(())
}

/// Verify an auth provider (svix) webhook
///
/// The secret is `whsec_<base64 key>`, the signed content is
/// `"{id}.{timestamp}.{body}"` and the header holds space-separated
/// `v1,<base64>` entries.
pub fn verify_svix_signature(
    msg_id: &str,
    timestamp: &str,
    payload: &str,
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let key = BASE64
        .decode(secret.strip_prefix("whsec_").unwrap_or(secret))
        .map_err(|_| SignatureError::Malformed)?;
    let ts: i64 = timestamp.parse().map_err(|_| SignatureError::Malformed)?;

    let signed_content = format!("{}.{}.{}", msg_id, timestamp, payload);

    let matched = header
        .split_whitespace()
        .filter_map(|entry| entry.strip_prefix("v1,"))
        .filter_map(|sig| BASE64.decode(sig).ok())
        .any(|sig| {
            HmacSha256::new_from_slice(&key)
                .map(|mut mac| {
                    mac.update(signed_content.as_bytes());
                    mac.verify_slice(&sig).is_ok()
                })
                .unwrap_or(false)
        });

    if !matched {
        return Err(SignatureError::Mismatch);
    }

    if !validate_timestamp(ts, tolerance_secs, now) {
        return Err(SignatureError::Expired);
    }

    Ok(())
}
