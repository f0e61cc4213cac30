use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Hex HMAC-SHA256 of `body` under `secret`
pub fn sign(secret: &str, body: &[u8]) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Config("invalid webhook secret".to_string()))?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check the signature header against the raw body
pub fn verify(secret: &str, body: &[u8], signature: Option<&str>) -> AppResult<()> {
    let Some(signature) = signature else {
        return Err(AppError::Unauthorized("missing webhook signature".to_string()));
    };
    let expected = hex::decode(signature.trim().trim_start_matches("sha256="))
        .map_err(|_| AppError::Unauthorized("malformed webhook signature".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Config("invalid webhook secret".to_string()))?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| {
        tracing::warn!("Webhook signature mismatch");
        AppError::Unauthorized("invalid webhook signature".to_string())
    })
}
