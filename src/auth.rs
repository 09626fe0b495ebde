//! Admin bearer tokens.
//!
//! A token is `<admin_id>.<signature>` where the signature is the hex
//! HMAC-SHA256 of the admin id under the server's `admin_secret`. Tokens
//! are minted with `grants token <admin_id>` and checked by the server's
//! auth middleware; the admin id becomes `reviewed_by` on review actions.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{DiscoveryError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Authenticated admin identity attached to requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminIdentity {
    pub admin_id: String,
}

fn mac_for(secret: &str, payload: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(payload);
    mac
}

/// Hex HMAC-SHA256 of `payload` under `secret`.
pub fn sign(secret: &str, payload: &[u8]) -> String {
    hex::encode(mac_for(secret, payload).finalize().into_bytes())
}

fn validate_admin_id(admin_id: &str) -> Result<()> {
    if admin_id.is_empty() || admin_id.len() > 100 {
        return Err(DiscoveryError::validation(
            "admin id must be 1-100 characters",
        ));
    }
    if admin_id.contains('.') || admin_id.chars().any(char::is_whitespace) {
        return Err(DiscoveryError::validation(
            "admin id must not contain dots or whitespace",
        ));
    }
    Ok(())
}

pub fn issue_token(secret: &str, admin_id: &str) -> Result<String> {
    if secret.is_empty() {
        return Err(DiscoveryError::validation("server.admin_secret is not set"));
    }
    validate_admin_id(admin_id)?;
    Ok(format!("{}.{}", admin_id, sign(secret, admin_id.as_bytes())))
}

/// Checks a token in constant time and returns the admin it names.
pub fn verify_token(secret: &str, token: &str) -> Result<AdminIdentity> {
    let unauthorized = || DiscoveryError::Unauthorized("invalid admin token".to_string());

    if secret.is_empty() {
        return Err(unauthorized());
    }
    let (admin_id, signature) = token.trim().rsplit_once('.').ok_or_else(unauthorized)?;
    if validate_admin_id(admin_id).is_err() {
        return Err(unauthorized());
    }
    let signature = hex::decode(signature).map_err(|_| unauthorized())?;

    mac_for(secret, admin_id.as_bytes())
        .verify_slice(&signature)
        .map_err(|_| unauthorized())?;

    Ok(AdminIdentity {
        admin_id: admin_id.to_string(),
    })
}
