//! Time-based one-time passwords (RFC 6238)

use data_encoding::BASE32_NOPAD;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha1::Sha1;
use sha2::{Sha256, Sha512};

use crate::models::TotpAlgorithm;

/// Steps accepted either side of the current one
const WINDOW: i64 = 1;

/// 20 random bytes, base32 without padding
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 20];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE32_NOPAD.encode(&bytes)
}

pub fn decode_secret(secret: &str) -> Option<Vec<u8>> {
    let cleaned: String = secret
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '=')
        .collect::<String>()
        .to_uppercase();
    BASE32_NOPAD.decode(cleaned.as_bytes()).ok()
}

fn mac_digest<M: Mac + KeyInit>(key: &[u8], msg: &[u8]) -> Option<Vec<u8>> {
    let mut mac = <M as KeyInit>::new_from_slice(key).ok()?;
    mac.update(msg);
    Some(mac.finalize().into_bytes().to_vec())
}

/// HOTP value for a counter (RFC 4226 dynamic truncation)
pub fn hotp(algorithm: TotpAlgorithm, key: &[u8], counter: u64, digits: u32) -> Option<String> {
    let msg = counter.to_be_bytes();
    let digest = match algorithm {
        TotpAlgorithm::Sha1 => mac_digest::<Hmac<Sha1>>(key, &msg)?,
        TotpAlgorithm::Sha256 => mac_digest::<Hmac<Sha256>>(key, &msg)?,
        TotpAlgorithm::Sha512 => mac_digest::<Hmac<Sha512>>(key, &msg)?,
    };
    let offset = (digest[digest.len() - 1] & 0x0f) as usize;
    let binary = ((digest[offset] as u32 & 0x7f) << 24)
        | ((digest[offset + 1] as u32) << 16)
        | ((digest[offset + 2] as u32) << 8)
        | (digest[offset + 3] as u32);
    let code = binary % 10u32.pow(digits);
    Some(format!("{:0width$}", code, width = digits as usize))
}

/// Code for a unix timestamp
pub fn code_at(algorithm: TotpAlgorithm, key: &[u8], unix_time: u64, period: u64, digits: u32) -> Option<String> {
    hotp(algorithm, key, unix_time / period.max(1), digits)
}

/// Check a code against the steps around unix_time
pub fn verify_at(
    algorithm: TotpAlgorithm,
    key: &[u8],
    code: &str,
    unix_time: u64,
    period: u64,
    digits: u32,
) -> bool {
    let code = code.trim();
    if code.len() != digits as usize || !code.chars().all(|c| c.is_ascii_digit()) {
        return false;
    }
    let step = (unix_time / period.max(1)) as i64;
    (-WINDOW..=WINDOW).any(|delta| {
        let counter = step + delta;
        counter >= 0
            && hotp(algorithm, key, counter as u64, digits)
                .map(|expected| crate::auth::constant_time_eq(expected.as_bytes(), code.as_bytes()))
                .unwrap_or(false)
    })
}

pub fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Provisioning URI understood by authenticator apps
pub fn provisioning_uri(
    issuer: &str,
    account: &str,
    secret: &str,
    algorithm: TotpAlgorithm,
    digits: u32,
    period: u64,
) -> String {
    let issuer_enc = urlencoding::encode(issuer);
    format!(
        "otpauth://totp/{}:{}?secret={}&issuer={}&algorithm={}&digits={}&period={}",
        issuer_enc,
        urlencoding::encode(account),
        secret,
        issuer_enc,
        algorithm,
        digits,
        period
    )
}
