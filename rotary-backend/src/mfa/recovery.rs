//! Single-use recovery codes in the form XXXX-XXXX

use rand::Rng;

use crate::auth::{constant_time_eq, generate_salt, hash_secret};
use crate::models::RecoveryCode;

pub const RECOVERY_CODE_COUNT: usize = 10;

/// No 0/O or 1/I
const ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

pub fn generate_code() -> String {
    let mut rng = rand::thread_rng();
    let mut chars: Vec<char> = (0..8)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    chars.insert(4, '-');
    chars.into_iter().collect()
}

/// Uppercase, dash optional; None if it cannot be a recovery code
pub fn normalize(input: &str) -> Option<String> {
    let compact: String = input
        .trim()
        .chars()
        .filter(|c| *c != '-' && !c.is_whitespace())
        .collect::<String>()
        .to_uppercase();
    if compact.len() != 8 || !compact.bytes().all(|b| ALPHABET.contains(&b)) {
        return None;
    }
    Some(format!("{}-{}", &compact[..4], &compact[4..]))
}

pub fn looks_like_recovery_code(input: &str) -> bool {
    normalize(input).is_some()
}

/// Fresh plaintext codes with their (hash, salt) rows
pub fn generate_set() -> (Vec<String>, Vec<(String, String)>) {
    let codes: Vec<String> = (0..RECOVERY_CODE_COUNT).map(|_| generate_code()).collect();
    let hashed = codes
        .iter()
        .map(|code| {
            let salt = generate_salt();
            (hash_secret(&salt, code), salt)
        })
        .collect();
    (codes, hashed)
}

/// Find the stored code matching the input
pub fn find_match<'a>(stored: &'a [RecoveryCode], input: &str) -> Option<&'a RecoveryCode> {
    let normalized = normalize(input)?;
    stored
        .iter()
        .find(|c| constant_time_eq(hash_secret(&c.salt, &normalized).as_bytes(), c.code_hash.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_code_format() {
        for _ in 0..50 {
            let code = generate_code();
            assert_eq!(code.len(), 9);
            assert_eq!(&code[4..5], "-");
            assert_eq!(normalize(&code).as_deref(), Some(code.as_str()));
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(" abcd-efgh ").as_deref(), Some("ABCD-EFGH"));
        assert_eq!(normalize("abcdefgh").as_deref(), Some("ABCD-EFGH"));
        assert_eq!(normalize("ABCD-EFG"), None);
        // 0 and 1 are not in the alphabet
        assert_eq!(normalize("ABCD-EF01"), None);
        assert!(!looks_like_recovery_code("123456"));
    }

    #[test]
    fn test_set_is_salted_per_code() {
        let (codes, hashed) = generate_set();
        assert_eq!(codes.len(), RECOVERY_CODE_COUNT);
        let salts: std::collections::HashSet<_> = hashed.iter().map(|(_, salt)| salt.clone()).collect();
        assert_eq!(salts.len(), RECOVERY_CODE_COUNT);

        let stored: Vec<RecoveryCode> = hashed
            .into_iter()
            .enumerate()
            .map(|(i, (code_hash, salt))| RecoveryCode {
                id: format!("rc-{}", i),
                user_id: "u1".to_string(),
                code_hash,
                salt,
                used_at: None,
                created_at: Utc::now(),
            })
            .collect();

        let hit = find_match(&stored, &codes[3].to_lowercase().replace('-', "")).unwrap();
        assert_eq!(hit.id, "rc-3");
        assert!(find_match(&stored, "ZZZZ-ZZZZ").is_none() || codes.contains(&"ZZZZ-ZZZZ".to_string()));
    }
}
