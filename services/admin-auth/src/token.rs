//! Random identifiers, display masking and one-way token digests.

use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Placeholder shown for tokens too short to partially reveal.
pub const MASK_PLACEHOLDER: &str = "********";

/// Marker placed between the revealed head and tail of a masked token.
const ELLIPSIS: &str = "...";

/// Generate `byte_len` cryptographically secure random bytes, hex-encoded.
#[must_use]
pub fn random_token(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    rand::rng().fill(&mut bytes[..]);
    hex::encode(bytes)
}

/// Mask a token for display.
///
/// Tokens longer than 12 characters keep their first 8 and last 4
/// characters; anything shorter becomes [`MASK_PLACEHOLDER`] so the real
/// length is not revealed.
#[must_use]
pub fn mask(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 12 {
        return MASK_PLACEHOLDER.to_string();
    }
    let head: String = chars.iter().take(8).collect();
    let tail: String = chars.iter().skip(chars.len() - 4).collect();
    format!("{head}{ELLIPSIS}{tail}")
}

/// SHA-256 digest of a token, hex-encoded. Persisted in place of the token.
#[must_use]
pub fn digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Constant-time string equality. Differing lengths compare unequal.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_token_length() {
        assert_eq!(random_token(32).len(), 64);
        assert_eq!(random_token(16).len(), 32);
        assert!(random_token(32).chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_tokens_do_not_repeat() {
        let tokens: HashSet<String> = (0..10_000).map(|_| random_token(16)).collect();
        assert_eq!(tokens.len(), 10_000);
    }

    #[test]
    fn test_mask_long_token() {
        let token = "abcdefgh0123456789012345wxyz9876";
        assert_eq!(token.len(), 32);
        assert_eq!(mask(token), "abcdefgh...9876");
    }

    #[test]
    fn test_mask_short_token() {
        assert_eq!(mask(""), MASK_PLACEHOLDER);
        assert_eq!(mask("abc"), MASK_PLACEHOLDER);
        assert_eq!(mask("123456789012"), MASK_PLACEHOLDER);
        assert_eq!(mask("1234567890123"), "12345678...0123");
    }

    #[test]
    fn test_digest_is_stable_hex() {
        let a = digest("adm_token");
        assert_eq!(a, digest("adm_token"));
        assert_ne!(a, digest("adm_tokem"));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("same", "same"));
        assert!(!constant_time_eq("same", "sane"));
        assert!(!constant_time_eq("same", "samey"));
    }

    proptest! {
        #[test]
        fn prop_short_masks_hide_length(token in "[a-z0-9]{0,12}") {
            prop_assert_eq!(mask(&token), MASK_PLACEHOLDER);
        }

        #[test]
        fn prop_long_masks_keep_ends(token in "[a-z0-9]{13,64}") {
            let masked = mask(&token);
            prop_assert!(masked.starts_with(&token[..8]));
            prop_assert!(masked.ends_with(&token[token.len() - 4..]));
            prop_assert_eq!(masked.len(), 15);
        }
    }
}
