// Ownership tokens: base-32 unix seconds followed by base-32 of a random u64

use std::time::{SystemTime, UNIX_EPOCH};

const DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

fn base32(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::with_capacity(13);
    while n > 0 {
        out.push(DIGITS[(n % 32) as usize]);
        n /= 32;
    }
    out.reverse();
    out.into_iter().map(char::from).collect()
}

/// Generate a fresh ownership token.
pub fn generate() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let mut token = base32(secs);
    token.push_str(&base32(rand::random::<u64>()));
    token
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_base32() {
        assert_eq!(base32(0), "0");
        assert_eq!(base32(31), "v");
        assert_eq!(base32(32), "10");
        assert_eq!(base32(u64::MAX), "fvvvvvvvvvvvv");
    }

    #[test]
    fn test_tokens_are_unique() {
        let tokens: HashSet<String> = (0..1000).map(|_| generate()).collect();
        assert_eq!(tokens.len(), 1000);
    }

    #[test]
    fn test_token_alphabet() {
        let token = generate();
        assert!(token.len() > 7);
        assert!(token.bytes().all(|b| DIGITS.contains(&b)));
    }
}
