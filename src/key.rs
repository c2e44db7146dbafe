use crate::error::{CacheError, Result};

/// Every public cache method validates its key against this alphabet before
/// touching the entry table: `[a-z0-9_-]{1,64}`.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() || key.len() > 64 {
        return Err(CacheError::InvalidArgument(format!(
            "keys must be 1 to 64 characters long: {:?}",
            key
        )));
    }
    if !key
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_' || b == b'-')
    {
        return Err(CacheError::InvalidArgument(format!(
            "keys must match [a-z0-9_-]+: {:?}",
            key
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alphabet() {
        assert!(validate_key("a").is_ok());
        assert!(validate_key("abc-def_123").is_ok());
        assert!(validate_key(&"a".repeat(64)).is_ok());
    }

    #[test]
    fn rejects_empty_and_overlong() {
        assert!(validate_key("").is_err());
        assert!(validate_key(&"a".repeat(65)).is_err());
    }

    #[test]
    fn rejects_disallowed_characters() {
        assert!(validate_key("Abc").is_err());
        assert!(validate_key("has space").is_err());
        assert!(validate_key("has/slash").is_err());
        assert!(validate_key("emoji-\u{1F600}").is_err());
    }
}
