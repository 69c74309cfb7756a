//! SOCKS5 credential verification. Hashed entries use bcrypt; plaintext
//! entries compare in constant time. When both forms appear across the user
//! list, hashed entries take precedence at lookup (config validation already
//! rejects a single entry carrying both).

use metroo_core::config::Socks5User;

/// Constant-time byte equality; length differences still fail but the scan
/// does not short-circuit on the first mismatch.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Verify a username/password pair against the configured users.
pub fn verify(users: &[Socks5User], username: &str, password: &str) -> bool {
    let mut entries: Vec<&Socks5User> = users.iter().filter(|u| u.username == username).collect();
    // Hashed takes precedence when the same username appears in both forms.
    entries.sort_by_key(|u| u.password_hash.is_none());
    for user in entries {
        if let Some(hash) = &user.password_hash {
            if bcrypt::verify(password, hash).unwrap_or(false) {
                return true;
            }
            // A hashed entry that fails does not fall through to a plaintext
            // entry for the same user.
            return false;
        }
        if let Some(plain) = &user.password {
            return ct_eq(plain.as_bytes(), password.as_bytes());
        }
    }
    false
}
