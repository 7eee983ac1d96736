use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const GENERATED_UID_LEN: usize = 14;
pub const MAX_UID_LEN: usize = 40;

/// Generates a short uid that `exists` reports as free.
pub fn generate_uid<F, E>(mut exists: F) -> Result<String, E>
where
    F: FnMut(&str) -> Result<bool, E>,
{
    for _ in 0..64 {
        let candidate = short_uid();
        if !exists(&candidate)? {
            return Ok(candidate);
        }
    }

    Ok(Uuid::now_v7().simple().to_string())
}

fn short_uid() -> String {
    let seed = Uuid::now_v7();
    let mut hasher = Sha256::new();
    hasher.update(seed.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..GENERATED_UID_LEN].to_string()
}

pub fn validate_uid(uid: &str) -> Result<(), String> {
    if uid.len() > MAX_UID_LEN {
        return Err(format!(
            "uid '{}' is longer than {} characters",
            uid, MAX_UID_LEN
        ));
    }
    if !uid
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
    {
        return Err(format!(
            "uid '{}' may only contain letters, digits, '-' and '_'",
            uid
        ));
    }
    Ok(())
}

pub fn slugify(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_dash = false;
    for ch in title.trim().chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_dash = false;
        } else if !last_dash && !out.is_empty() {
            out.push('-');
            last_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
