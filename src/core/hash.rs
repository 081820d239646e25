use sha3::{Digest, Sha3_256};

/// Computes the SHA3-256 digest of byte data as lowercase hex
pub fn sha3_256_hex(data: &[u8]) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// First eight bytes of the content digest, used to seed deterministic choices
pub fn content_seed(data: &[u8]) -> u64 {
    let digest = Sha3_256::digest(data);
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(seed)
}

/// Joins a prefix and key parts into a cache key, e.g. `crop:<hash>:png`
pub fn cache_key<S: AsRef<str>>(prefix: &str, parts: &[S]) -> String {
    let mut key = String::from(prefix);
    for part in parts {
        key.push(':');
        key.push_str(part.as_ref());
    }
    key
}

/// Dedup key for the public crop endpoint: content, extension and MIME type
pub fn upload_cache_key(image_hash: &str, extension: &str, mime: &str) -> String {
    cache_key("crop", &[image_hash, extension, mime])
}

/// Dedup key for the contract analysis endpoint
pub fn analysis_cache_key(
    image_hash: &str,
    scene: &str,
    ratio: &str,
    model: &str,
    prompt_version: &str,
) -> String {
    cache_key("analyze", &[image_hash, scene, ratio, model, prompt_version])
}
