use rand::Rng;

const SUFFIX_BYTES: usize = 3;

/// Builds a receive identity: `prefix` followed by random bytes in hex.
pub fn generate(prefix: &str) -> String {
    let mut rng = rand::thread_rng();
    let mut identity = String::with_capacity(prefix.len() + SUFFIX_BYTES * 2);
    identity.push_str(prefix);
    for _ in 0..SUFFIX_BYTES {
        let byte: u8 = rng.gen();
        identity.push_str(&format!("{byte:02x}"));
    }
    identity
}
