//! URL-safe random identifier generation for entities that are not backed
//! by a typed UUID (sandbox instance ids are exposed to callers as short
//! prefixed strings rather than raw UUIDs, mirroring how the reference
//! hypervisor names its sandboxes).

use rand::Rng;

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generates a URL-safe random id of the form `{prefix}-{12 random chars}`.
#[must_use]
pub fn generate_prefixed_id(prefix: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..12)
        .map(|_| {
            let idx = rng.random_range(0..ALPHABET.len());
            ALPHABET[idx] as char
        })
        .collect();
    format!("{prefix}-{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_prefix_and_length() {
        let id = generate_prefixed_id("sbx");
        assert!(id.starts_with("sbx-"));
        assert_eq!(id.len(), "sbx-".len() + 12);
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = generate_prefixed_id("sbx");
        let b = generate_prefixed_id("sbx");
        assert_ne!(a, b);
    }
}
