use serde_json::Value;

/// A 32-byte BLAKE3 hash used as a fingerprint.
///
/// The workspace keys its result cache by the fingerprint of a task
/// invocation, that is the task name together with its fully resolved
/// configuration. Two invocations with the same fingerprint are considered
/// identical and share a single execution.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in self.0.iter() {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }

    /// Short prefix of the hex form, good enough for log lines.
    pub fn short(self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl std::fmt::Display for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental fingerprint builder.
///
/// JSON objects are fed with their keys sorted, so the resulting hash does
/// not depend on the order in which a configuration was assembled.
#[derive(Default)]
pub(crate) struct Fingerprint(blake3::Hasher);

impl Fingerprint {
    pub(crate) fn str(&mut self, value: &str) -> &mut Self {
        self.0.update(&(value.len() as u64).to_le_bytes());
        self.0.update(value.as_bytes());
        self
    }

    pub(crate) fn json(&mut self, value: &Value) -> &mut Self {
        match value {
            Value::Null => {
                self.0.update(b"n");
            }
            Value::Bool(b) => {
                self.0.update(if *b { b"t" } else { b"f" });
            }
            Value::Number(n) => {
                self.0.update(b"#");
                self.str(&n.to_string());
            }
            Value::String(s) => {
                self.0.update(b"s");
                self.str(s);
            }
            Value::Array(items) => {
                self.0.update(b"[");
                self.0.update(&(items.len() as u64).to_le_bytes());
                for item in items {
                    self.json(item);
                }
            }
            Value::Object(map) => {
                self.0.update(b"{");
                self.0.update(&(map.len() as u64).to_le_bytes());
                let mut keys: Vec<_> = map.keys().collect();
                keys.sort();
                for key in keys {
                    self.str(key);
                    self.json(&map[key]);
                }
            }
        }
        self
    }

    pub(crate) fn finish(&self) -> Hash32 {
        self.0.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hex() {
        let hash = Hash32::from([0xab; 32]);
        assert_eq!(hash.to_hex(), "ab".repeat(32));
        assert_eq!(hash.short(), "abababababab");
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = Fingerprint::default()
            .json(&json!({"a": 1, "b": {"c": true, "d": [1, 2]}}))
            .finish();
        let b = Fingerprint::default()
            .json(&json!({"b": {"d": [1, 2], "c": true}, "a": 1}))
            .finish();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_separates_values() {
        let a = Fingerprint::default().str("ab").str("c").finish();
        let b = Fingerprint::default().str("a").str("bc").finish();
        assert_ne!(a, b);

        let one = Fingerprint::default().json(&json!({"n": 1})).finish();
        let text = Fingerprint::default().json(&json!({"n": "1"})).finish();
        assert_ne!(one, text);
    }
}
