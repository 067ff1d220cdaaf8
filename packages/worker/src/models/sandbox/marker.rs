use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// Token appended to the guest prompt so command completion can be detected
/// without colliding with guest output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Marker(String);

impl Marker {
    pub fn generate() -> Self {
        let seed: [u8; 32] = rand::random();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(now.to_le_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// The marker shared by every controller in this process.
    pub fn process() -> &'static Marker {
        static MARKER: OnceLock<Marker> = OnceLock::new();
        MARKER.get_or_init(Marker::generate)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two non-empty halves. Quoting them separately in a command keeps the
    /// echoed command from containing the marker itself.
    pub fn halves(&self) -> (&str, &str) {
        let mid = (self.0.len() / 2).max(1);
        self.0.split_at(mid)
    }
}

impl From<&str> for Marker {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_markers_differ() {
        let a = Marker::generate();
        let b = Marker::generate();
        assert_eq!(a.as_str().len(), 64);
        assert_ne!(a, b);
    }

    #[test]
    fn test_process_marker_is_stable() {
        assert_eq!(Marker::process(), Marker::process());
    }

    #[test]
    fn test_halves_rejoin() {
        let marker = Marker::from("abcdef");
        let (a, b) = marker.halves();
        assert_eq!((a, b), ("abc", "def"));
        assert_eq!(format!("{a}{b}"), marker.as_str());
    }
}
