//! ID generation utilities.

use ulid::Ulid;
use uuid::Uuid;

/// Prefix carried by client-side placeholder ids of pending rows.
pub const TEMP_ID_PREFIX: &str = "tmp_";

/// ID generator for entities.
#[derive(Debug, Clone, Default)]
pub struct IdGenerator {
    _private: (),
}

impl IdGenerator {
    /// Create a new ID generator.
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Generate a new ULID-based ID.
    ///
    /// ULIDs sort lexicographically by creation time, which keeps
    /// descending-id and descending-time orderings in agreement.
    #[must_use]
    pub fn generate(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// Generate a placeholder id for a row that has not reached the store yet.
    #[must_use]
    pub fn generate_temp(&self) -> String {
        format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4().simple())
    }

    /// Whether `id` was produced by [`IdGenerator::generate_temp`].
    #[must_use]
    pub fn is_temp(id: &str) -> bool {
        id.starts_with(TEMP_ID_PREFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ulid() {
        let id_gen = IdGenerator::new();
        let id1 = id_gen.generate();
        let id2 = id_gen.generate();

        assert_eq!(id1.len(), 26);
        assert_eq!(id2.len(), 26);
        assert_ne!(id1, id2);
        assert!(!IdGenerator::is_temp(&id1));
    }

    #[test]
    fn test_generate_temp() {
        let id_gen = IdGenerator::new();
        let id = id_gen.generate_temp();

        assert_eq!(id.len(), TEMP_ID_PREFIX.len() + 32);
        assert!(IdGenerator::is_temp(&id));
    }
}
