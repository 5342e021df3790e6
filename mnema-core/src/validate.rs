//! Ingress validators for memory writes
//!
//! Invariants are enforced once here, at the API/engine boundary, and
//! trusted by everything below.

use crate::{ValidationError, Timestamp};

/// Maximum memory key length in bytes.
pub const MAX_KEY_BYTES: usize = 256;

/// Maximum memory value length in bytes (1 MiB).
pub const MAX_VALUE_BYTES: usize = 1024 * 1024;

/// Maximum agent name length in bytes.
pub const MAX_AGENT_NAME_BYTES: usize = 128;

/// Maximum length of a single tag.
pub const MAX_TAG_CHARS: usize = 64;

/// Maximum number of tags on one memory.
pub const MAX_TAGS: usize = 32;

/// Validate a memory key.
pub fn validate_key(key: &str) -> Result<(), ValidationError> {
    if key.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "key".to_string(),
        });
    }
    if key.len() > MAX_KEY_BYTES {
        return Err(ValidationError::TooLarge {
            field: "key".to_string(),
            limit: MAX_KEY_BYTES,
        });
    }
    Ok(())
}

/// Validate a memory value payload.
pub fn validate_value(value: &str) -> Result<(), ValidationError> {
    if value.len() > MAX_VALUE_BYTES {
        return Err(ValidationError::TooLarge {
            field: "value".to_string(),
            limit: MAX_VALUE_BYTES,
        });
    }
    Ok(())
}

/// Validate an agent name.
pub fn validate_agent_name(agent_name: &str) -> Result<(), ValidationError> {
    if agent_name.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: "agent_name".to_string(),
        });
    }
    if agent_name.len() > MAX_AGENT_NAME_BYTES {
        return Err(ValidationError::TooLarge {
            field: "agent_name".to_string(),
            limit: MAX_AGENT_NAME_BYTES,
        });
    }
    Ok(())
}

/// Clamp importance into [0, 1]. NaN collapses to the 0.5 default.
pub fn clamp_importance(importance: f64) -> f64 {
    if importance.is_nan() {
        return 0.5;
    }
    importance.clamp(0.0, 1.0)
}

/// Normalize tags: trim, lowercase, drop empties, deduplicate preserving
/// first-seen order.
pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>, ValidationError> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for raw in tags {
        let tag = raw.trim().to_lowercase();
        if tag.is_empty() {
            continue;
        }
        if tag.chars().count() > MAX_TAG_CHARS {
            return Err(ValidationError::InvalidValue {
                field: "tags".to_string(),
                reason: format!("tag '{}' exceeds {} characters", tag, MAX_TAG_CHARS),
            });
        }
        if !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    if normalized.len() > MAX_TAGS {
        return Err(ValidationError::InvalidValue {
            field: "tags".to_string(),
            reason: format!("at most {} tags allowed", MAX_TAGS),
        });
    }
    Ok(normalized)
}

/// Monotonic updated_at: never lets a new stamp move backwards relative to
/// creation.
pub fn stamp_updated_at(created_at: Timestamp, now: Timestamp) -> Timestamp {
    if now < created_at {
        created_at
    } else {
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use proptest::prelude::*;

    #[test]
    fn test_key_limits() {
        assert!(validate_key("pref_lang").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("   ").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_BYTES + 1)).is_err());
    }

    #[test]
    fn test_tag_normalization() {
        let tags = vec![
            "  Rust ".to_string(),
            "BACKEND".to_string(),
            "rust".to_string(),
            "".to_string(),
        ];
        let normalized = normalize_tags(&tags).expect("valid tags");
        assert_eq!(normalized, vec!["rust".to_string(), "backend".to_string()]);
    }

    #[test]
    fn test_too_many_tags_rejected() {
        let tags: Vec<String> = (0..MAX_TAGS + 1).map(|i| format!("tag{}", i)).collect();
        assert!(normalize_tags(&tags).is_err());
    }

    #[test]
    fn test_updated_at_never_precedes_created_at() {
        let created = Utc::now();
        let earlier = created - Duration::seconds(5);
        assert_eq!(stamp_updated_at(created, earlier), created);
        let later = created + Duration::seconds(5);
        assert_eq!(stamp_updated_at(created, later), later);
    }

    proptest! {
        #[test]
        fn prop_importance_always_in_unit_interval(raw in proptest::num::f64::ANY) {
            let clamped = clamp_importance(raw);
            prop_assert!((0.0..=1.0).contains(&clamped));
        }

        #[test]
        fn prop_normalized_tags_are_idempotent(
            tags in proptest::collection::vec("[A-Za-z0-9 _-]{0,20}", 0..16)
        ) {
            let once = normalize_tags(&tags).expect("within limits");
            let twice = normalize_tags(&once).expect("within limits");
            prop_assert_eq!(once, twice);
        }
    }
}
