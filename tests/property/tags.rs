//! Property-based tests for task input normalization.
//!
//! Uses proptest to verify:
//! 1. Normalized tags are trimmed, lowercase, non-empty, unique and capped.
//! 2. Normalization is idempotent.
//! 3. Title validation accepts exactly the trimmed titles within the limit.

use proptest::prelude::*;
use taskboard_proto::task::{MAX_TAGS, ValidationError, normalize_tags, validate_title};

proptest! {
    #[test]
    fn normalized_tags_are_clean(tags in prop::collection::vec("[ a-zA-Z]{0,6}", 0..20)) {
        let out = normalize_tags(&tags);
        prop_assert!(out.len() <= MAX_TAGS);
        for (i, tag) in out.iter().enumerate() {
            prop_assert!(!tag.is_empty());
            prop_assert_eq!(tag.trim(), tag.as_str());
            prop_assert_eq!(tag.to_lowercase(), tag.clone());
            prop_assert!(!out[..i].contains(tag));
        }
    }

    #[test]
    fn normalization_is_idempotent(tags in prop::collection::vec("[ a-zA-Z]{0,6}", 0..20)) {
        let once = normalize_tags(&tags);
        prop_assert_eq!(normalize_tags(&once), once);
    }

    #[test]
    fn first_occurrence_order_is_kept(tags in prop::collection::vec("[a-c]{1,2}", 0..8)) {
        let out = normalize_tags(&tags);
        let mut expected: Vec<String> = Vec::new();
        for tag in &tags {
            if !expected.contains(tag) {
                expected.push(tag.clone());
            }
        }
        expected.truncate(MAX_TAGS);
        prop_assert_eq!(out, expected);
    }

    #[test]
    fn title_validation_matches_trimmed_length(
        title in "[ a-z]{0,40}",
        max in 1usize..30,
    ) {
        let trimmed = title.trim();
        match validate_title(&title, max) {
            Ok(clean) => {
                prop_assert_eq!(clean.as_str(), trimmed);
                prop_assert!(!trimmed.is_empty() && trimmed.chars().count() <= max);
            }
            Err(ValidationError::TitleEmpty) => prop_assert!(trimmed.is_empty()),
            Err(ValidationError::TitleTooLong { max: reported }) => {
                prop_assert_eq!(reported, max);
                prop_assert!(trimmed.chars().count() > max);
            }
            Err(other) => prop_assert!(false, "unexpected error {other:?}"),
        }
    }
}
