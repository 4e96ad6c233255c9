//! Property tests for constant-pool patching.

mod common;

use class_patcher::constant_pool::{entries, patch_utf8_constant, patch_utf8_constant_with};
use class_patcher::{ClassFile, MatchMode, Patched};
use common::hello_world;
use proptest::prelude::*;

/// Targets start with a prefix no other constant in the fixture has.
fn target() -> impl Strategy<Value = String> {
    "zq[a-z ]{0,24}"
}

/// Replacements are tagged the same way and may hold any printable text.
fn replacement() -> impl Strategy<Value = String> {
    "R:\\PC{0,30}"
}

proptest! {
    #[test]
    fn length_changes_by_content_delta(target in target(), replacement in replacement()) {
        let input = hello_world(&target);
        let patched = patch_utf8_constant(input.clone(), &target, &replacement).unwrap();
        prop_assert!(patched.is_replaced());
        prop_assert_eq!(
            patched.bytes().len(),
            input.len() - target.len() + replacement.len()
        );
    }

    #[test]
    fn bytes_outside_the_entry_are_untouched(target in target(), replacement in replacement()) {
        let input = hello_world(&target);
        let Patched::Replaced { bytes, offset, .. } =
            patch_utf8_constant(input.clone(), &target, &replacement).unwrap()
        else {
            return Err(TestCaseError::fail("target not replaced"));
        };

        prop_assert_eq!(&bytes[..offset + 1], &input[..offset + 1]);
        let old_end = offset + 3 + target.len();
        let new_end = offset + 3 + replacement.len();
        prop_assert_eq!(&bytes[new_end..], &input[old_end..]);
        prop_assert_eq!(
            &bytes[offset + 1..offset + 3],
            &(replacement.len() as u16).to_be_bytes()[..]
        );
    }

    #[test]
    fn patched_class_stays_well_formed(target in target(), replacement in replacement()) {
        let patched = patch_utf8_constant(hello_world(&target), &target, &replacement)
            .unwrap()
            .into_bytes();

        let class = ClassFile::parse(&patched).unwrap();
        prop_assert_eq!(class.this_class.as_str(), "Hello");

        let texts: Vec<String> = entries(&patched)
            .unwrap()
            .iter()
            .filter_map(|e| e.utf8().and_then(Result::ok).map(str::to_string))
            .collect();
        prop_assert!(texts.contains(&replacement));
        prop_assert!(!texts.contains(&target));
    }

    #[test]
    fn patching_back_restores_input(target in target(), replacement in replacement()) {
        let input = hello_world(&target);
        let patched = patch_utf8_constant_with(input.clone(), &target, &replacement, MatchMode::Exact)
            .unwrap()
            .into_bytes();
        let restored = patch_utf8_constant_with(patched, &replacement, &target, MatchMode::Exact)
            .unwrap();
        prop_assert!(restored.is_replaced());
        prop_assert_eq!(restored.into_bytes(), input);
    }

    #[test]
    fn absent_target_returns_input(target in target(), missing in "absent-[0-9]{1,5}") {
        let input = hello_world(&target);
        let result = patch_utf8_constant(input.clone(), &missing, "x").unwrap();
        prop_assert_eq!(result, Patched::Unchanged(input));
    }

    #[test]
    fn case_is_ignored_by_default(target in target()) {
        let upper = target.to_uppercase();
        let patched = patch_utf8_constant(hello_world(&target), &upper, "R:x").unwrap();
        prop_assert!(patched.is_replaced());

        let exact = patch_utf8_constant_with(hello_world(&target), &upper, "R:x", MatchMode::Exact)
            .unwrap();
        prop_assert!(!exact.is_replaced());
    }
}
