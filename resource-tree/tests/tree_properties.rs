//! Property tests for resource naming and wire serialization

use proptest::prelude::*;
use resource_tree::{Resource, ResourceError};
use rstest::rstest;

fn segment() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_]{0,8}"
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Canonical names are the dot-joined path from the root
    #[test]
    fn prop_canonical_name_is_joined_path(path in prop::collection::vec(segment(), 1..6)) {
        let root = Resource::root();
        let mut node = root.clone();
        for name in &path {
            node = node.child_or_insert(name).unwrap();
        }

        let expected = path.join(".");
        prop_assert_eq!(node.canonical_name(), expected.as_str());
        let resolved = root.resolve(&expected).unwrap();
        prop_assert_eq!(resolved.canonical_name(), expected.as_str());
    }

    /// Siblings never share a name, whatever order names are added in
    #[test]
    fn prop_sibling_names_unique(names in prop::collection::vec(segment(), 1..20)) {
        let root = Resource::root();
        for name in &names {
            match root.add_child(name, ()) {
                Ok(_) => {}
                Err(ResourceError::DuplicateChild { .. }) => {}
                Err(other) => prop_assert!(false, "unexpected error {:?}", other),
            }
        }

        let mut seen: Vec<String> = root.children().iter().map(|c| c.name().to_string()).collect();
        let total = seen.len();
        seen.sort();
        seen.dedup();
        prop_assert_eq!(seen.len(), total);
    }

    /// Applying a flat object of text values and reading it back is lossless
    #[test]
    fn prop_apply_wire_then_to_wire(values in prop::collection::btree_map(segment(), "[a-z0-9]{1,10}", 1..8)) {
        let root = Resource::root();
        let info = root.add_child("deviceInfo", ()).unwrap();
        info.add_child("placeholder", ()).unwrap();

        let json = serde_json::to_value(&values).unwrap();
        info.apply_wire(&json, false).unwrap();

        let wire = info.to_wire();
        for (key, value) in &values {
            prop_assert_eq!(wire[key].as_str(), Some(value.as_str()));
        }
    }
}

#[rstest]
#[case("")]
#[case("a.b")]
#[case(".")]
fn test_invalid_names(#[case] name: &str) {
    let root = Resource::root();
    assert!(matches!(
        root.add_child(name, ()),
        Err(ResourceError::InvalidName(_))
    ));
}
