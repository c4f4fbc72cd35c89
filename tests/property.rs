// ============================================================================
// tests/property.rs — proptest-based invariants
// ============================================================================
//
// A handful of the round-trip and monotonicity properties implied by the
// value/key/target-set/override model, checked against randomly generated
// inputs rather than fixed examples.
// ============================================================================

use proptest::prelude::*;

use kiln::target::{DeclLevel, Extension, TargetKey};
use kiln::value::{Name, Value, ValueTypeId};
use kiln::{context::Context, keys};

fn name_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_]{0,12}"
}

fn ext_strategy() -> impl Strategy<Value = Extension> {
    prop_oneof![
        Just(Extension::Unspecified),
        Just(Extension::None),
        // A non-empty extension: an empty string is indistinguishable from
        // `None` in the wire form and isn't a meaningful extension anyway.
        name_strategy()
            .prop_filter("non-empty", |s| !s.is_empty())
            .prop_map(Extension::Some),
    ]
}

proptest! {
    /// `format_name_ext` / `parse_name_ext` round-trip for any name built
    /// from plain characters (dots are exercised separately by the fixed
    /// escaping-grammar unit tests in `keys.rs`) and any extension kind.
    #[test]
    fn name_ext_round_trips(name in name_strategy(), ext in ext_strategy()) {
        let raw = keys::format_name_ext(&name, &ext);
        let (parsed_name, parsed_ext) = keys::parse_name_ext(&raw);
        prop_assert_eq!(parsed_name, name);
        prop_assert_eq!(parsed_ext, ext);
    }

    /// A target key built from a type/out_dir/name/extension round-trips
    /// through its string form regardless of which fields are populated.
    #[test]
    fn target_key_round_trips(
        type_name in "[a-z]{1,8}",
        out_dir in prop_oneof![Just(String::new()), "[a-z][a-z0-9]{0,4}(/[a-z][a-z0-9]{0,4}){0,2}"],
        name in name_strategy().prop_filter("non-empty", |s| !s.is_empty()),
        ext in ext_strategy(),
    ) {
        // `out_dir` avoids leading/trailing/consecutive slashes: those are
        // valid `PathBuf`s but don't round-trip through the single-slash
        // `dir/type{...}` grammar `format_key`/`parse_key` use. `name` is
        // non-empty since an empty name with no extension formats as `{}`,
        // which `parse_key` correctly rejects as a key with no name.
        let key = TargetKey::new(type_name, out_dir, name).with_ext(ext);
        let s = keys::format_key(&key);
        let parsed = keys::parse_key(&s).unwrap();
        prop_assert_eq!(parsed, key);
    }

    /// Inserting the same (type, out_dir, name) key twice always returns
    /// the identical `Arc<Target>`, regardless of declaration level.
    #[test]
    fn target_set_dedup_is_pointer_stable(
        type_name in "[a-z]{1,8}",
        out_dir in "[a-z/]{1,12}",
        name in name_strategy().prop_filter("non-empty", |s| !s.is_empty()),
    ) {
        let ctx = Context::new_for_test();
        let key = TargetKey::new(type_name, out_dir, name);
        let a = ctx.targets.insert(key.clone(), DeclLevel::PrerequisiteOnly).unwrap();
        let b = ctx.targets.insert(key, DeclLevel::Real).unwrap();
        prop_assert!(std::sync::Arc::ptr_eq(&a, &b));
        prop_assert_eq!(b.decl_level(), DeclLevel::Real);
    }

    /// A scalar string value's name-sequence round-trips through
    /// `extract_names` regardless of how many tokens it has.
    #[test]
    fn scalar_value_round_trips(tokens in proptest::collection::vec(name_strategy().prop_filter("non-empty", |s| !s.is_empty()), 0..5)) {
        let names: Vec<Name> = tokens.iter().map(Name::new).collect();
        let mut value = Value::untyped(names.clone());
        value.assign(names.clone(), Some(ValueTypeId::Strings)).unwrap();
        prop_assert_eq!(value.extract_names(), names);
    }
}
