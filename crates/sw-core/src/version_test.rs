use super::*;
use std::collections::{BTreeSet, HashSet};

fn v(raw: &str) -> MigrationVersion {
    MigrationVersion::parse(raw).unwrap()
}

#[test]
fn test_parse_simple_version() {
    let version = v("1.2");
    assert_eq!(version.kind(), VersionKind::Version);
    assert_eq!(version.segments(), &[1, 2]);
    assert_eq!(version.comment(), "");
    assert_eq!(version.normalised(), "1.2");
}

#[test]
fn test_parse_strips_prefix_comment_and_suffix() {
    let version = v("V1_3__add_users.sql");
    assert_eq!(version.segments(), &[1, 3]);
    assert_eq!(version.comment(), "add_users");
    assert_eq!(version.normalised(), "1.3");
    assert_eq!(version.key(), "1.3");
    assert_eq!(version.raw(), "V1_3__add_users.sql");
}

#[test]
fn test_parse_lowercase_prefix() {
    assert_eq!(v("v2.0__x").segments(), &[2, 0]);
}

#[test]
fn test_parse_dash_delimiter() {
    assert_eq!(v("1-2-3").segments(), &[1, 2, 3]);
}

#[test]
fn test_parse_stops_at_qualifier() {
    let version = v("1.4-SNAPSHOT");
    assert_eq!(version.segments(), &[1, 4]);
    assert_eq!(version.normalised(), "1.4");
}

#[test]
fn test_parse_junk_suffix_matches_comment_form() {
    assert_eq!(v("1.1.1_2__Foo"), v("1.1.1.2_junk"));
    assert_eq!(v("1.1.1_2__Foo").key(), v("1.1.1.2_junk").key());
}

#[test]
fn test_parse_repeatable() {
    let version = v("R__Refresh_Views");
    assert_eq!(version.kind(), VersionKind::Repeatable);
    assert!(version.is_repeatable());
    assert!(version.is_repeatable_last());
    assert!(!version.is_repeatable_init());
    assert_eq!(version.comment(), "Refresh_Views");
    assert_eq!(version.key(), "refresh_views");
    assert_eq!(version.normalised(), "R");
}

#[test]
fn test_parse_repeatable_init() {
    let version = v("I__grants");
    assert_eq!(version.kind(), VersionKind::Init);
    assert!(version.is_repeatable());
    assert!(version.is_repeatable_init());
    assert_eq!(version.key(), "grants");
}

#[test]
fn test_parse_lowercase_repeatable() {
    assert_eq!(v("r__foo").kind(), VersionKind::Repeatable);
    assert_eq!(v("i__foo").kind(), VersionKind::Init);
}

#[test]
fn test_parse_non_numeric_yields_empty_version() {
    let version = v("Vfoo__bar");
    assert_eq!(version.kind(), VersionKind::Version);
    assert!(version.segments().is_empty());
    assert_eq!(version.key(), "");
    assert_eq!(version.comment(), "bar");
    assert!(version < v("0"));
    assert!(version > v("I__grants"));

    assert!(v("").segments().is_empty());
    assert_eq!(v("abc__thing"), v("xyz__other"));
}

#[test]
fn test_order_numeric_not_lexical() {
    assert!(v("1.2") < v("1.10"));
    assert!(v("2") > v("1.99"));
    assert!(v("1.0") < v("1.0.1"));
}

#[test]
fn test_order_repeatables_after_versions_init_first() {
    assert!(v("R__Foo") > v("R__Bar"));
    assert!(v("R__Bar") > v("I__Goo"));
    assert!(v("R__Bar") > v("999.9"));
    assert!(v("I__Goo") < v("0.1"));
    assert!(v("R__") < v("R__a"));
}

#[test]
fn test_order_is_total_and_sortable() {
    let mut versions = vec![
        v("R__b"),
        v("1.10"),
        v("I__a"),
        v("1.2"),
        v("R__a"),
        v("1.2.1"),
    ];
    versions.sort();
    let raws: Vec<&str> = versions.iter().map(|x| x.raw()).collect();
    assert_eq!(raws, vec!["I__a", "1.2", "1.2.1", "1.10", "R__a", "R__b"]);
}

#[test]
fn test_usable_as_map_key() {
    let mut set = HashSet::new();
    set.insert(v("1.1.1_2__Foo"));
    assert!(set.contains(&v("1.1.1.2")));

    let tree: BTreeSet<_> = [v("1.0"), v("V1_0__again")].into_iter().collect();
    assert_eq!(tree.len(), 1);
}

#[test]
fn test_next_version_preserves_delimiters() {
    assert_eq!(v("1.2").next_version().raw(), "1.3");
    assert_eq!(v("1_2-9").next_version().raw(), "1_2-10");
    assert_eq!(v("1_2-9").next_version().normalised(), "1.2.10");
    assert!(v("1_2-9").next_version() > v("1_2-9"));
}

#[test]
fn test_next_version_of_repeatable_is_identity() {
    assert_eq!(v("R__x").next_version(), v("R__x"));
}

#[test]
fn test_boot_init_shares_segments() {
    let boot = v("1.5__baseline").as_boot_init();
    assert!(boot.is_boot_init());
    assert_eq!(boot.key(), "1.5");
    assert!(boot > v("1.4"));
    assert!(boot < v("1.6"));
}

#[test]
fn test_from_history_round_trip_keys() {
    let repeatable = MigrationVersion::from_history(VersionKind::Repeatable, "R", "My_View").unwrap();
    assert_eq!(repeatable.key(), "my_view");

    let boot = MigrationVersion::from_history(VersionKind::BootInit, "2.1", "base").unwrap();
    assert!(boot.is_boot_init());
    assert_eq!(boot.key(), "2.1");
}

#[test]
fn test_kind_codes() {
    for kind in [
        VersionKind::Version,
        VersionKind::Repeatable,
        VersionKind::Init,
        VersionKind::BootInit,
    ] {
        assert_eq!(VersionKind::from_code(&kind.code().to_string()), Some(kind));
    }
    assert_eq!(VersionKind::from_code("X"), None);
}
