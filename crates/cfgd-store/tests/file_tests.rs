use cfgd_problem::Severity;
use cfgd_store::{ConfigStore, RuleSet, StoreError};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

#[test]
fn test_missing_file_starts_empty_and_save_creates_it() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.yml");

    let store = ConfigStore::open(&path).unwrap();
    assert!(!store.is_dirty());
    store.set("security.authn.enabled", true).unwrap();
    store.save().unwrap();

    assert!(path.exists());
    assert!(!store.is_dirty());

    let reopened = ConfigStore::open(&path).unwrap();
    assert_eq!(
        reopened.get_as::<bool>("security.authn.enabled").unwrap(),
        Some(true)
    );
}

#[test]
fn test_undo_after_save_keeps_saved_state() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yml");
    std::fs::write(&path, "security:\n  enabled: false\n").unwrap();

    let store = ConfigStore::open(&path).unwrap();
    store.set("security.enabled", true).unwrap();
    store.save().unwrap();

    store.set("security.enabled", false).unwrap();
    store.undo_changes();

    assert_eq!(store.get_as::<bool>("security.enabled").unwrap(), Some(true));
    let on_disk = std::fs::read_to_string(&path).unwrap();
    assert!(on_disk.contains("enabled: true"));
}

#[test]
fn test_failed_save_keeps_committed_copy() {
    let dir = tempfile::tempdir().unwrap();
    // A directory at the target path makes the final rename fail.
    let path = dir.path().join("config.yml");
    std::fs::create_dir(&path).unwrap();

    let store = ConfigStore::from_yaml(&path, "a: 1\n").unwrap();
    store.set("a", 2).unwrap();

    assert!(matches!(store.save(), Err(StoreError::Io { .. })));
    assert!(store.is_dirty());

    store.undo_changes();
    assert_eq!(store.get_as::<u32>("a").unwrap(), Some(1));
}

#[test]
fn test_invalid_yaml_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yml");
    std::fs::write(&path, "a: [unclosed\n").unwrap();

    assert!(matches!(ConfigStore::open(&path), Err(StoreError::Yaml(_))));
}

#[test]
fn test_validate_sees_working_copy() {
    let store = ConfigStore::from_yaml("c.yml", "ldap:\n  enabled: false\n").unwrap();
    let rules = RuleSet::new()
        .boolean("ldap.enabled")
        .require_when("ldap.enabled", "ldap.url");

    assert!(store.validate(&rules).is_empty());

    store.set("ldap.enabled", true).unwrap();
    let problems = store.validate(&rules);
    assert_eq!(problems.len(), 1);
    assert_eq!(problems.max_severity(), Some(Severity::Error));

    store.undo_changes();
    assert!(store.validate(&rules).is_empty());
}

proptest! {
    #[test]
    fn prop_undo_restores_any_edit(
        key in "[a-z]{1,8}(\\.[a-z]{1,8}){0,3}",
        value in any::<i64>(),
    ) {
        let store = ConfigStore::from_yaml("p.yml", "base:\n  keep: true\n").unwrap();
        let before = store.document();

        // Fails only when an ancestor of `key` is the boolean at base.keep.
        if store.set(&key, value).is_ok() {
            prop_assert_eq!(store.get_as::<i64>(&key).unwrap(), Some(value));
        }
        store.undo_changes();

        prop_assert_eq!(store.document(), before);
        prop_assert!(!store.is_dirty());
    }
}
