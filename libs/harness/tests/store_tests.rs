use std::collections::BTreeMap;

use engine_client::{Credentials, Role};
use harness::{CredentialStore, HarnessError, ScenarioRecord};
use serde_json::{json, Value};

fn principal(n: u32) -> Credentials {
    Credentials::new(Role::Principal, format!("adm-{n}"), format!("secret-{n}"))
}

fn child(n: u32) -> Credentials {
    Credentials::new(Role::Child, format!("app-{n}"), format!("app-secret-{n}"))
}

#[test]
fn missing_file_is_created_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("creds.json");

    let store = CredentialStore::load(&path).unwrap();
    assert!(store.is_empty());
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{}\n");
}

#[test]
fn upsert_get_remove() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("creds.json");
    let mut store = CredentialStore::load(&path).unwrap();

    let record = ScenarioRecord::new(&principal(1)).with_child(&child(1));
    store.upsert(3, record).unwrap();

    let reloaded = CredentialStore::load(&path).unwrap();
    let got = reloaded.get(3).unwrap();
    assert_eq!(got.id, 3);
    assert_eq!(got.principal_credentials(), principal(1));
    assert_eq!(got.child_credentials(), Some(child(1)));
    assert!(reloaded.get(4).is_none());

    store.remove(3).unwrap();
    assert!(CredentialStore::load(&path).unwrap().is_empty());
}

#[test]
fn upsert_merges_into_existing_record() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = CredentialStore::load(dir.path().join("creds.json")).unwrap();

    let first = ScenarioRecord::new(&principal(1))
        .with_child(&child(1))
        .with_metadata(BTreeMap::from([
            ("blocks".to_string(), json!(10)),
            ("seed".to_string(), json!(1)),
        ]));
    store.upsert(1, first).unwrap();

    // no child fields: the stored child survives
    let update = ScenarioRecord::new(&principal(2))
        .with_metadata(BTreeMap::from([("seed".to_string(), json!(2))]));
    let merged = store.upsert(1, update).unwrap().clone();

    assert_eq!(merged.admin_key, "adm-2");
    assert_eq!(merged.child_key.as_deref(), Some("app-1"));
    assert_eq!(merged.metadata["blocks"], json!(10));
    assert_eq!(merged.metadata["seed"], json!(2));
}

#[test]
fn serialize_reload_serialize_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("creds.json");
    let mut store = CredentialStore::load(&path).unwrap();

    store
        .upsert(
            10,
            ScenarioRecord::new(&principal(10)).with_metadata(BTreeMap::from([
                ("topics".to_string(), json!(["a", "b"])),
                ("startTick".to_string(), json!(1_700_000_000)),
            ])),
        )
        .unwrap();
    store.upsert(2, ScenarioRecord::new(&principal(2)).with_child(&child(2))).unwrap();

    let first = std::fs::read_to_string(&path).unwrap();
    let reloaded = CredentialStore::load(&path).unwrap();
    assert_eq!(reloaded.to_json_string().unwrap(), first);

    // numeric id order, 4-space indent, camelCase fields
    let two = first.find("\"2\"").unwrap();
    let ten = first.find("\"10\"").unwrap();
    assert!(two < ten);
    assert!(first.contains("\n    \"2\": {\n        \"adminKey\": \"adm-2\""));
    assert!(first.ends_with("}\n"));
}

#[test]
fn legacy_keys_are_skipped_and_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("creds.json");
    std::fs::write(
        &path,
        r#"{
    "1": {"adminKey": "a", "adminSecret": "s", "metadata": {}},
    "__path": "/old/location/creds.json",
    "info": {}
}"#,
    )
    .unwrap();

    let mut store = CredentialStore::load(&path).unwrap();
    assert_eq!(store.ids().collect::<Vec<_>>(), vec![1]);

    store.remove(7).unwrap();
    let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(written.as_object().unwrap().keys().collect::<Vec<_>>(), vec!["1"]);
}

#[test]
fn legacy_field_names_load_and_are_rewritten() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("creds.json");
    std::fs::write(
        &path,
        r#"{
    "2": {"adm": "adm-1", "adm_secret": "s1", "app": "1001", "app_secret": "s2"},
    "3": {"adm": "adm-2", "adm_secret": "s3"},
    "__path": "/old/location/creds.json",
    "info": {"ok": true}
}"#,
    )
    .unwrap();

    let mut store = CredentialStore::load(&path).unwrap();
    let two = store.get(2).unwrap();
    assert_eq!(two.admin_key, "adm-1");
    assert_eq!(two.admin_secret, "s1");
    assert_eq!(two.child_credentials().unwrap().key, "1001");
    assert!(store.get(3).unwrap().child_credentials().is_none());

    store.remove(3).unwrap();
    let written: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(
        written,
        json!({"2": {"adminKey": "adm-1", "adminSecret": "s1", "childKey": "1001", "childSecret": "s2", "metadata": {}}})
    );
}

#[test]
fn malformed_content_is_a_configuration_error() {
    let dir = tempfile::tempdir().unwrap();

    let broken = dir.path().join("broken.json");
    std::fs::write(&broken, "{ not json").unwrap();
    assert!(matches!(
        CredentialStore::load(&broken),
        Err(HarnessError::Configuration(_))
    ));

    let bad_key = dir.path().join("bad_key.json");
    std::fs::write(&bad_key, r#"{"one": {"adminKey": "a", "adminSecret": "s"}}"#).unwrap();
    assert!(matches!(
        CredentialStore::load(&bad_key),
        Err(HarnessError::Configuration(_))
    ));

    let bad_record = dir.path().join("bad_record.json");
    std::fs::write(&bad_record, r#"{"1": {"adminKey": 5}}"#).unwrap();
    assert!(matches!(
        CredentialStore::load(&bad_record),
        Err(HarnessError::Configuration(_))
    ));
}
