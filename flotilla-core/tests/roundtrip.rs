//! Round-trip properties: registry -> document -> disk -> document -> registry.

mod common;

use flotilla_core::{store, ClusterId, PersistedDocument};
use rstest::rstest;
use tempfile::TempDir;

use common::{model, registry};

#[test]
fn registry_seeded_from_models_serializes_back_to_them() {
    let models = vec![model("z"), model("a"), model("m")];
    let mut reg = registry();
    reg.reload(models.clone());

    let doc = reg.serialize();
    assert_eq!(doc.clusters, models);
}

#[test]
fn document_survives_disk_roundtrip_and_reseed() {
    let home = TempDir::new().expect("home");
    let models = vec![model("alpha"), model("beta")];

    let mut reg = registry();
    reg.reload(models.clone());
    store::save_at(home.path(), &reg.serialize()).expect("save");

    let loaded = store::load_at(home.path()).expect("load");
    assert_eq!(loaded.clusters, models);

    let mut second = registry();
    second.reload(loaded.clusters);
    assert_eq!(second.serialize().clusters, models);
}

#[rstest]
#[case::empty(&[])]
#[case::single(&["only"])]
#[case::dotted(&["prod.eu.main", "staging.us"])]
#[case::many(&["a", "b", "c", "d", "e"])]
fn disk_roundtrip_preserves_arbitrary_id_sets(#[case] ids: &[&str]) {
    let home = TempDir::new().expect("home");
    let doc = PersistedDocument {
        version: 3,
        clusters: ids.iter().map(|id| model(id)).collect(),
    };

    store::save_at(home.path(), &doc).expect("save");
    let loaded = store::load_at(home.path()).expect("load");

    let loaded_ids: Vec<ClusterId> = loaded.clusters.iter().map(|m| m.id.clone()).collect();
    let expected: Vec<ClusterId> = ids.iter().map(|id| ClusterId::from(*id)).collect();
    assert_eq!(loaded_ids, expected);
}
