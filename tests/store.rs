use std::fs;

use camino::Utf8PathBuf;
use tempfile::tempdir;

use kira_taxonomy::domain::{Rank, Taxon};
use kira_taxonomy::store::TaxonomyFile;
use kira_taxonomy::taxonomy::Taxonomy;

fn utf8(path: std::path::PathBuf) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(path).unwrap()
}

fn sample() -> Taxonomy {
    let mut tax = Taxonomy::new();
    tax.insert(Taxon {
        name: "Felis".to_string(),
        author: "Linnaeus, 1758".to_string(),
        id: 2435022,
        rank: Rank::Genus,
        status: "accepted".to_string(),
        parent: None,
    });
    tax.insert(Taxon {
        name: "Felis catus".to_string(),
        author: "Linnaeus, 1758".to_string(),
        id: 2435035,
        rank: Rank::Species,
        status: "accepted".to_string(),
        parent: Some(2435022),
    });
    tax
}

#[test]
fn save_then_load_round_trips() {
    let dir = tempdir().unwrap();
    let file = TaxonomyFile::new(utf8(dir.path().join("nested/felis.tsv")));
    assert!(!file.exists());

    file.save(&sample()).unwrap();
    assert!(file.exists());

    let loaded = file.load().unwrap();
    assert_eq!(loaded.ids(), vec![2435022, 2435035]);
    assert_eq!(loaded.parents(2435035), vec![2435022]);
    assert_eq!(loaded.taxon(2435035), sample().taxon(2435035));
}

#[test]
fn save_replaces_previous_table() {
    let dir = tempdir().unwrap();
    let file = TaxonomyFile::new(utf8(dir.path().join("felis.tsv")));
    fs::write(file.path(), "stale content\n").unwrap();

    let mut tax = sample();
    file.save(&tax).unwrap();
    tax.del(2435035);
    file.save(&tax).unwrap();

    assert_eq!(file.load().unwrap().ids(), vec![2435022]);
    let leftovers = fs::read_dir(dir.path()).unwrap().count();
    assert_eq!(leftovers, 1);
}

#[test]
fn missing_table_loads_as_empty() {
    let dir = tempdir().unwrap();
    let file = TaxonomyFile::new(utf8(dir.path().join("absent.tsv")));
    assert!(file.load_or_default().unwrap().is_empty());
    assert!(file.load().is_err());
}
