use numus::library::{Category, IssueKind, Library, LibraryError, SearchQuery, SubType};
use pretty_assertions::assert_eq;
use std::fs;
use tempdir::TempDir;

fn write(dir: &TempDir, name: &str, contents: &str) {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

fn segment_dir() -> TempDir {
    let dir = TempDir::new("numus-segments").unwrap();
    write(
        &dir,
        "rhythm/kick_four.json",
        r#"{
            "segment_id": "kick_four",
            "name": "Four on the floor",
            "sub_type": "kick_pattern",
            "musical_params": {"duration_bars": 4, "pattern": "x...x...x...x...", "sample": "kick_909"},
            "metadata": {"energy_level": 0.8, "tags": ["kick", "foundation"], "suitable_sections": ["drop"]}
        }"#,
    );
    write(
        &dir,
        "harmony/pads.json",
        r#"{"segments": [
            {
                "id": "pad_dawn",
                "sub_type": "pad",
                "playback_params": {"duration_bars": 8, "synth": "hollow"},
                "metadata": {"energy_level": 0.2, "mood_tags": ["warm"], "suitable_sections": ["intro"]}
            },
            {
                "id": "pad_dusk",
                "sub_type": "pad",
                "playback_params": {"synth": "hollow"},
                "metadata": {"tags": ["warm", "dark"]}
            },
            {"id": "broken", "sub_type": "not_a_sub_type"}
        ]}"#,
    );
    write(&dir, "fx/riser.json", "{ not json");
    write(&dir, "README.md", "segments live here");
    dir
}

#[test]
fn test_load_dir() {
    let dir = segment_dir();
    let library = Library::load_dir(dir.path()).unwrap();

    let ids: Vec<_> = library.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["kick_four", "pad_dawn", "pad_dusk"]);

    let kick = library.get("kick_four").unwrap();
    assert_eq!(kick.category(), Category::Rhythm);
    assert_eq!(kick.duration_bars(), Some(4.0));
    assert_eq!(kick.source_file.as_deref(), Some(dir.path().join("rhythm/kick_four.json").as_path()));
}

#[test]
fn test_load_missing_dir() {
    let dir = TempDir::new("numus-segments").unwrap();
    let missing = dir.path().join("nowhere");
    assert!(matches!(Library::load_dir(&missing), Err(LibraryError::NotFound(_))));
}

#[test]
fn test_search_loaded_segments() {
    let library = Library::load_dir(segment_dir().path()).unwrap();

    let warm = SearchQuery::default().tags(&["warm"], false);
    let ids: Vec<_> = library.search(&warm).into_iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["pad_dawn", "pad_dusk"]);

    let quiet_pads = SearchQuery::default().sub_type(SubType::Pad).energy(None, Some(0.3));
    let ids: Vec<_> = library.search(&quiet_pads).into_iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["pad_dawn"]);

    let drops = SearchQuery::default().section_type("drop");
    assert_eq!(library.search(&drops).len(), 1);
}

#[test]
fn test_validate_then_enrich() {
    let mut library = Library::load_dir(segment_dir().path()).unwrap();

    let dusk_issues: Vec<_> = library
        .validate()
        .into_iter()
        .filter(|issue| issue.segment_id == "pad_dusk")
        .map(|issue| issue.kind)
        .collect();
    assert_eq!(dusk_issues, vec![IssueKind::MissingDuration, IssueKind::NoSuitableSections]);

    assert!(library.enrich() > 0);
    let dusk = library.get("pad_dusk").unwrap();
    assert!(!dusk.metadata.suitable_sections.is_empty());
    assert!(dusk.metadata.energy_level.is_some());
    // enrichment never overwrites what was already there
    assert_eq!(library.get("kick_four").unwrap().energy(), 0.8);
    assert_eq!(library.stats().total, 3);
}
