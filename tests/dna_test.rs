use numus::dna::{load_tracks, DocumentError};
use pretty_assertions::assert_eq;
use std::fs;
use tempdir::TempDir;

#[test]
fn test_album_with_inline_and_file_tracks() {
    let dir = TempDir::new("numus-album").unwrap();
    fs::create_dir(dir.path().join("tracks")).unwrap();
    fs::write(
        dir.path().join("tracks/second.json"),
        r#"{"track_id": "second", "bpm": 140, "chapters": {"c": {"sections": {"s": {"duration": 30}}}}}"#,
    )
    .unwrap();
    let album = dir.path().join("album.json");
    fs::write(
        &album,
        r#"{"tracks": [
            {"track_id": "first", "chapters": {"c": {"sections": {"a": {}, "b": {"duration": 20}}}}},
            {"file": "tracks/second.json"}
        ]}"#,
    )
    .unwrap();

    let tracks = load_tracks(&album).unwrap();
    let ids: Vec<_> = tracks.iter().map(|t| t.track_id.as_str()).collect();
    assert_eq!(ids, vec!["first", "second"]);
    assert_eq!(tracks[0].total_time(), 80.0);
    assert_eq!(tracks[1].bpm, 140.0);
}

#[test]
fn test_single_track_file() {
    let dir = TempDir::new("numus-album").unwrap();
    let path = dir.path().join("track.json");
    fs::write(&path, r#"{"chapters": {}}"#).unwrap();

    let tracks = load_tracks(&path).unwrap();
    assert_eq!(tracks.len(), 1);
    assert_eq!(tracks[0].track_id, "unknown_track");
    assert!(tracks[0].sections.is_empty());
}

#[test]
fn test_missing_track_file() {
    let dir = TempDir::new("numus-album").unwrap();
    let album = dir.path().join("album.json");
    fs::write(&album, r#"{"tracks": [{"file": "gone.json"}]}"#).unwrap();

    match load_tracks(&album) {
        Err(DocumentError::NotFound(path)) => assert_eq!(path, dir.path().join("gone.json")),
        other => panic!("unexpected result: {:?}", other),
    }
}
