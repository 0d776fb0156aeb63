use numus::render::{load_triggers, OrnamentKind, RenderError, RenderOptions, Renderer, Trigger};
use pretty_assertions::assert_eq;
use std::{fs, path::PathBuf, time::Duration};
use tempdir::TempDir;

fn trigger(kind: OrnamentKind, bar: u32) -> Trigger {
    Trigger {
        track: "dawn".into(),
        chapter: "ch1".into(),
        kind,
        intensity: 0.5,
        bar,
        beat: None,
    }
}

#[test]
fn test_load_triggers() {
    let dir = TempDir::new("numus-render").unwrap();
    let list = dir.path().join("list.json");
    fs::write(
        &list,
        r#"[{"track": "dawn", "chapter": "ch1", "type": "pad", "intensity": 0.5, "bar": 3, "beat": 2.5}]"#,
    )
    .unwrap();
    let wrapped = dir.path().join("wrapped.json");
    fs::write(
        &wrapped,
        r#"{"triggers": [{"track": "dawn", "chapter": "ch1", "type": "bell", "intensity": 1, "bar": 7}]}"#,
    )
    .unwrap();

    let triggers = load_triggers(&list).unwrap();
    assert_eq!(triggers[0].kind, OrnamentKind::Pad);
    assert_eq!(triggers[0].beat, Some(2.5));
    assert_eq!(load_triggers(&wrapped).unwrap()[0].file_stem(), "dawn_ch1_bell_7");

    fs::write(&list, r#"[{"track": "dawn", "type": "gong"}]"#).unwrap();
    assert!(matches!(load_triggers(&list), Err(RenderError::Triggers(_))));
}

#[test]
fn test_missing_binary_fails_only_that_render() {
    let dir = TempDir::new("numus-render").unwrap();
    let renderer = Renderer::new(RenderOptions {
        binary: dir.path().join("no-such-synth"),
        output_dir: dir.path().join("out"),
        ..RenderOptions::default()
    });

    let tally = renderer.render_batch(&[trigger(OrnamentKind::Bell, 1), trigger(OrnamentKind::Lead, 2)]);
    assert_eq!(tally.total(), 2);
    assert!(tally.rendered.is_empty());
    assert!(tally
        .failed
        .iter()
        .all(|(_, err)| matches!(err, RenderError::BinaryNotFound(_))));
}

#[cfg(unix)]
#[test]
fn test_render_with_external_synth() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new("numus-render").unwrap();
    let script = |name: &str, body: &str| -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    };
    // writes the file named after -F, like fluidsynth does
    let working = script(
        "synth-ok",
        r#"while [ $# -gt 0 ]; do if [ "$1" = "-F" ]; then shift; echo RIFF > "$1"; fi; shift; done"#,
    );
    // complains a lot before writing its output
    let chatty = script(
        "synth-chatty",
        r#"i=0; while [ $i -lt 3000 ]; do echo "fluidsynth: warning: sample out of range, clipping to loop bounds $i" >&2; i=$((i+1)); done
while [ $# -gt 0 ]; do if [ "$1" = "-F" ]; then shift; echo RIFF > "$1"; fi; shift; done"#,
    );
    let failing = script("synth-fail", "echo 'bad soundfont' >&2; exit 3");
    let silent = script("synth-silent", "exit 0");
    let hanging = script("synth-hang", "sleep 10");

    let out = dir.path().join("out");
    let options = |binary: PathBuf| RenderOptions {
        binary,
        output_dir: out.clone(),
        timeout: Duration::from_millis(300),
        ..RenderOptions::default()
    };

    let wav = Renderer::new(options(working)).render(&trigger(OrnamentKind::Pad, 4)).unwrap();
    assert_eq!(wav, out.join("dawn_ch1_pad_4.wav"));
    assert!(wav.exists());
    assert!(!out.join("dawn_ch1_pad_4.mid").exists());

    let patient = RenderOptions {
        timeout: Duration::from_secs(10),
        ..options(chatty)
    };
    let wav = Renderer::new(patient).render(&trigger(OrnamentKind::Bell, 9)).unwrap();
    assert!(wav.exists());

    match Renderer::new(options(failing)).render(&trigger(OrnamentKind::Bell, 5)) {
        Err(RenderError::Failed { status, stderr }) => {
            assert_eq!(status.code(), Some(3));
            assert_eq!(stderr, "bad soundfont");
        }
        other => panic!("unexpected result: {:?}", other),
    }

    assert!(matches!(
        Renderer::new(options(silent)).render(&trigger(OrnamentKind::Texture, 6)),
        Err(RenderError::NoOutput(_))
    ));

    assert!(matches!(
        Renderer::new(options(hanging)).render(&trigger(OrnamentKind::Lead, 7)),
        Err(RenderError::Timeout(_))
    ));
}
