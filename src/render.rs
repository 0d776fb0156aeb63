// Numus
// Copyright (C) 2021  Wesley Merkel
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Offline rendering of ornaments to audio files.
//!
//! An ornament is a short decoration (a bell hit, a lead phrase, a pad swell or a bit of texture)
//! described by a [`Trigger`]. [`notes`] turns a trigger into a note sequence, which is written to
//! a Standard MIDI File and bounced to WAV by an external synthesizer, FluidSynth by default:
//!
//! ```text
//! <binary> -ni <soundfont> <file.mid> -F <file.wav> -r <sample_rate>
//! ```
//!
//! The intermediate MIDI file is removed once the WAV has been written. A render that fails, by
//! the binary missing, exiting with an error or running past its timeout, only fails that one
//! trigger: [`Renderer::render_batch`] carries on and reports a [`Tally`].

mod midi;

use serde::Deserialize;
use std::{
    fmt, fs,
    io::{self, Read},
    path::{Path, PathBuf},
    process::{Command, ExitStatus, Stdio},
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;

/// A specialized [`Result`] type for rendering.
pub type Result<T> = std::result::Result<T, RenderError>;

/// The error type for rendering operations.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("synthesizer binary not found: {0}")]
    BinaryNotFound(PathBuf),

    #[error("synthesizer exited with {status}: {stderr}")]
    Failed { status: ExitStatus, stderr: String },

    #[error("synthesizer timed out after {0:?}")]
    Timeout(Duration),

    #[error("synthesizer produced no output at {0}")]
    NoOutput(PathBuf),

    #[error("parsing triggers")]
    Triggers(#[from] serde_json::Error),

    #[error("I/O error")]
    Io(#[from] io::Error),
}

/// Sample rate used when none is configured.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Minor pentatonic intervals, in semitones.
const PENTATONIC: [u8; 5] = [0, 3, 5, 7, 10];

/// Intervals stacked to voice pad chords.
const PAD_STACK: [u8; 8] = [0, 7, 12, 15, 19, 24, 27, 31];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrnamentKind {
    Bell,
    Lead,
    Pad,
    Texture,
}

impl OrnamentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            OrnamentKind::Bell => "bell",
            OrnamentKind::Lead => "lead",
            OrnamentKind::Pad => "pad",
            OrnamentKind::Texture => "texture",
        }
    }

    /// The instrument and register an ornament kind plays in.
    pub fn voice(self) -> Voice {
        let (program, base, range, notes) = match self {
            OrnamentKind::Bell => (14, 72, 12, (2, 6)),
            OrnamentKind::Lead => (81, 60, 24, (3, 8)),
            OrnamentKind::Pad => (88, 48, 12, (1, 4)),
            OrnamentKind::Texture => (95, 60, 7, (2, 5)),
        };
        Voice {
            program,
            base,
            range,
            min_notes: notes.0,
            max_notes: notes.1,
        }
    }
}

impl fmt::Display for OrnamentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Voice {
    /// General MIDI program number.
    pub program: u8,
    pub base: u8,
    /// Range above `base`, in semitones.
    pub range: u8,
    pub min_notes: usize,
    pub max_notes: usize,
}

/// A note of an ornament, with times in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub start: f64,
    pub end: f64,
}

/// A request to render one ornament.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Trigger {
    pub track: String,
    pub chapter: String,
    #[serde(rename = "type")]
    pub kind: OrnamentKind,
    pub intensity: f64,
    pub bar: u32,
    #[serde(default)]
    pub beat: Option<f64>,
}

impl Trigger {
    /// The output file name, without extension.
    ///
    /// Anything in the track or chapter name other than ASCII letters, digits, `-` and `_`
    /// becomes `_`, so the name always stays inside the output directory.
    pub fn file_stem(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            file_safe(&self.track),
            file_safe(&self.chapter),
            self.kind,
            self.bar
        )
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}.{} bar {}", self.kind, self.track, self.chapter, self.bar)?;
        if let Some(beat) = self.beat {
            write!(f, " beat {}", beat)?;
        }
        Ok(())
    }
}

/// Reads triggers from a JSON file holding either a list or `{"triggers": [...]}`.
pub fn load_triggers(path: impl AsRef<Path>) -> Result<Vec<Trigger>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum File {
        List(Vec<Trigger>),
        Wrapped { triggers: Vec<Trigger> },
    }

    let text = fs::read_to_string(path)?;
    Ok(match serde_json::from_str(&text)? {
        File::List(triggers) | File::Wrapped { triggers } => triggers,
    })
}

/// Generates the note sequence for an ornament.
///
/// Pads are a single chord. Everything else is a melodic line walking the minor pentatonic scale,
/// where each note overlaps the next by `overlap × (1 + intensity)` of its length.
pub fn notes(kind: OrnamentKind, intensity: f64, overlap: f64) -> Vec<Note> {
    let intensity = if intensity.is_finite() { intensity.clamp(0.0, 1.0) } else { 0.0 };
    let voice = kind.voice();
    let count = voice.min_notes + ((voice.max_notes - voice.min_notes) as f64 * intensity).round() as usize;
    let velocity = (40.0 + 40.0 * intensity).round() as u8;

    if kind == OrnamentKind::Pad {
        let length = 2.0 + 2.0 * intensity;
        return PAD_STACK
            .iter()
            .take(count)
            .map(|interval| Note {
                pitch: (voice.base + interval).min(127),
                velocity,
                start: 0.0,
                end: length,
            })
            .collect();
    }

    let scale: Vec<u8> = (0..=voice.range / 12)
        .flat_map(|octave| PENTATONIC.iter().map(move |interval| octave * 12 + interval))
        .filter(|&interval| interval <= voice.range)
        .collect();
    let stride = 1 + (intensity * 2.0).round() as usize;
    let length = 0.25 + 0.5 * intensity;
    let advance = length * (1.0 - overlap * (1.0 + intensity)).max(0.0);

    (0..count)
        .map(|i| {
            let start = advance * i as f64;
            Note {
                pitch: (voice.base + scale[(i * stride) % scale.len()]).min(127),
                velocity,
                start,
                end: start + length,
            }
        })
        .collect()
}

/// Where and how to render.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOptions {
    pub binary: PathBuf,
    pub soundfont: PathBuf,
    pub output_dir: PathBuf,
    pub sample_rate: u32,
    pub timeout: Duration,
    /// Base note-to-note overlap of melodic ornaments, as a fraction of note length.
    pub overlap: f64,
}

impl Default for RenderOptions {
    fn default() -> RenderOptions {
        RenderOptions {
            binary: PathBuf::from("fluidsynth"),
            soundfont: PathBuf::from("SF/FluidR3_GM.sf2"),
            output_dir: PathBuf::from("output/wav"),
            sample_rate: DEFAULT_SAMPLE_RATE,
            timeout: Duration::from_secs(30),
            overlap: 0.1,
        }
    }
}

/// The outcome of [`Renderer::render_batch`].
#[derive(Debug, Default)]
pub struct Tally {
    pub rendered: Vec<PathBuf>,
    pub failed: Vec<(Trigger, RenderError)>,
}

impl Tally {
    pub fn total(&self) -> usize {
        self.rendered.len() + self.failed.len()
    }
}

/// Renders ornaments with an external synthesizer.
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    options: RenderOptions,
}

impl Renderer {
    pub fn new(options: RenderOptions) -> Renderer {
        Renderer { options }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Renders one trigger and returns the path of the WAV file.
    pub fn render(&self, trigger: &Trigger) -> Result<PathBuf> {
        fs::create_dir_all(&self.options.output_dir)?;
        let stem = trigger.file_stem();
        let mid_path = self.options.output_dir.join(format!("{}.mid", stem));
        let wav_path = self.options.output_dir.join(format!("{}.wav", stem));

        let notes = notes(trigger.kind, trigger.intensity, self.options.overlap);
        midi::save(&notes, trigger.kind.voice().program, &mid_path)?;
        log::debug!("wrote {} notes to {}", notes.len(), mid_path.display());

        self.synthesize(&mid_path, &wav_path)?;
        if !wav_path.exists() {
            return Err(RenderError::NoOutput(wav_path));
        }
        fs::remove_file(&mid_path)?;
        log::info!("rendered {} to {}", trigger, wav_path.display());
        Ok(wav_path)
    }

    /// Renders every trigger, continuing past failures.
    pub fn render_batch(&self, triggers: &[Trigger]) -> Tally {
        let mut tally = Tally::default();
        for trigger in triggers {
            match self.render(trigger) {
                Ok(path) => tally.rendered.push(path),
                Err(err) => {
                    log::warn!("rendering {} failed: {}", trigger, err);
                    tally.failed.push((trigger.clone(), err));
                }
            }
        }
        log::info!("rendered {}/{} ornaments", tally.rendered.len(), tally.total());
        tally
    }

    fn synthesize(&self, mid_path: &Path, wav_path: &Path) -> Result<()> {
        let options = &self.options;
        let mut child = Command::new(&options.binary)
            .arg("-ni")
            .arg(&options.soundfont)
            .arg(mid_path)
            .arg("-F")
            .arg(wav_path)
            .arg("-r")
            .arg(options.sample_rate.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| match err.kind() {
                io::ErrorKind::NotFound => RenderError::BinaryNotFound(options.binary.clone()),
                _ => RenderError::Io(err),
            })?;

        // a synth that fills the pipe would block until killed
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                buf
            })
        });

        let started = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if started.elapsed() >= options.timeout {
                child.kill()?;
                child.wait()?;
                // the reader finishes on its own once every holder of the pipe exits
                drop(stderr);
                return Err(RenderError::Timeout(options.timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let stderr = stderr
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        if !status.success() {
            return Err(RenderError::Failed {
                status,
                stderr: String::from_utf8_lossy(&stderr).trim().to_owned(),
            });
        }
        Ok(())
    }
}
