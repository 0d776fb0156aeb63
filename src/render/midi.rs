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

use super::Note;
use midly::{
    num::{u15, u24, u28, u4, u7},
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
};
use std::{fs, io, path::Path};

pub(super) const TICKS_PER_BEAT: u16 = 480;

/// Microseconds per beat at 120 BPM.
const TEMPO: u32 = 500_000;

const TICKS_PER_SECOND: f64 = TICKS_PER_BEAT as f64 * 1_000_000.0 / TEMPO as f64;

pub(super) fn save(notes: &[Note], program: u8, path: &Path) -> io::Result<()> {
    fs::write(path, encode(notes, program)?)
}

fn encode(notes: &[Note], program: u8) -> io::Result<Vec<u8>> {
    let mut bytes = Vec::new();
    smf(notes, program).write_std(&mut bytes)?;
    Ok(bytes)
}

fn smf(notes: &[Note], program: u8) -> Smf<'static> {
    let channel = u4::from(0_u8);
    // note offs sort before note ons on the same tick
    let mut events: Vec<(u32, u8, MidiMessage)> = Vec::with_capacity(notes.len() * 2);
    for note in notes {
        let key = u7::from(note.pitch.min(127));
        events.push((
            ticks(note.start),
            1,
            MidiMessage::NoteOn {
                key,
                vel: u7::from(note.velocity.min(127)),
            },
        ));
        events.push((ticks(note.end), 0, MidiMessage::NoteOff { key, vel: u7::from(0_u8) }));
    }
    events.sort_by_key(|&(tick, order, _)| (tick, order));

    let mut track = vec![
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(TEMPO))),
        },
        TrackEvent {
            delta: u28::from(0_u32),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: u7::from(program.min(127)),
                },
            },
        },
    ];
    let mut previous = 0;
    for (tick, _, message) in events {
        track.push(TrackEvent {
            delta: u28::from(tick - previous),
            kind: TrackEventKind::Midi { channel, message },
        });
        previous = tick;
    }
    track.push(TrackEvent {
        delta: u28::from(0_u32),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    Smf {
        header: Header::new(Format::SingleTrack, Timing::Metrical(u15::from(TICKS_PER_BEAT))),
        tracks: vec![track],
    }
}

fn ticks(seconds: f64) -> u32 {
    (seconds.max(0.0) * TICKS_PER_SECOND).round() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{notes, OrnamentKind};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_encoded_file_plays_every_note() {
        let line = notes(OrnamentKind::Lead, 1.0, 0.1);
        let bytes = encode(&line, 81).unwrap();
        let smf = Smf::parse(&bytes).unwrap();
        assert_eq!(smf.header.timing, Timing::Metrical(u15::from(TICKS_PER_BEAT)));
        assert_eq!(smf.tracks.len(), 1);

        let mut on = Vec::new();
        let mut tick = 0;
        for event in &smf.tracks[0] {
            tick += event.delta.as_int();
            match event.kind {
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { key, .. },
                    ..
                } => on.push((tick, key.as_int())),
                TrackEventKind::Midi {
                    message: MidiMessage::ProgramChange { program },
                    ..
                } => assert_eq!(program.as_int(), 81),
                _ => {}
            }
        }
        let expected: Vec<_> = line.iter().map(|n| (ticks(n.start), n.pitch)).collect();
        assert_eq!(on, expected);
        // 0.6s between notes at 960 ticks per second
        assert_eq!(on[1].0, 576);
    }
}
