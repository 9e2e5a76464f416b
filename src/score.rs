//! In-memory MIDI score model.
//!
//! Wraps a standard MIDI file with a tempo-mapped note list so callers can
//! ask for the score's end time in seconds and write the file back out for
//! the command-line synthesizer. Parsing keeps the original bytes, so a
//! score loaded from disk round-trips unchanged.

use anyhow::{Context, Result};
use midly::num::{u15, u24, u28, u4, u7};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
};
use std::fs;
use std::path::Path;

/// Microseconds per beat before the first tempo event (120 BPM).
const DEFAULT_TEMPO: u32 = 500_000;
/// Ticks per beat used when building scores from note lists.
const BUILD_RESOLUTION: u16 = 480;

/// One note with absolute timing in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub start: f64,
    pub end: f64,
}

/// An in-memory MIDI score: the serialized file plus the note list derived
/// from its tempo map.
#[derive(Clone, Debug)]
pub struct MidiScore {
    bytes: Vec<u8>,
    notes: Vec<Note>,
    end_time: f64,
}

impl MidiScore {
    /// Parse a standard MIDI file from raw bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let smf = Smf::parse(&bytes).context("failed to parse MIDI data")?;
        let notes = extract_notes(&smf)?;
        let end_time = notes.iter().map(|n| n.end).fold(0.0, f64::max);
        drop(smf);
        Ok(Self {
            bytes,
            notes,
            end_time,
        })
    }

    /// Load a standard MIDI file from disk.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let bytes =
            fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_bytes(bytes).with_context(|| format!("in {}", path.display()))
    }

    /// Build a single-track score from a note list at 120 BPM. Used by the
    /// extraction tests and by callers constructing scores programmatically.
    pub fn from_notes(notes: &[Note]) -> Result<Self> {
        let ticks_per_sec = BUILD_RESOLUTION as f64 * 1_000_000.0 / DEFAULT_TEMPO as f64;

        // (tick, is_on, pitch, velocity); offs sort before ons at equal ticks
        let mut events: Vec<(u64, bool, u8, u8)> = Vec::with_capacity(notes.len() * 2);
        for note in notes {
            let start = (note.start * ticks_per_sec).round() as u64;
            let end = (note.end * ticks_per_sec).round() as u64;
            events.push((start, true, note.pitch, note.velocity));
            events.push((end.max(start), false, note.pitch, 0));
        }
        events.sort_by_key(|&(tick, is_on, ..)| (tick, is_on));

        let mut track = vec![TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(DEFAULT_TEMPO))),
        }];
        let mut cursor = 0u64;
        for (tick, is_on, pitch, velocity) in events {
            let delta = u28::new((tick - cursor) as u32);
            cursor = tick;
            let message = if is_on {
                MidiMessage::NoteOn {
                    key: u7::new(pitch),
                    vel: u7::new(velocity),
                }
            } else {
                MidiMessage::NoteOff {
                    key: u7::new(pitch),
                    vel: u7::new(0),
                }
            };
            track.push(TrackEvent {
                delta,
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message,
                },
            });
        }
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });

        let smf = Smf {
            header: Header::new(
                Format::SingleTrack,
                Timing::Metrical(u15::new(BUILD_RESOLUTION)),
            ),
            tracks: vec![track],
        };
        let mut bytes = Vec::new();
        smf.write(&mut bytes)
            .map_err(|e| anyhow::anyhow!("failed to serialize MIDI data: {e}"))?;
        Self::from_bytes(bytes)
    }

    /// Write the serialized MIDI file to `path`.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, &self.bytes)
            .with_context(|| format!("failed to write {}", path.display()))
    }

    /// Time of the latest note-off in seconds; 0.0 for a score without notes.
    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }
}

/// Tick-to-seconds conversion under a merged tempo map. For metrical timing
/// the map holds cumulative microseconds at each tempo change; for timecode
/// timing every tick has a fixed duration.
struct TempoMap {
    // (tick, cumulative_us_at_tick, us_per_beat_from_here)
    changes: Vec<(u64, f64, u32)>,
    ticks_per_beat: f64,
    fixed_secs_per_tick: Option<f64>,
}

impl TempoMap {
    fn build(smf: &Smf) -> Self {
        match smf.header.timing {
            Timing::Metrical(tpb) => {
                let ticks_per_beat = tpb.as_int() as f64;

                // Tempo events from every track, merged by absolute tick
                let mut raw: Vec<(u64, u32)> = Vec::new();
                for track in &smf.tracks {
                    let mut tick = 0u64;
                    for event in track {
                        tick += event.delta.as_int() as u64;
                        if let TrackEventKind::Meta(MetaMessage::Tempo(us)) = event.kind {
                            raw.push((tick, us.as_int()));
                        }
                    }
                }
                raw.sort_by_key(|&(tick, _)| tick);

                let mut changes = vec![(0u64, 0.0f64, DEFAULT_TEMPO)];
                for (tick, us_per_beat) in raw {
                    let &(last_tick, last_us, last_tempo) = changes.last().unwrap();
                    let elapsed =
                        (tick - last_tick) as f64 / ticks_per_beat * last_tempo as f64;
                    if tick == last_tick {
                        // Same-tick tempo change overrides the previous one
                        changes.last_mut().unwrap().2 = us_per_beat;
                    } else {
                        changes.push((tick, last_us + elapsed, us_per_beat));
                    }
                }

                Self {
                    changes,
                    ticks_per_beat,
                    fixed_secs_per_tick: None,
                }
            }
            Timing::Timecode(fps, subframe) => Self {
                changes: Vec::new(),
                ticks_per_beat: 1.0,
                fixed_secs_per_tick: Some(1.0 / (fps.as_f32() as f64 * subframe as f64)),
            },
        }
    }

    fn seconds(&self, tick: u64) -> f64 {
        if let Some(spt) = self.fixed_secs_per_tick {
            return tick as f64 * spt;
        }
        let idx = self
            .changes
            .partition_point(|&(change_tick, ..)| change_tick <= tick)
            .saturating_sub(1);
        let (change_tick, cumulative_us, us_per_beat) = self.changes[idx];
        let us = cumulative_us
            + (tick - change_tick) as f64 / self.ticks_per_beat * us_per_beat as f64;
        us / 1_000_000.0
    }
}

/// Walk every track, pairing note-ons with their note-offs. A note-on with
/// velocity zero counts as a note-off; note-ons still open at end of track
/// are closed there.
fn extract_notes(smf: &Smf) -> Result<Vec<Note>> {
    let tempo_map = TempoMap::build(smf);
    let mut notes = Vec::new();

    for track in &smf.tracks {
        // FIFO of open note-ons per (channel, key)
        let mut open: Vec<(u8, u8, u64, u8)> = Vec::new();
        let mut tick = 0u64;

        for event in track {
            tick += event.delta.as_int() as u64;
            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let channel = channel.as_int();
            match message {
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    open.push((channel, key.as_int(), tick, vel.as_int()));
                }
                MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                    let key = key.as_int();
                    if let Some(pos) = open
                        .iter()
                        .position(|&(ch, k, ..)| ch == channel && k == key)
                    {
                        let (_, _, start_tick, velocity) = open.remove(pos);
                        notes.push(Note {
                            pitch: key,
                            velocity,
                            start: tempo_map.seconds(start_tick),
                            end: tempo_map.seconds(tick),
                        });
                    }
                }
                _ => {}
            }
        }

        for (_, key, start_tick, velocity) in open {
            notes.push(Note {
                pitch: key,
                velocity,
                start: tempo_map.seconds(start_tick),
                end: tempo_map.seconds(tick),
            });
        }
    }

    notes.sort_by(|a, b| a.start.total_cmp(&b.start));
    Ok(notes)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn c_major_triad() -> Vec<Note> {
        vec![
            Note {
                pitch: 60,
                velocity: 100,
                start: 0.0,
                end: 1.0,
            },
            Note {
                pitch: 64,
                velocity: 100,
                start: 0.5,
                end: 1.5,
            },
            Note {
                pitch: 67,
                velocity: 100,
                start: 1.0,
                end: 2.5,
            },
        ]
    }

    #[test]
    fn test_end_time_is_last_note_off() {
        let score = MidiScore::from_notes(&c_major_triad()).unwrap();
        assert_relative_eq!(score.end_time(), 2.5, epsilon = 1e-3);
    }

    #[test]
    fn test_empty_score_end_time() {
        let score = MidiScore::from_notes(&[]).unwrap();
        assert_eq!(score.end_time(), 0.0);
        assert!(score.notes().is_empty());
    }

    #[test]
    fn test_round_trip_through_bytes() {
        let score = MidiScore::from_notes(&c_major_triad()).unwrap();

        let mut path = std::env::temp_dir();
        path.push("midi_align_extract_score_test.mid");
        score.write(&path).unwrap();
        let reloaded = MidiScore::from_path(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(reloaded.notes().len(), 3);
        // Tick quantization at 480 ticks per beat keeps us within ~1 ms
        assert_relative_eq!(reloaded.end_time(), score.end_time(), epsilon = 2e-3);
    }

    #[test]
    fn test_velocity_zero_note_on_closes_note() {
        // Build by hand: note-on then note-on with vel 0
        let track = vec![
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message: MidiMessage::NoteOn {
                        key: u7::new(60),
                        vel: u7::new(90),
                    },
                },
            },
            TrackEvent {
                delta: u28::new(480),
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message: MidiMessage::NoteOn {
                        key: u7::new(60),
                        vel: u7::new(0),
                    },
                },
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ];
        let smf = Smf {
            header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(480))),
            tracks: vec![track],
        };
        let mut bytes = Vec::new();
        smf.write(&mut bytes).unwrap();

        let score = MidiScore::from_bytes(bytes).unwrap();
        assert_eq!(score.notes().len(), 1);
        // 480 ticks at 120 BPM default tempo is half a second
        assert_relative_eq!(score.end_time(), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_tempo_change_shifts_times() {
        let track = vec![
            // 60 BPM from the start
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(1_000_000))),
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message: MidiMessage::NoteOn {
                        key: u7::new(60),
                        vel: u7::new(90),
                    },
                },
            },
            TrackEvent {
                delta: u28::new(480),
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message: MidiMessage::NoteOff {
                        key: u7::new(60),
                        vel: u7::new(0),
                    },
                },
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ];
        let smf = Smf {
            header: Header::new(Format::SingleTrack, Timing::Metrical(u15::new(480))),
            tracks: vec![track],
        };
        let mut bytes = Vec::new();
        smf.write(&mut bytes).unwrap();

        let score = MidiScore::from_bytes(bytes).unwrap();
        // One beat at 60 BPM is one second
        assert_relative_eq!(score.end_time(), 1.0, epsilon = 1e-6);
    }
}
