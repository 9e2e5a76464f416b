//! MIDI/audio alignment tooling - shared modules for all binaries.

pub mod alignment;
pub mod archive;
pub mod catalog;
pub mod cqt;
pub mod features;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod report;
pub mod score;
pub mod search;
pub mod synth;
