// src/gps/mod.rs
//! NMEA framing, parsing and fix synthesis, plus the sentence sources

pub mod fix;
pub mod framer;
pub mod nmea;
pub mod serial;
pub mod simulator;

pub use fix::{to_fix, PositionFix};
pub use framer::SentenceFramer;
pub use nmea::{parse_nmea_sentence, ParsedSentence};
pub use simulator::{SentenceSimulator, SimulatorOptions};
