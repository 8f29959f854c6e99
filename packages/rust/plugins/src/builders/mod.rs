//! Builder plugins: run a documentation toolchain over the previous output.

pub mod plantuml;
pub mod sphinx;

pub use plantuml::{PlantUmlBuilder, PlantUmlParams};
pub use sphinx::{SphinxBuilder, SphinxParams};
