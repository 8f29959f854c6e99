//! Converter plugins: rewrite the previous stage's output.

pub mod hugoify;
pub mod noop;
pub mod pandoc;
pub mod subdir;

pub use hugoify::{HugoifyConverter, HugoifyParams};
pub use noop::NoopConverter;
pub use pandoc::{PandocConverter, PandocParams};
pub use subdir::{SubdirConverter, SubdirParams};
