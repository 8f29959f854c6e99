use std::path::PathBuf;

use tracing::debug;

use doctree_shared::{PluginKind, Result};

use crate::Transformer;

/// Passes its input through untouched. Allocates nothing.
#[derive(Debug)]
pub struct NoopConverter {
    input: PathBuf,
}

impl NoopConverter {
    pub fn new(input: PathBuf) -> Self {
        Self { input }
    }
}

impl Transformer for NoopConverter {
    fn kind(&self) -> PluginKind {
        PluginKind::Noop
    }

    fn run(&mut self) -> Result<PathBuf> {
        debug!(input = %self.input.display(), "noop");
        Ok(self.input.clone())
    }

    fn release(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_input() {
        let mut noop = NoopConverter::new(PathBuf::from("/some/dir"));
        assert_eq!(noop.run().unwrap(), PathBuf::from("/some/dir"));
        noop.release();
        assert_eq!(noop.run().unwrap(), PathBuf::from("/some/dir"));
    }
}
