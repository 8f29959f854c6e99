//! Deferred release of stage resources.
//!
//! Stage outputs must outlive the stage that produced them: later stages,
//! the merge, and error capture all read earlier directories. The janitor
//! takes ownership of every resource acquired during a run and releases
//! them in reverse acquisition order when the driver is done, or when the
//! janitor is dropped on an early return.

use doctree_plugins::Release;
use tracing::debug;

#[derive(Default)]
pub struct Janitor {
    held: Vec<Box<dyn Release>>,
}

impl Janitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a resource until [`Janitor::release_all`].
    pub fn hold(&mut self, resource: impl Release + 'static) {
        self.held.push(Box::new(resource));
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Release everything held, newest first.
    pub fn release_all(&mut self) {
        if !self.held.is_empty() {
            debug!(count = self.held.len(), "releasing stage resources");
        }
        while let Some(mut resource) = self.held.pop() {
            resource.release();
        }
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for Janitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Janitor").field("held", &self.held.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    struct Recorder {
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl Release for Recorder {
        fn release(&mut self) {
            self.log.borrow_mut().push(self.name);
        }
    }

    #[test]
    fn releases_in_reverse_order_once() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut janitor = Janitor::new();
        for name in ["source", "converter", "error-page"] {
            janitor.hold(Recorder {
                name,
                log: Rc::clone(&log),
            });
        }
        assert_eq!(janitor.len(), 3);

        janitor.release_all();
        assert!(janitor.is_empty());
        drop(janitor);
        assert_eq!(*log.borrow(), vec!["error-page", "converter", "source"]);
    }

    #[test]
    fn drop_releases_pending_resources() {
        let log = Rc::new(RefCell::new(Vec::new()));
        {
            let mut janitor = Janitor::new();
            janitor.hold(Recorder {
                name: "scratch",
                log: Rc::clone(&log),
            });
        }
        assert_eq!(*log.borrow(), vec!["scratch"]);
    }
}
