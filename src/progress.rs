// This file is dual licensed under the terms of the Apache License, Version
// 2.0, and the BSD License. See the LICENSE file in the root of this repository
// for complete details.

/// Optional download-progress callbacks, keyed by artifact filename.
/// `len` is the declared size, or 0 when the summary doesn't carry one.
pub(crate) struct Progress<'p> {
    start: Option<Box<dyn Fn(&str, u64) + 'p>>,
    update: Option<Box<dyn Fn(&str, u64) + 'p>>,
    finish: Option<Box<dyn Fn(&str) + 'p>>,
}

impl<'p> Progress<'p> {
    pub(crate) fn new() -> Progress<'p> {
        Progress {
            start: None,
            update: None,
            finish: None,
        }
    }

    pub(crate) fn on_start(&mut self, cb: impl Fn(&str, u64) + 'p) {
        self.start = Some(Box::new(cb));
    }

    pub(crate) fn on_update(&mut self, cb: impl Fn(&str, u64) + 'p) {
        self.update = Some(Box::new(cb));
    }

    pub(crate) fn on_finish(&mut self, cb: impl Fn(&str) + 'p) {
        self.finish = Some(Box::new(cb));
    }

    pub(crate) fn start(&self, id: &str, len: u64) {
        if let Some(cb) = &self.start {
            (cb)(id, len);
        }
    }

    pub(crate) fn update(&self, id: &str, delta: u64) {
        if let Some(cb) = &self.update {
            (cb)(id, delta);
        }
    }

    pub(crate) fn finish(&self, id: &str) {
        if let Some(cb) = &self.finish {
            (cb)(id);
        }
    }
}

impl std::fmt::Debug for Progress<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Progress").finish()
    }
}
