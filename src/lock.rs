// This file is dual licensed under the terms of the Apache License, Version
// 2.0, and the BSD License. See the LICENSE file in the root of this repository
// for complete details.

use named_lock::{NamedLock, NamedLockGuard};

use crate::errors::LockError;

type Result<T, E = LockError> = core::result::Result<T, E>;

/// Cross-process lock serializing update work on one installation. The
/// lock is named from the md5 of the caller-supplied root id; md5 is fine
/// here, nothing security sensitive depends on it.
#[derive(Debug)]
pub(crate) struct UpdateLock {
    lock: NamedLock,
}

impl UpdateLock {
    pub(crate) fn new(rid: &str) -> Result<UpdateLock> {
        let id = format!("{:x}", md5::compute(rid));

        Ok(UpdateLock {
            lock: NamedLock::create(&format!("esky.{}", id))?,
        })
    }

    pub(crate) fn acquire(&self) -> Result<UpdateGuard<'_>> {
        Ok(UpdateGuard {
            _guard: self.lock.lock()?,
        })
    }
}

#[derive(Debug)]
pub(crate) struct UpdateGuard<'l> {
    _guard: NamedLockGuard<'l>,
}
