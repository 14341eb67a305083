use crate::error::lock::LockError;
use crate::protocol::LockId;
use crate::session::LockSession;

use std::path::{Path, PathBuf};

use log::warn;

/// A lock that is released when dropped.
///
/// Returned by [`LockSession::acquire`]. Use [`HeldLock::release`] to observe
/// the outcome of the unlock; a failed release on drop is only logged.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct HeldLock<'a> {
    session: &'a LockSession,
    lock_id: LockId,
    path: PathBuf,
    released: bool,
}

impl<'a> HeldLock<'a> {
    pub(crate) fn new(session: &'a LockSession, lock_id: LockId, path: PathBuf) -> Self {
        Self {
            session,
            lock_id,
            path,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_id(&self) -> LockId {
        self.lock_id
    }

    /// Release the lock now and report whether the helper accepted the unlock.
    #[track_caller]
    pub fn release(mut self) -> Result<(), LockError> {
        self.released = true;
        self.session.unlock(self.lock_id)
    }
}

impl Drop for HeldLock<'_> {
    fn drop(&mut self) {
        if !self.released
            && let Err(e) = self.session.unlock(self.lock_id)
        {
            warn!("Failed to release lock on {}: {e}", self.path.display());
        }
    }
}
