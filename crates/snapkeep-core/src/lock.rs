//! Process-wide advisory lock for mutating operations

use std::fmt;
use std::sync::{Mutex, PoisonError};

use crate::error::BackupError;

/// Operation currently holding the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Create,
    Restore,
    Upload,
    Delete,
    Prune,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Create => "create",
            Self::Restore => "restore",
            Self::Upload => "upload",
            Self::Delete => "delete",
            Self::Prune => "prune",
        };
        f.write_str(name)
    }
}

/// Non-blocking lock: overlapping callers are rejected, never queued
#[derive(Debug, Default)]
pub struct OperationLock {
    held: Mutex<Option<OperationKind>>,
}

impl OperationLock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `kind`
    ///
    /// # Errors
    /// Returns `BackupError::Busy` naming the running operation if held
    pub fn try_acquire(&self, kind: OperationKind) -> Result<OperationGuard<'_>, BackupError> {
        // A panicking holder still released through Drop; recover the value
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(running) = *held {
            return Err(BackupError::Busy { running });
        }
        *held = Some(kind);
        Ok(OperationGuard { lock: self })
    }

    /// Operation currently running, if any
    #[must_use]
    pub fn running(&self) -> Option<OperationKind> {
        *self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the lock on drop
#[derive(Debug)]
pub struct OperationGuard<'a> {
    lock: &'a OperationLock,
}

impl Drop for OperationGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .lock
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *held = None;
    }
}
