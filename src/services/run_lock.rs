use std::sync::{Arc, Mutex};

use crate::errors::{LedgerError, LedgerResult};
use crate::models::Scope;

/// Scopes of the matching runs active in this process.
///
/// Acquisition never waits: a run whose scope overlaps an active one is
/// rejected so the caller can report it and try again later.
#[derive(Debug, Clone, Default)]
pub struct RunLocks {
    active: Arc<Mutex<Vec<(u64, Scope)>>>,
    next_id: Arc<Mutex<u64>>,
}

/// Held for the duration of a run; releases its scope on drop.
#[derive(Debug)]
pub struct RunGuard {
    id: u64,
    scope: Scope,
    active: Arc<Mutex<Vec<(u64, Scope)>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, scope: Scope) -> LedgerResult<RunGuard> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, held)) = active.iter().find(|(_, held)| held.overlaps(&scope)) {
            return Err(LedgerError::ConcurrentRunConflict {
                requested: scope,
                active: Some(*held),
            });
        }

        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };
        active.push((id, scope));

        Ok(RunGuard {
            id,
            scope,
            active: self.active.clone(),
        })
    }

    pub fn active(&self) -> Vec<Scope> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, scope)| *scope)
            .collect()
    }
}

impl RunGuard {
    pub fn scope(&self) -> Scope {
        self.scope
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        active.retain(|(id, _)| *id != self.id);
    }
}
