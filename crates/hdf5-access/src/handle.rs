//! Scoped handles on objects of an open file.
//!
//! Every group, dataset, datatype, dataspace and attribute a caller works
//! with is backed by an entry in the file's [`HandleTable`]. A
//! [`HandleGuard`] owns one entry and releases it exactly once when it goes
//! out of scope, on every exit path. Guards borrow the file, so none can
//! outlive it.
//!
//! A guard dropped while the table is borrowed queues its release; the queue
//! is applied the next time the table is used.

use std::cell::{Cell, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;

use tracing::{trace, warn};

use crate::file::ContainerFile;

/// What an open handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Group,
    Dataset,
    Datatype,
    Dataspace,
    Attribute,
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HandleKind::Group => "group",
            HandleKind::Dataset => "dataset",
            HandleKind::Datatype => "datatype",
            HandleKind::Dataspace => "dataspace",
            HandleKind::Attribute => "attribute",
        })
    }
}

/// Identifier of an open handle, unique within one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct OpenHandle {
    kind: HandleKind,
    target: String,
}

/// Registry of the handles open on one file.
#[derive(Debug, Default)]
pub(crate) struct HandleTable {
    next: u64,
    open: HashMap<HandleId, OpenHandle>,
}

impl HandleTable {
    pub(crate) fn acquire(&mut self, kind: HandleKind, target: &str) -> HandleId {
        self.next += 1;
        let id = HandleId(self.next);
        self.open.insert(
            id,
            OpenHandle {
                kind,
                target: target.to_string(),
            },
        );
        id
    }

    /// Kind and target of the released handle, `None` if it was not open.
    pub(crate) fn release(&mut self, id: HandleId) -> Option<(HandleKind, String)> {
        self.open.remove(&id).map(|h| (h.kind, h.target))
    }

    pub(crate) fn len(&self) -> usize {
        self.open.len()
    }

    pub(crate) fn count(&self, kind: HandleKind) -> usize {
        self.open.values().filter(|h| h.kind == kind).count()
    }

    fn release_logged(&mut self, id: HandleId) {
        match self.release(id) {
            Some((kind, target)) => trace!(%id, %kind, target, "handle released"),
            None => warn!(%id, "release of a handle that is not open"),
        }
    }
}

/// A [`HandleTable`] together with the releases that could not be applied
/// because the table was borrowed at the time.
#[derive(Default)]
pub(crate) struct Handles {
    table: RefCell<HandleTable>,
    deferred: Cell<Vec<HandleId>>,
}

impl Handles {
    /// The table, with every queued release applied.
    pub(crate) fn table(&self) -> RefMut<'_, HandleTable> {
        let mut table = self.table.borrow_mut();
        for id in self.deferred.take() {
            table.release_logged(id);
        }
        table
    }

    /// Release `id` now, or queue it when the table is busy. Never fails.
    fn release(&self, id: HandleId) {
        match self.table.try_borrow_mut() {
            Ok(mut table) => {
                for queued in self.deferred.take() {
                    table.release_logged(queued);
                }
                table.release_logged(id);
            }
            Err(_) => {
                let mut queued = self.deferred.take();
                queued.push(id);
                trace!(%id, pending = queued.len(), "handle table busy, release queued");
                self.deferred.set(queued);
            }
        }
    }
}

/// Owns one open handle of a [`ContainerFile`] and releases it on drop.
///
/// Release cannot fail: by the time it runs the caller's result is already
/// decided, so anomalies are logged and never escalated.
#[must_use = "dropping a guard releases its handle immediately"]
pub struct HandleGuard<'f> {
    file: &'f ContainerFile,
    id: HandleId,
    kind: HandleKind,
}

impl<'f> HandleGuard<'f> {
    pub(crate) fn acquire(file: &'f ContainerFile, kind: HandleKind, target: &str) -> Self {
        let id = file.handles().table().acquire(kind, target);
        trace!(%id, %kind, target, "handle acquired");
        HandleGuard { file, id, kind }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }
}

impl fmt::Debug for HandleGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleGuard")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        self.file.handles().release(self.id);
    }
}
