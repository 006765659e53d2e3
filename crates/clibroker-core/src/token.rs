//! The access token: exclusive possession of all three surfaces.

use std::fmt;

use crate::queue::RequestId;
use crate::task::TaskId;

/// How an access was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// A single operation, released as soon as it completes.
    Bare,
    /// A session, released when its handle is closed or dropped.
    Session,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bare => f.write_str("bare"),
            Self::Session => f.write_str("session"),
        }
    }
}

/// The live token. At most one exists per broker.
#[derive(Debug)]
pub(crate) struct AccessToken {
    /// Request that created this token.
    pub grant: RequestId,
    pub holder: TaskId,
    pub kind: AccessKind,
    /// Live acquisitions sharing this token; the token dies at zero.
    pub depth: usize,
}

impl AccessToken {
    pub const fn new(grant: RequestId, holder: TaskId, kind: AccessKind) -> Self {
        Self {
            grant,
            holder,
            kind,
            depth: 1,
        }
    }

    /// Whether `task` may share this token without queueing.
    ///
    /// Only a session owner reenters; two bare calls from the same identity
    /// still take turns.
    pub fn admits(&self, task: TaskId) -> bool {
        self.kind == AccessKind::Session && self.holder == task
    }

    pub const fn info(&self) -> HolderInfo {
        HolderInfo {
            task: self.holder,
            kind: self.kind,
            depth: self.depth,
        }
    }
}

/// Public snapshot of the current holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HolderInfo {
    pub task: TaskId,
    pub kind: AccessKind,
    /// Number of live acquisitions sharing the token (1 = not reentered).
    pub depth: usize,
}
