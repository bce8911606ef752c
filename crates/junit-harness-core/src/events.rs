//! Filesystem and import lifecycle events.
//!
//! Events are immutable and always name the file or folder they concern.
//! For import events that is the report file; consumers derive the
//! containing folder themselves (see [`WatchEvent::parent_folder`]).

use std::fmt;
use std::path::{Path, PathBuf};

/// Native filesystem change that triggered the work an event reports on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsEventKind {
    Create,
    Modify,
    Remove,
    Other,
}

impl fmt::Display for FsEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FsEventKind::Create => "create",
            FsEventKind::Modify => "modify",
            FsEventKind::Remove => "remove",
            FsEventKind::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    FolderCreated(PathBuf),
    FolderDeleted(PathBuf),
    FolderRenamed(PathBuf),
    ImportStarted(PathBuf),
    ImportSuccessful(PathBuf),
    ImportFailed {
        path: PathBuf,
        source_kind: FsEventKind,
    },
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::FolderCreated(p)
            | WatchEvent::FolderDeleted(p)
            | WatchEvent::FolderRenamed(p)
            | WatchEvent::ImportStarted(p)
            | WatchEvent::ImportSuccessful(p) => p,
            WatchEvent::ImportFailed { path, .. } => path,
        }
    }

    pub fn is_import(&self) -> bool {
        matches!(
            self,
            WatchEvent::ImportStarted(_)
                | WatchEvent::ImportSuccessful(_)
                | WatchEvent::ImportFailed { .. }
        )
    }

    /// Folder holding the file an import event is about.
    ///
    /// `None` for folder events and for paths without a parent.
    pub fn parent_folder(&self) -> Option<&Path> {
        if self.is_import() {
            self.path().parent()
        } else {
            None
        }
    }
}

impl fmt::Display for WatchEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatchEvent::FolderCreated(p) => write!(f, "FolderCreated({})", p.display()),
            WatchEvent::FolderDeleted(p) => write!(f, "FolderDeleted({})", p.display()),
            WatchEvent::FolderRenamed(p) => write!(f, "FolderRenamed({})", p.display()),
            WatchEvent::ImportStarted(p) => write!(f, "ImportStarted({})", p.display()),
            WatchEvent::ImportSuccessful(p) => write!(f, "ImportSuccessful({})", p.display()),
            WatchEvent::ImportFailed { path, source_kind } => {
                write!(f, "ImportFailed({}, {})", path.display(), source_kind)
            }
        }
    }
}
