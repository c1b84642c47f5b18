//! Network namespace handles.

use std::fmt;
use std::fs::File;
use std::io;
use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use nix::sched::{CloneFlags, setns};

/// An open network namespace, identified by the path it was opened from.
///
/// Cloning shares the underlying descriptor.
#[derive(Clone)]
pub struct NetNs {
    path: PathBuf,
    file: Arc<File>,
}

impl NetNs {
    /// Open the namespace at `path` (e.g. `/var/run/netns/x`, `/proc/<pid>/ns/net`).
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::from_file(path, file))
    }

    /// Handle backed by an already open descriptor.
    pub fn from_file(path: &Path, file: File) -> Self {
        Self {
            path: path.to_path_buf(),
            file: Arc::new(file),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }

    /// Run `f` on a short-lived thread that has joined this namespace.
    ///
    /// The namespace switch is per thread, so the caller's thread and the
    /// rest of the process are never moved. Sockets opened inside `f` stay
    /// bound to this namespace.
    pub fn run<F, T>(&self, f: F) -> io::Result<T>
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        thread::scope(|scope| {
            scope
                .spawn(|| -> io::Result<T> {
                    setns(self.file.as_fd(), CloneFlags::CLONE_NEWNET)?;
                    Ok(f())
                })
                .join()
                .map_err(|_| io::Error::other("namespace worker panicked"))?
        })
    }
}

impl PartialEq for NetNs {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for NetNs {}

impl fmt::Debug for NetNs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetNs")
            .field("path", &self.path)
            .field("fd", &self.raw_fd())
            .finish()
    }
}

/// Resolves namespace paths into handles.
pub trait NamespaceAdapter: Send + Sync {
    fn get_ns(&self, path: &Path) -> io::Result<NetNs>;
}

/// Opens namespace files from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsNamespaceAdapter;

impl NamespaceAdapter for FsNamespaceAdapter {
    fn get_ns(&self, path: &Path) -> io::Result<NetNs> {
        NetNs::open(path)
    }
}
