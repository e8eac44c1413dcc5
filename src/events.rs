//! Filesystem events for a single followed file.

use std::fmt::{self, Debug, Formatter};
use std::io;
use std::path::{Path, PathBuf};

use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::EventKind;
use tokio::sync::mpsc;
use tracing::debug;

use crate::Error;

/// Changes that may wait for the reader before further ones are dropped.
const EVENT_BACKLOG: usize = 64;

/// What happened to the followed file, as far as reading it is concerned.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Change {
    /// A file appeared at the path, by creation or by being renamed into place.
    Created,
    /// Data was written to the file.
    Modified,
}

/// Watches the parent directory of a file and yields the [`Change`]s that
/// concern that file.
///
/// Watching the directory rather than the file itself keeps events flowing
/// across rotations, where the file at the path is replaced by a new one.
pub struct FileEvents {
    // Dropping the watcher releases the watch and closes `event_stream`.
    _watcher: notify::RecommendedWatcher,
    path: PathBuf,
    directory: PathBuf,
    event_stream: mpsc::Receiver<notify::Result<Change>>,
}

impl Debug for FileEvents {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("FileEvents")
            .field("path", &self.path)
            .field("directory", &self.directory)
            .finish()
    }
}

impl FileEvents {
    /// Registers a watch for `path`, which does not need to exist yet.
    ///
    /// The path is absolutized so it can be matched against the paths
    /// reported by `notify`.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = absolutify(path.as_ref())?;

        if path.is_dir() {
            return Err(Error::NotAFile(path));
        }
        let directory = match path.parent() {
            Some(parent) => parent.to_path_buf(),
            None => return Err(Error::NotAFile(path)),
        };

        let (tx, rx) = mpsc::channel(EVENT_BACKLOG);
        let watched = path.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            let res = match res {
                Ok(event) => match classify(&watched, &event) {
                    Some(change) => Ok(change),
                    None => return,
                },
                Err(e) => Err(e),
            };
            // A full backlog already holds a wakeup, and every wakeup re-reads
            // the file's metadata, so nothing is lost by dropping this one.
            let _ = tx.try_send(res);
        })
        .map_err(|source| Error::Watch {
            path: path.clone(),
            source,
        })?;

        notify::Watcher::watch(&mut watcher, &directory, notify::RecursiveMode::NonRecursive)
            .map_err(|source| Error::Watch {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), "watching {}", directory.display());

        Ok(FileEvents {
            _watcher: watcher,
            path,
            directory,
            event_stream: rx,
        })
    }

    /// The absolutized path being followed.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the next change to the followed file. Events for other
    /// entries of the directory never reach this point.
    ///
    /// Changes arriving while `EVENT_BACKLOG` of them are already pending
    /// are dropped, so a slow reader sees fewer changes than happened.
    ///
    /// Returns `None` once the underlying watcher has shut down.
    pub async fn next_change(&mut self) -> Option<Result<Change, Error>> {
        let res = match self.event_stream.recv().await? {
            Ok(change) => Ok(change),
            Err(notify::Error {
                kind: notify::ErrorKind::Io(err),
                ..
            }) => Err(Error::Io(err)),
            Err(source) => Err(Error::Watch {
                path: self.path.clone(),
                source,
            }),
        };

        Some(res)
    }
}

fn classify(path: &Path, event: &notify::Event) -> Option<Change> {
    let touches = event.paths.iter().any(|p| p == path);

    match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) if touches => Some(Change::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) if touches => Some(Change::Created),
        // `paths` is `[from, to]`.
        EventKind::Modify(ModifyKind::Name(RenameMode::Both))
            if event.paths.get(1).map(PathBuf::as_path) == Some(path) =>
        {
            Some(Change::Created)
        }
        EventKind::Modify(ModifyKind::Data(_) | ModifyKind::Any) if touches => {
            Some(Change::Modified)
        }
        _ => None,
    }
}

fn absolutify(path: &Path) -> io::Result<PathBuf> {
    let filename = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Filename not found in path"))?;

    let dir = match path.parent() {
        Some(parent) if parent != Path::new("") => parent.to_path_buf(),
        _ => std::env::current_dir()?,
    };

    let dir = dir.canonicalize().unwrap_or(dir);

    Ok(dir.join(filename))
}
