//! Everything related to watching a single file for creations,
//! modifications, deletions, etc.

use std::fmt::{self, Debug, Formatter};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task;
use std::time::Duration;

use futures_util::stream::{Stream as FuturesStream, StreamExt};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::Error;

/// How often the polling watcher rescans the parent directory.
pub const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Which `notify` backend observes the filesystem.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchMode {
    /// The platform's native backend (inotify on Linux).
    Notify,
    /// Periodic metadata comparison, for filesystems that emit no events
    /// (NFS, some container mounts).
    Poll(Duration),
}

impl WatchMode {
    pub fn from_poll_flag(poll: bool) -> Self {
        if poll {
            WatchMode::Poll(POLL_INTERVAL)
        } else {
            WatchMode::Notify
        }
    }
}

/// A filesystem event that touched the watched file.
#[derive(Clone, Debug)]
pub struct FileEvent {
    kind: EventKind,
}

impl FileEvent {
    /// The file (re)appeared, e.g. the second half of a rename rotation.
    pub fn is_create(&self) -> bool {
        matches!(self.kind, EventKind::Create(_))
    }
}

/// Watches one file, and can be polled to receive its events.
///
/// The watch is registered on the parent directory so that the file may be
/// removed, renamed away, and recreated without losing track of it. Events
/// for sibling entries are filtered out. Dropping `FileEvents` stops the
/// underlying watcher.
pub struct FileEvents {
    _inner: Box<dyn Watcher + Send>,
    target: PathBuf,
    event_stream: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl Debug for FileEvents {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("FileEvents")
            .field("target", &self.target)
            .finish()
    }
}

impl FileEvents {
    /// Starts watching `path`, which must name a file (it need not exist).
    pub fn new(path: impl Into<PathBuf>, mode: WatchMode) -> Result<Self, Error> {
        let target = absolutify(path).map_err(Error::Open)?;
        let parent = target
            .parent()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "File needs a parent directory"))
            .map_err(Error::Open)?
            .to_path_buf();

        let (tx, rx) = mpsc::unbounded_channel();
        let handler = move |res: notify::Result<Event>| {
            // The only way `send` can fail is if the receiver is dropped,
            // and `FileEvents` owns both ends.
            let _ = tx.send(res);
        };

        let mut inner: Box<dyn Watcher + Send> = match mode {
            WatchMode::Notify => {
                Box::new(RecommendedWatcher::new(handler, notify::Config::default())?)
            }
            WatchMode::Poll(interval) => Box::new(PollWatcher::new(
                handler,
                notify::Config::default().with_poll_interval(interval),
            )?),
        };
        inner.watch(&parent, RecursiveMode::NonRecursive)?;

        Ok(FileEvents {
            _inner: inner,
            target,
            event_stream: rx,
        })
    }

    /// The canonicalized path being watched.
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Waits for the next event touching the watched file.
    ///
    /// Returns `None` once the watcher has shut down.
    pub async fn next_event(&mut self) -> Option<io::Result<FileEvent>> {
        self.next().await
    }

    fn filter_event(&self, res: notify::Result<Event>) -> Option<io::Result<FileEvent>> {
        match res {
            Ok(event) => {
                if event.paths.iter().any(|path| path == &self.target) {
                    Some(Ok(FileEvent { kind: event.kind }))
                } else {
                    None
                }
            }
            Err(e) => Some(Err(match e.kind {
                notify::ErrorKind::Io(io_err) => io_err,
                // Runtime event errors should only be std::io, but need to
                // handle this case anyway.
                kind => io::Error::new(io::ErrorKind::Other, format!("Event error: {:?}", kind)),
            })),
        }
    }
}

impl FuturesStream for FileEvents {
    type Item = io::Result<FileEvent>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        loop {
            let res = match self.event_stream.poll_recv(cx) {
                task::Poll::Ready(Some(res)) => res,
                task::Poll::Ready(None) => return task::Poll::Ready(None),
                task::Poll::Pending => return task::Poll::Pending,
            };
            if let Some(item) = self.filter_event(res) {
                return task::Poll::Ready(Some(item));
            }
        }
    }
}

/// Makes `path` absolute with a canonical parent directory, so that it can be
/// compared against the paths carried by `notify` events. The file itself is
/// not resolved, since it may not exist.
pub(crate) fn absolutify(path: impl Into<PathBuf>) -> io::Result<PathBuf> {
    let path = path.into();

    let parent = match path.parent() {
        None => std::env::current_dir()?,
        Some(parent) if parent == Path::new("") => std::env::current_dir()?,
        Some(parent) => parent.to_path_buf(),
    };
    let filename = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Filename not found in path"))?
        .to_os_string();

    let parent = parent.canonicalize().unwrap_or(parent);

    Ok(parent.join(filename))
}
