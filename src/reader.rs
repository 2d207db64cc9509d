//! Everything related to reading lines from a followed file.

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::ready;
use futures_util::stream::{self, Stream as FuturesStream};
use pin_project_lite::pin_project;
use tokio::fs::{metadata, File};
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::debug;

use crate::events::{FileEvent, FileEvents, WatchMode};

type LineReader = BufReader<File>;

async fn new_linereader(path: impl AsRef<Path>) -> io::Result<LineReader> {
    let reader = File::open(path.as_ref()).await?;
    Ok(BufReader::new(reader))
}

/// Where reading starts when a file is first opened.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Location {
    #[default]
    Start,
    /// This many bytes before the end of the file, clamped to the start.
    FromEnd(u64),
}

/// How a file is followed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FollowOptions {
    pub location: Location,
    /// Keep waiting for appends at EOF instead of ending the stream.
    pub follow: bool,
    /// Wait for a removed file to reappear instead of ending the stream.
    pub reopen: bool,
    /// Lines longer than this many bytes are split; `0` disables splitting.
    pub max_line_size: usize,
    pub watch: WatchMode,
}

impl Default for FollowOptions {
    fn default() -> Self {
        FollowOptions {
            location: Location::Start,
            follow: true,
            reopen: true,
            max_line_size: 0,
            watch: WatchMode::Notify,
        }
    }
}

/// Lines of a followed file, in file order.
///
/// The stream ends with `None` on a clean stop, or yields one `Err` and then
/// ends. Dropping it releases the file and its watch.
pub type LineStream = Pin<Box<dyn FuturesStream<Item = io::Result<String>> + Send>>;

/// Something that can follow a file from an offset and deliver its lines.
#[async_trait]
pub trait Follower: Send + Sync {
    async fn follow(&self, path: &Path, options: FollowOptions) -> io::Result<LineStream>;
}

/// The production [`Follower`], backed by [`Tail`].
#[derive(Clone, Copy, Debug, Default)]
pub struct TailFollower;

#[async_trait]
impl Follower for TailFollower {
    async fn follow(&self, path: &Path, options: FollowOptions) -> io::Result<LineStream> {
        let tail = Tail::open(path, &options).await?;
        let lines = SplitLines::new(tail.into_stream(), options.max_line_size);

        Ok(Box::pin(lines))
    }
}

/// Follows one file, surviving truncation and (optionally) removal.
///
/// A line is only produced once its `\n` terminator has been written; until
/// then the bytes seen so far are buffered.
pub struct Tail {
    path: PathBuf,
    events: Option<FileEvents>,
    /// Polling mode only: rechecks the file on every tick, since the poll
    /// watcher misses appends landing within its mtime granularity.
    ticks: Option<Interval>,
    /// `None` while a removed file has not reappeared yet.
    reader: Option<LineReader>,
    pos: u64,
    partial: Vec<u8>,
    reopen: bool,
    done: bool,
}

impl fmt::Debug for Tail {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("Tail")
            .field("path", &self.path)
            .field("events", &self.events)
            .field("polling", &self.ticks.is_some())
            .field("open", &self.reader.is_some())
            .field("pos", &self.pos)
            .field("partial", &self.partial.len())
            .field("done", &self.done)
            .finish()
    }
}

impl Tail {
    pub async fn open(path: impl AsRef<Path>, options: &FollowOptions) -> io::Result<Self> {
        // Watch where the data lives: events for a symlinked file are
        // reported under its target's directory.
        let path = match tokio::fs::canonicalize(path.as_ref()).await {
            Ok(path) => path,
            Err(_) => path.as_ref().to_path_buf(),
        };
        let path = path.as_path();

        // Watch before opening so that nothing appended in between is missed.
        let events = if options.follow {
            Some(FileEvents::new(path, options.watch).map_err(io::Error::other)?)
        } else {
            None
        };
        let path = match &events {
            Some(events) => events.target().to_path_buf(),
            None => path.to_path_buf(),
        };

        let mut file = File::open(&path).await?;
        let meta = file.metadata().await?;
        if !meta.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }

        let pos = match options.location {
            Location::Start => 0,
            Location::FromEnd(back) => meta.len().saturating_sub(back),
        };
        if pos > 0 {
            file.seek(SeekFrom::Start(pos)).await?;
        }

        let ticks = match (&events, options.watch) {
            (Some(_), WatchMode::Poll(period)) => Some(poll_ticks(period)),
            _ => None,
        };

        Ok(Tail {
            path,
            events,
            ticks,
            reader: Some(BufReader::new(file)),
            pos,
            partial: Vec::new(),
            reopen: options.reopen,
            done: false,
        })
    }

    /// Byte offset of the next unread byte.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Waits for the next complete line.
    pub async fn next_line(&mut self) -> Option<io::Result<String>> {
        loop {
            if self.done {
                return None;
            }

            if let Some(reader) = self.reader.as_mut() {
                match reader.read_until(b'\n', &mut self.partial).await {
                    Ok(0) => {}
                    Ok(n) => {
                        self.pos += n as u64;
                        if self.partial.ends_with(b"\n") {
                            return Some(Ok(take_line(&mut self.partial)));
                        }
                        continue;
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }

            let events = match self.events.as_mut() {
                Some(events) => events,
                None => {
                    // Not following: whatever is left is the last line.
                    self.done = true;
                    if self.partial.is_empty() {
                        return None;
                    }
                    return Some(Ok(take_line(&mut self.partial)));
                }
            };

            let wake = match self.ticks.as_mut() {
                Some(ticks) => tokio::select! {
                    next = events.next_event() => Wake::Event(next),
                    _ = ticks.tick() => Wake::Tick,
                },
                None => Wake::Event(events.next_event().await),
            };
            let res = match wake {
                Wake::Event(Some(Ok(event))) => self.handle_event(event.is_create()).await,
                Wake::Event(Some(Err(e))) => Err(e),
                Wake::Event(None) => {
                    self.done = true;
                    return None;
                }
                Wake::Tick => self.handle_event(false).await,
            };
            if let Err(e) = res {
                self.done = true;
                return Some(Err(e));
            }
        }
    }

    /// Resets the reader to the beginning of the file if it was rotated
    /// (recreated, or size < pos), and tracks removal.
    async fn handle_event(&mut self, created: bool) -> io::Result<()> {
        let size = match metadata(&self.path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if !self.reopen {
                    debug!("{} removed, stopping", self.path.display());
                    self.done = true;
                } else if self.reader.take().is_some() {
                    debug!("{} removed, waiting for it to reappear", self.path.display());
                }
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let rotated = size < self.pos || (self.reopen && created);
        if self.reader.is_some() && !rotated {
            return Ok(());
        }

        match new_linereader(&self.path).await {
            Ok(reader) => {
                debug!("reopening {}", self.path.display());
                self.reader = Some(reader);
                self.pos = 0;
                self.partial.clear();
                Ok(())
            }
            // Gone again before it could be opened; wait for the next event.
            Err(e) if e.kind() == io::ErrorKind::NotFound && self.reopen => {
                self.reader = None;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn into_stream(self) -> impl FuturesStream<Item = io::Result<String>> + Send {
        stream::unfold(self, |mut tail| async move {
            tail.next_line().await.map(|line| (line, tail))
        })
    }
}

enum Wake {
    Event(Option<io::Result<FileEvent>>),
    Tick,
}

fn poll_ticks(period: Duration) -> Interval {
    let mut ticks = time::interval(period.max(Duration::from_millis(1)));
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticks
}

fn take_line(buf: &mut Vec<u8>) -> String {
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    let line = String::from_utf8_lossy(buf).into_owned();
    buf.clear();

    line
}

pin_project! {
/// Breaks lines longer than a threshold into consecutive pieces of at most
/// that many bytes, without splitting a character.
pub struct SplitLines<S> {
    #[pin]
    inner: S,
    max_line_size: usize,
    pending: VecDeque<String>,
}
}

impl<S> SplitLines<S> {
    /// A `max_line_size` of `0` passes lines through untouched.
    pub fn new(inner: S, max_line_size: usize) -> Self {
        SplitLines {
            inner,
            max_line_size,
            pending: VecDeque::new(),
        }
    }
}

impl<S> FuturesStream for SplitLines<S>
where
    S: FuturesStream<Item = io::Result<String>>,
{
    type Item = io::Result<String>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> task::Poll<Option<Self::Item>> {
        let this = self.project();

        if let Some(piece) = this.pending.pop_front() {
            return task::Poll::Ready(Some(Ok(piece)));
        }

        let max = *this.max_line_size;
        match ready!(this.inner.poll_next(cx)) {
            Some(Ok(line)) if max > 0 && line.len() > max => {
                this.pending.extend(split_line(&line, max));
                task::Poll::Ready(this.pending.pop_front().map(Ok))
            }
            other => task::Poll::Ready(other),
        }
    }
}

fn split_line(line: &str, max: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut rest = line;

    while rest.len() > max {
        let mut cut = max;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            // A single character wider than `max`
            cut = rest.chars().next().map_or(rest.len(), char::len_utf8);
        }
        let (head, tail) = rest.split_at(cut);
        pieces.push(head.to_string());
        rest = tail;
    }
    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }

    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream::StreamExt;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn not_following(location: Location) -> FollowOptions {
        FollowOptions {
            location,
            follow: false,
            ..FollowOptions::default()
        }
    }

    #[test]
    fn test_split_line() {
        assert_eq!(split_line("abcdefg", 3), vec!["abc", "def", "g"]);
        assert_eq!(split_line("abcdef", 3), vec!["abc", "def"]);
        // 'é' is two bytes and must stay whole
        assert_eq!(split_line("aéb", 2), vec!["a", "é", "b"]);
        assert_eq!(split_line("€", 1), vec!["€"]);
    }

    #[tokio::test]
    async fn test_split_lines_stream() {
        let lines = stream::iter(vec![
            Ok("short".to_string()),
            Ok("a-much-longer-line".to_string()),
            Err(io::Error::new(io::ErrorKind::Other, "boom")),
        ]);

        let mut split = SplitLines::new(lines, 6);
        assert_eq!(split.next().await.unwrap().unwrap(), "short");
        assert_eq!(split.next().await.unwrap().unwrap(), "a-much");
        assert_eq!(split.next().await.unwrap().unwrap(), "-longe");
        assert_eq!(split.next().await.unwrap().unwrap(), "r-line");
        assert!(split.next().await.unwrap().is_err());
        assert!(split.next().await.is_none());
    }

    #[tokio::test]
    async fn test_split_disabled() {
        let long = "x".repeat(1000);
        let split = SplitLines::new(stream::iter(vec![Ok(long.clone())]), 0);

        let lines: Vec<_> = split.map(Result::unwrap).collect().await;
        assert_eq!(lines, vec![long]);
    }

    #[tokio::test]
    async fn test_read_whole_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"one\n\ntwo\nunterminated").unwrap();

        let tail = Tail::open(&path, &not_following(Location::Start)).await.unwrap();
        let lines: Vec<_> = tail.into_stream().map(Result::unwrap).collect().await;

        assert_eq!(lines, vec!["one", "", "two", "unterminated"]);
    }

    #[tokio::test]
    async fn test_seek_from_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"first line\nsecond\nthird\n").unwrap();

        // 24 bytes total, start 9 bytes before the end: inside "second"
        let mut tail = Tail::open(&path, &not_following(Location::FromEnd(9)))
            .await
            .unwrap();
        assert_eq!(tail.position(), 15);
        assert_eq!(tail.next_line().await.unwrap().unwrap(), "nd");
        assert_eq!(tail.next_line().await.unwrap().unwrap(), "third");
        assert!(tail.next_line().await.is_none());
    }

    #[tokio::test]
    async fn test_seek_past_start_is_clamped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        std::fs::write(&path, b"tiny\n").unwrap();

        let tail = Tail::open(&path, &not_following(Location::FromEnd(1000)))
            .await
            .unwrap();
        assert_eq!(tail.position(), 0);
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing.log");

        assert!(Tail::open(&path, &FollowOptions::default()).await.is_err());
        assert!(Tail::open(&path, &not_following(Location::Start)).await.is_err());
    }

    #[tokio::test]
    async fn test_open_directory() {
        let dir = tempdir().unwrap();

        let err = Tail::open(dir.path(), &not_following(Location::Start))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
