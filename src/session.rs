//! One viewer connection, end to end.
//!
//! A [`Session`] reads requests off its [`Transport`] and answers them until
//! the connection ends. Subscribing to a channel binds a [`FollowSession`]
//! to the connection; while it streams, the transport is still watched so
//! that a disconnect drops the follow immediately instead of waiting for the
//! file to grow.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::stream::StreamExt;
use tokio::fs::metadata;
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::inventory::{self, Inventory};
use crate::protocol::{Message, Request, Response};
use crate::reader::{Follower, LineStream, Location};
use crate::transport::Transport;

/// A live follow of one channel's file.
pub struct FollowSession {
    channel: String,
    path: PathBuf,
    /// Set after a mid-file seek: the first line is a fragment.
    discard_partial: bool,
    lines: LineStream,
}

impl fmt::Debug for FollowSession {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        f.debug_struct("FollowSession")
            .field("channel", &self.channel)
            .field("path", &self.path)
            .field("discard_partial", &self.discard_partial)
            .finish()
    }
}

impl FollowSession {
    pub fn new(
        channel: impl Into<String>,
        path: impl Into<PathBuf>,
        discard_partial: bool,
        lines: LineStream,
    ) -> Self {
        FollowSession {
            channel: channel.into(),
            path: path.into(),
            discard_partial,
            lines,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next line to forward, skipping the fragment left by a
    /// mid-file seek. Cancel-safe.
    pub async fn next_line(&mut self) -> Option<std::io::Result<String>> {
        loop {
            let line = self.lines.next().await?;
            if self.discard_partial && line.is_ok() {
                // 1st line after offset might be incomplete - so skip it
                self.discard_partial = false;
                continue;
            }
            return Some(line);
        }
    }

    fn release(self) {
        info!("Cleanup {}", self.path.display());
        drop(self.lines);
    }
}

/// The connection's single follow slot. Replacing its value releases the
/// previous one first, and whatever is left is released on drop.
#[derive(Debug, Default)]
pub struct FollowSlot(Option<FollowSession>);

impl FollowSlot {
    pub fn replace(&mut self, session: FollowSession) {
        self.release();
        self.0 = Some(session);
    }

    pub fn release(&mut self) {
        if let Some(session) = self.0.take() {
            session.release();
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut FollowSession> {
        self.0.as_mut()
    }

    pub fn is_active(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for FollowSlot {
    fn drop(&mut self) {
        self.release();
    }
}

/// What to do once a subscription stops streaming.
enum Next {
    /// Read the next request off the transport.
    Read,
    /// A request arrived while streaming; handle it next.
    Dispatch(Request),
    /// The peer is gone.
    Close,
}

enum Event {
    Line(Option<std::io::Result<String>>),
    Inbound(Option<Result<Request>>),
}

/// Drives one connection until it ends.
pub struct Session<T> {
    transport: T,
    config: Arc<SessionConfig>,
    follower: Arc<dyn Follower>,
    follow: FollowSlot,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, config: Arc<SessionConfig>, follower: Arc<dyn Follower>) -> Self {
        Session {
            transport,
            config,
            follower,
            follow: FollowSlot::default(),
        }
    }

    /// Serves requests until the peer goes away or something fatal to this
    /// connection happens. `Ok` means an orderly closure.
    ///
    /// Any follow still held is released before returning.
    pub async fn run(mut self) -> Result<()> {
        let res = self.serve().await;
        self.follow.release();
        res
    }

    async fn serve(&mut self) -> Result<()> {
        let mut next = Next::Read;
        loop {
            let request = match next {
                Next::Read => match self.transport.recv().await {
                    Some(Ok(request)) => request,
                    Some(Err(e)) => {
                        info!("read: {}", e);
                        return Err(e);
                    }
                    None => return Ok(()),
                },
                Next::Dispatch(request) => request,
                Next::Close => return Ok(()),
            };

            next = match request {
                Request::Hostname => {
                    self.hostname().await?;
                    Next::Read
                }
                Request::Ping(message) => {
                    self.pong(message).await?;
                    Next::Read
                }
                Request::List => {
                    self.list().await?;
                    Next::Read
                }
                Request::Subscribe(channel) => self.subscribe(channel).await?,
            };
        }
    }

    async fn hostname(&mut self) -> Result<()> {
        debug!("Requested hostname");
        match self.config.hostname.clone() {
            Some(host) => self.send(Response::Hostname(host), "Can't send host").await,
            None => Ok(()),
        }
    }

    async fn pong(&mut self, message: Message) -> Result<()> {
        debug!("Requested ping");
        self.send(Response::Pong(message), "Can't send pong").await
    }

    async fn list(&mut self) -> Result<()> {
        debug!("Requested channel list");
        let inventory = self.inventory()?;
        self.send(Response::List(inventory), "Can't send").await
    }

    async fn subscribe(&mut self, channel: String) -> Result<Next> {
        debug!("Requested channel {}", channel);
        // Only one follow per connection: the previous one goes first.
        self.follow.release();

        let inventory = self.inventory()?;
        let path = match inventory::resolve(&self.config.root, &channel) {
            Some(path) if inventory.contains(&channel) => path,
            _ => {
                let err = Error::UnknownChannel(channel.clone());
                let response = Response::Error {
                    channel,
                    error: err.to_string(),
                };
                self.send(response, "Can't send error").await?;
                return Err(err);
            }
        };

        let (location, discard_partial) = seek(&path, self.config.back).await?;
        let options = self.config.follow_options(location);
        let lines = match self.follower.follow(&path, options).await {
            Ok(lines) => lines,
            Err(e) => {
                warn!("tail start: {}", e);
                return Err(Error::Open(e));
            }
        };

        self.follow
            .replace(FollowSession::new(channel, path, discard_partial, lines));
        self.stream().await
    }

    /// Forwards lines from the active follow until it stops, the peer goes
    /// away, or another subscription replaces it.
    async fn stream(&mut self) -> Result<Next> {
        loop {
            let event = {
                let session = match self.follow.get_mut() {
                    Some(session) => session,
                    None => return Ok(Next::Read),
                };
                let transport = &mut self.transport;

                tokio::select! {
                    line = session.next_line() => Event::Line(line),
                    inbound = transport.recv() => Event::Inbound(inbound),
                }
            };

            match event {
                Event::Line(Some(Ok(text))) => {
                    let channel = match self.follow.get_mut() {
                        Some(session) => session.channel().to_string(),
                        None => return Ok(Next::Read),
                    };
                    debug!("Sending line: {}", text);
                    // A failed send here is the usual way a viewer leaves.
                    let response = Response::Line { channel, text };
                    if let Err(e) = self.transport.send(&response).await {
                        debug!("Can't send line: {}", e);
                        return Err(e);
                    }
                }
                Event::Line(Some(Err(e))) => {
                    warn!("tail run: {}", e);
                    return Err(Error::Follow(e));
                }
                Event::Line(None) => {
                    info!("Stop");
                    self.follow.release();
                    return Ok(Next::Read);
                }
                Event::Inbound(None) => return Ok(Next::Close),
                Event::Inbound(Some(Err(e))) => {
                    info!("read: {}", e);
                    return Err(e);
                }
                Event::Inbound(Some(Ok(request))) => match request {
                    Request::Hostname => self.hostname().await?,
                    Request::Ping(message) => self.pong(message).await?,
                    Request::List => self.list().await?,
                    Request::Subscribe(_) => return Ok(Next::Dispatch(request)),
                },
            }
        }
    }

    fn inventory(&self) -> Result<Inventory> {
        inventory::scan(&self.config.root).map_err(|e| {
            info!("loadlogs: {}", e);
            e
        })
    }

    async fn send(&mut self, response: Response, context: &str) -> Result<()> {
        self.transport.send(&response).await.map_err(|e| {
            info!("{}: {}", context, e);
            e
        })
    }
}

/// Picks the starting point for `path`, and whether the first line read
/// from there is a fragment.
async fn seek(path: &Path, back: u64) -> Result<(Location, bool)> {
    if back == 0 {
        return Ok((Location::Start, false));
    }

    let size = match metadata(path).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            warn!("file stat: {}", e);
            return Err(Error::Stat(e));
        }
    };

    if size > back {
        Ok((Location::FromEnd(back), true))
    } else {
        Ok((Location::Start, false))
    }
}
