//! Command-line configuration, and the immutable settings handed to every
//! session.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::events::WatchMode;
use crate::reader::{FollowOptions, Location};

#[derive(Clone, Debug, Parser)]
#[command(name = "logcast", version, about = "Tail log files via websocket")]
pub struct Config {
    /// Http listen address
    #[arg(long = "http_addr", default_value = ":8080")]
    pub http_addr: String,

    /// Hostname for page title
    #[arg(long, default_value = "")]
    pub host: String,

    /// Log level [warn|info|debug]
    #[arg(long = "log_level", default_value = "info")]
    pub log_level: String,

    /// Root directory for log files
    #[arg(long, default_value = "log/")]
    pub root: PathBuf,

    /// Tail from the last Nth location
    #[arg(long, default_value_t = 5000)]
    pub back: u64,

    /// Min line size for split
    #[arg(long, default_value_t = 180)]
    pub split: usize,

    /// Use polling, instead of inotify
    #[arg(short = 'p', long)]
    pub poll: bool,
}

impl Config {
    /// The listen address, where a bare `:port` means every interface.
    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        match self.http_addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{}", port).parse(),
            None => self.http_addr.parse(),
        }
    }

    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            root: self.root.clone(),
            hostname: Some(self.host.clone()).filter(|host| !host.is_empty()),
            back: self.back,
            max_line_size: self.split,
            watch: WatchMode::from_poll_flag(self.poll),
        }
    }
}

/// What a session needs to know about the deployment.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Base directory for channel names and inventory scans.
    pub root: PathBuf,
    /// Answer to `?` queries; no answer is sent when absent.
    pub hostname: Option<String>,
    /// Bytes to replay from the end of a file on subscribe; `0` replays it all.
    pub back: u64,
    pub max_line_size: usize,
    pub watch: WatchMode,
}

impl SessionConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        SessionConfig {
            root: root.into(),
            hostname: None,
            back: 0,
            max_line_size: 0,
            watch: WatchMode::Notify,
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into()).filter(|host| !host.is_empty());
        self
    }

    pub fn with_back(mut self, back: u64) -> Self {
        self.back = back;
        self
    }

    pub fn with_max_line_size(mut self, max_line_size: usize) -> Self {
        self.max_line_size = max_line_size;
        self
    }

    pub fn with_watch(mut self, watch: WatchMode) -> Self {
        self.watch = watch;
        self
    }

    /// Options for following a file that starts at `location`.
    pub fn follow_options(&self, location: Location) -> FollowOptions {
        FollowOptions {
            location,
            follow: true,
            reopen: true,
            max_line_size: self.max_line_size,
            watch: self.watch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::parse_from(["logcast"]);

        assert_eq!(config.listen_addr().unwrap(), "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.root, PathBuf::from("log/"));
        assert_eq!(config.back, 5000);
        assert_eq!(config.split, 180);
        assert!(!config.poll);

        let session = config.session();
        assert_eq!(session.hostname, None);
        assert_eq!(session.watch, WatchMode::Notify);
    }

    #[test]
    fn test_flags() {
        let config = Config::parse_from([
            "logcast",
            "--http_addr",
            "127.0.0.1:9000",
            "--host",
            "myhost",
            "--root",
            "/var/log",
            "--back",
            "0",
            "--split",
            "0",
            "-p",
        ]);

        assert_eq!(config.listen_addr().unwrap(), "127.0.0.1:9000".parse::<SocketAddr>().unwrap());

        let session = config.session();
        assert_eq!(session.hostname.as_deref(), Some("myhost"));
        assert_eq!(session.root, PathBuf::from("/var/log"));
        assert_eq!(session.back, 0);
        assert!(matches!(session.watch, WatchMode::Poll(_)));
    }

    #[test]
    fn test_follow_options() {
        let session = SessionConfig::new("/var/log").with_max_line_size(180);
        let options = session.follow_options(Location::FromEnd(1000));

        assert_eq!(options.location, Location::FromEnd(1000));
        assert!(options.follow);
        assert!(options.reopen);
        assert_eq!(options.max_line_size, 180);
    }
}
