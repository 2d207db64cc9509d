use std::io::Write;
use std::time::Duration;

use futures_util::stream::StreamExt;
use logcast::{FollowOptions, Follower, Location, Tail, TailFollower};
use tempfile::tempdir;
use tokio::time;

const TIMEOUT_2_SEC: Duration = Duration::from_millis(2000);

fn append(path: &std::path::Path, bytes: &[u8]) {
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(bytes).unwrap();
    file.sync_all().unwrap();
}

#[tokio::test]
pub async fn test_newline() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("foo.log");
    std::fs::write(&logfile, b"foo").unwrap();

    let mut tail = Tail::open(&logfile, &FollowOptions::default()).await.unwrap();

    // Nothing until the line is terminated
    assert!(time::timeout(Duration::from_millis(200), tail.next_line())
        .await
        .is_err());

    append(&logfile, b" bar\n");

    let line = time::timeout(TIMEOUT_2_SEC, tail.next_line())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(line, "foo bar");
}

#[tokio::test]
pub async fn test_appended_lines_in_order() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("foo.log");
    std::fs::write(&logfile, b"old\n").unwrap();

    let options = FollowOptions {
        location: Location::FromEnd(0),
        ..FollowOptions::default()
    };
    let mut lines = TailFollower.follow(&logfile, options).await.unwrap();

    append(&logfile, b"L1\nL2\n");
    append(&logfile, b"L3\n");

    let line_vals = time::timeout(TIMEOUT_2_SEC, (&mut lines).take(3).collect::<Vec<_>>())
        .await
        .unwrap()
        .into_iter()
        .map(Result::unwrap)
        .collect::<Vec<_>>();
    assert_eq!(line_vals, vec!["L1", "L2", "L3"]);
}

#[tokio::test]
pub async fn test_long_lines_split() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("foo.log");
    std::fs::write(&logfile, b"").unwrap();

    let options = FollowOptions {
        max_line_size: 4,
        ..FollowOptions::default()
    };
    let mut lines = TailFollower.follow(&logfile, options).await.unwrap();

    append(&logfile, b"abcdefghij\nok\n");

    let line_vals = time::timeout(TIMEOUT_2_SEC, (&mut lines).take(4).collect::<Vec<_>>())
        .await
        .unwrap()
        .into_iter()
        .map(Result::unwrap)
        .collect::<Vec<_>>();
    assert_eq!(line_vals, vec!["abcd", "efgh", "ij", "ok"]);
}

#[tokio::test]
pub async fn test_polling_wakes_on_append() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("foo.log");
    std::fs::write(&logfile, b"").unwrap();

    let options = FollowOptions {
        watch: logcast::WatchMode::Poll(Duration::from_millis(50)),
        ..FollowOptions::default()
    };
    let mut lines = TailFollower.follow(&logfile, options).await.unwrap();

    // Each append lands while the tail is parked at EOF, several within the
    // same second, so a change in mtime alone cannot be what wakes it.
    for round in 0..5 {
        let mut next = lines.next();
        assert!(time::timeout(Duration::from_millis(300), &mut next)
            .await
            .is_err());

        append(&logfile, format!("line{}\n", round).as_bytes());

        let line = time::timeout(TIMEOUT_2_SEC, next)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(line, format!("line{}", round));
    }
}
