//! Playback reports from the host media app.
//!
//! The host connects to a localhost socket and writes one JSON object per
//! line. Decoded events are forwarded over an mpsc channel to whoever
//! drives the mirror. Malformed lines are logged and skipped; disconnects
//! are normal and the listener keeps accepting.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use watch_presence_core::{MediaRef, SeriesKey};

/// One line on the wire, tagged by `event`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlaybackEvent {
    PlaybackStarted {
        item_id: String,
        series_id: String,
        series_title: String,
        #[serde(default)]
        episode: Option<u32>,
    },
    PlaybackEnded,
}

impl PlaybackEvent {
    /// The media reference carried by a start report, if any.
    pub fn media_ref(&self) -> Option<MediaRef> {
        match self {
            PlaybackEvent::PlaybackStarted {
                item_id,
                series_id,
                series_title,
                ..
            } => Some(MediaRef {
                item_id: item_id.clone(),
                series: SeriesKey {
                    id: series_id.clone(),
                    title: series_title.clone(),
                },
            }),
            PlaybackEvent::PlaybackEnded => None,
        }
    }
}

/// Bind the listener and forward events until the receiving side goes away.
pub async fn listen(addr: &str, tx: mpsc::Sender<PlaybackEvent>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind playback listener on {addr}"))?;
    info!(%addr, "listening for playback reports");
    accept_loop(listener, tx).await
}

/// Accept host connections on an already-bound listener.
pub async fn accept_loop(listener: TcpListener, tx: mpsc::Sender<PlaybackEvent>) -> Result<()> {
    loop {
        let (stream, peer) = listener
            .accept()
            .await
            .context("playback listener accept failed")?;
        debug!(%peer, "host connected");

        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(err) = serve_connection(stream, tx).await {
                debug!(error = %err, "playback connection closed");
            }
        });
    }
}

async fn serve_connection(stream: TcpStream, tx: mpsc::Sender<PlaybackEvent>) -> Result<()> {
    let mut lines = BufReader::new(stream).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<PlaybackEvent>(line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Err(err) => warn!(error = %err, "ignoring malformed playback report"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{accept_loop, PlaybackEvent};
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    #[test]
    fn decodes_start_report_with_episode() {
        let event: PlaybackEvent = serde_json::from_str(
            r#"{"event":"playback_started","item_id":"ep-5","series_id":"srs-1","series_title":"Cowboy Bebop","episode":5}"#,
        )
        .unwrap();

        let media = event.media_ref().unwrap();
        assert_eq!(media.item_id, "ep-5");
        assert_eq!(media.series.title, "Cowboy Bebop");
        match event {
            PlaybackEvent::PlaybackStarted { episode, .. } => assert_eq!(episode, Some(5)),
            PlaybackEvent::PlaybackEnded => panic!("wrong variant"),
        }
    }

    #[test]
    fn episode_is_optional() {
        let event: PlaybackEvent = serde_json::from_str(
            r#"{"event":"playback_started","item_id":"m-1","series_id":"srs-2","series_title":"Mushishi"}"#,
        )
        .unwrap();

        match event {
            PlaybackEvent::PlaybackStarted { episode, .. } => assert_eq!(episode, None),
            PlaybackEvent::PlaybackEnded => panic!("wrong variant"),
        }
    }

    #[test]
    fn decodes_end_report() {
        let event: PlaybackEvent = serde_json::from_str(r#"{"event":"playback_ended"}"#).unwrap();
        assert_eq!(event, PlaybackEvent::PlaybackEnded);
        assert!(event.media_ref().is_none());
    }

    #[tokio::test]
    async fn forwards_events_and_skips_malformed_lines() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel(16);
        tokio::spawn(accept_loop(listener, tx));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(
                concat!(
                    r#"{"event":"playback_started","item_id":"ep-1","series_id":"srs-1","series_title":"Mushishi","episode":1}"#,
                    "\n",
                    "this is not json\n",
                    r#"{"event":"playback_ended"}"#,
                    "\n",
                )
                .as_bytes(),
            )
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, PlaybackEvent::PlaybackStarted { .. }));
        let second = rx.recv().await.unwrap();
        assert_eq!(second, PlaybackEvent::PlaybackEnded);
    }
}
