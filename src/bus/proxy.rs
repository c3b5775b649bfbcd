//! Bus proxy: the forwarder every endpoint dials.
//!
//! Publish endpoints connect to the front URL, subscribe endpoints to the
//! back URL. Every frame read from any front connection is fanned out to
//! every back connection through a broadcast channel. The proxy never looks
//! inside a frame; topic filtering happens in each subscriber.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{BusError, Result};
use crate::transport::{BusListener, BusUrl, FrameReader, FrameWriter};

/// Frames buffered per subscriber connection before it starts lagging.
pub const FANOUT_CAPACITY: usize = 1024;

/// Counts a connection as attached for as long as the guard lives.
struct Attached(Arc<AtomicUsize>);

impl Attached {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for Attached {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Front/back forwarding device.
pub struct BusProxy {
    front: BusListener,
    back: BusListener,
    sender: broadcast::Sender<Bytes>,
    publishers: Arc<AtomicUsize>,
    subscribers: Arc<AtomicUsize>,
}

impl BusProxy {
    /// Bind the front (publisher) and back (subscriber) URLs.
    pub async fn bind(front: &BusUrl, back: &BusUrl) -> Result<Self> {
        let front_listener = BusListener::bind(front).await.map_err(|e| {
            error!(operation = "bind", url = %front, error = %e, "Proxy bind failed");
            BusError::transport("bind", e)
        })?;
        let back_listener = BusListener::bind(back).await.map_err(|e| {
            error!(operation = "bind", url = %back, error = %e, "Proxy bind failed");
            BusError::transport("bind", e)
        })?;
        let (sender, _) = broadcast::channel(FANOUT_CAPACITY);

        Ok(Self {
            front: front_listener,
            back: back_listener,
            sender,
            publishers: Arc::new(AtomicUsize::new(0)),
            subscribers: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// URL publishers should dial (TCP port 0 resolved).
    pub fn front_url(&self) -> Result<BusUrl> {
        self.front
            .local_url()
            .map_err(|e| BusError::transport("local_addr", e))
    }

    /// URL subscribers should dial (TCP port 0 resolved).
    pub fn back_url(&self) -> Result<BusUrl> {
        self.back
            .local_url()
            .map_err(|e| BusError::transport("local_addr", e))
    }

    /// Publisher connections currently attached.
    pub fn publisher_count(&self) -> usize {
        self.publishers.load(Ordering::SeqCst)
    }

    /// Subscriber connections currently attached.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    /// Accept and forward until `token` is cancelled, then wait for every
    /// connection task to finish.
    pub async fn run(&self, token: CancellationToken) -> Result<()> {
        let mut connections = JoinSet::new();
        info!(
            front = %self.front_url()?,
            back = %self.back_url()?,
            "Bus proxy running"
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                accepted = self.front.accept() => match accepted {
                    Ok((reader, _writer, peer)) => {
                        debug!(peer = %peer, "Publisher attached");
                        let attached = Attached::new(&self.publishers);
                        connections.spawn(pump_publisher(
                            reader,
                            self.sender.clone(),
                            token.child_token(),
                            peer,
                            attached,
                        ));
                    }
                    Err(e) => warn!(operation = "accept", side = "front", error = %e, "Accept failed"),
                },
                accepted = self.back.accept() => match accepted {
                    Ok((reader, writer, peer)) => {
                        debug!(peer = %peer, "Subscriber attached");
                        let attached = Attached::new(&self.subscribers);
                        connections.spawn(pump_subscriber(
                            reader,
                            writer,
                            self.sender.subscribe(),
                            token.child_token(),
                            peer,
                            attached,
                        ));
                    }
                    Err(e) => warn!(operation = "accept", side = "back", error = %e, "Accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        while connections.join_next().await.is_some() {}
        info!("Bus proxy stopped");
        Ok(())
    }
}

/// Read frames from one publisher and broadcast them.
async fn pump_publisher(
    mut reader: FrameReader,
    sender: broadcast::Sender<Bytes>,
    token: CancellationToken,
    peer: String,
    _attached: Attached,
) {
    loop {
        let frame = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            frame = reader.next() => frame,
        };
        match frame {
            Some(Ok(body)) => {
                // No subscribers is not an error; the frame is dropped.
                let receivers = sender.send(body.freeze()).unwrap_or(0);
                trace!(peer = %peer, receivers, "Frame forwarded");
            }
            Some(Err(e)) => {
                warn!(operation = "recv", peer = %peer, error = %e, "Publisher connection failed");
                break;
            }
            None => break,
        }
    }
    debug!(peer = %peer, "Publisher detached");
}

/// Write broadcast frames to one subscriber until it goes away.
async fn pump_subscriber(
    mut reader: FrameReader,
    mut writer: FrameWriter,
    mut receiver: broadcast::Receiver<Bytes>,
    token: CancellationToken,
    peer: String,
    _attached: Attached,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            // Subscribers never send; end of stream means they left.
            inbound = reader.next() => match inbound {
                Some(Ok(_)) => trace!(peer = %peer, "Ignoring frame from subscriber"),
                Some(Err(_)) | None => break,
            },
            body = receiver.recv() => match body {
                Ok(body) => {
                    // A subscriber that stops reading must not hold up shutdown.
                    let sent = tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        sent = writer.send(body) => sent,
                    };
                    if let Err(e) = sent {
                        debug!(peer = %peer, error = %e, "Subscriber write failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(peer = %peer, skipped = n, "Subscriber lagged, skipped frames");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    debug!(peer = %peer, "Subscriber detached");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::connect;
    use std::time::Duration;

    async fn wait_until(mut check: impl FnMut() -> bool) {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn ipc_urls(dir: &tempfile::TempDir) -> (BusUrl, BusUrl) {
        (
            BusUrl::Ipc(dir.path().join("front.ipc")),
            BusUrl::Ipc(dir.path().join("back.ipc")),
        )
    }

    #[tokio::test]
    async fn test_fans_out_to_every_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let (front, back) = ipc_urls(&dir);
        let proxy = Arc::new(BusProxy::bind(&front, &back).await.unwrap());
        let token = CancellationToken::new();
        let running = {
            let proxy = Arc::clone(&proxy);
            let token = token.clone();
            tokio::spawn(async move { proxy.run(token).await })
        };

        let (mut sub_a, _link_a) = connect(&back).await.unwrap();
        let (mut sub_b, _link_b) = connect(&back).await.unwrap();
        wait_until(|| proxy.subscriber_count() == 2).await;

        let (_r, mut publisher) = connect(&front).await.unwrap();
        publisher
            .send(Bytes::from_static(b"hal/button\0press"))
            .await
            .unwrap();

        for sub in [&mut sub_a, &mut sub_b] {
            let frame = sub.next().await.unwrap().unwrap();
            assert_eq!(&frame[..], b"hal/button\0press");
        }

        token.cancel();
        running.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_subscriber_count_drops_on_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let (front, back) = ipc_urls(&dir);
        let proxy = Arc::new(BusProxy::bind(&front, &back).await.unwrap());
        let token = CancellationToken::new();
        let running = {
            let proxy = Arc::clone(&proxy);
            let token = token.clone();
            tokio::spawn(async move { proxy.run(token).await })
        };

        let sub = connect(&back).await.unwrap();
        wait_until(|| proxy.subscriber_count() == 1).await;
        drop(sub);
        wait_until(|| proxy.subscriber_count() == 0).await;

        token.cancel();
        running.await.unwrap().unwrap();
        assert_eq!(proxy.publisher_count(), 0);
    }

    #[tokio::test]
    async fn test_run_returns_with_stalled_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let (front, back) = ipc_urls(&dir);
        let proxy = Arc::new(BusProxy::bind(&front, &back).await.unwrap());
        let token = CancellationToken::new();
        let running = {
            let proxy = Arc::clone(&proxy);
            let token = token.clone();
            tokio::spawn(async move { proxy.run(token).await })
        };

        // Attached but never reads, like a connected endpoint not yet armed.
        let _stalled = connect(&back).await.unwrap();
        wait_until(|| proxy.subscriber_count() == 1).await;

        let (_r, mut publisher) = connect(&front).await.unwrap();
        let mut body = b"media/stream\0".to_vec();
        body.resize(1024 * 1024, 0xab);
        let body = Bytes::from(body);
        for _ in 0..16 {
            publisher.send(body.clone()).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        token.cancel();
        let stopped = tokio::time::timeout(Duration::from_secs(3), running).await;
        assert!(stopped.is_ok(), "run did not return after cancel");
        stopped.unwrap().unwrap().unwrap();
        wait_until(|| proxy.subscriber_count() == 0).await;
    }

    #[tokio::test]
    async fn test_bind_conflict_is_transport_error() {
        let listener = BusListener::bind(&"tcp://127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let taken = listener.local_url().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let back = BusUrl::Ipc(dir.path().join("back.ipc"));

        let err = BusProxy::bind(&taken, &back).await.err().unwrap();
        assert!(matches!(err, BusError::Transport { operation: "bind", .. }));
    }

    #[tokio::test]
    async fn test_tcp_port_zero_urls_resolved() {
        let proxy = BusProxy::bind(
            &"tcp://127.0.0.1:0".parse().unwrap(),
            &"tcp://127.0.0.1:0".parse().unwrap(),
        )
        .await
        .unwrap();
        let front = proxy.front_url().unwrap().to_string();
        let back = proxy.back_url().unwrap().to_string();
        assert_ne!(front, back);
        assert!(!front.ends_with(":0"));
    }
}
