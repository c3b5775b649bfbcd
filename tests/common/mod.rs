//! Shared utilities for integration tests.
//!
//! Runs a real `BusProxy` on IPC sockets in a temp dir or on loopback TCP
//! with OS-assigned ports, and provides endpoints dialed to it.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

pub use procbus::bus::{BusMessage, BusProxy, MessageHandler, PubEndpoint, SubEndpoint};
use procbus::transport::BusUrl;

/// Transport a test bus runs on.
#[derive(Debug, Clone, Copy)]
pub enum Transport {
    Ipc,
    Tcp,
}

/// A running proxy, stopped on drop.
pub struct TestBus {
    _dir: Option<tempfile::TempDir>,
    pub proxy: Arc<BusProxy>,
    pub token: CancellationToken,
    pub front: BusUrl,
    pub back: BusUrl,
}

impl TestBus {
    pub async fn start(transport: Transport) -> Self {
        let (dir, front, back) = match transport {
            Transport::Ipc => {
                let dir = tempfile::tempdir().unwrap();
                let front = BusUrl::Ipc(dir.path().join("front.ipc"));
                let back = BusUrl::Ipc(dir.path().join("back.ipc"));
                (Some(dir), front, back)
            }
            Transport::Tcp => (
                None,
                "tcp://127.0.0.1:0".parse().unwrap(),
                "tcp://127.0.0.1:0".parse().unwrap(),
            ),
        };

        let proxy = Arc::new(BusProxy::bind(&front, &back).await.unwrap());
        let front = proxy.front_url().unwrap();
        let back = proxy.back_url().unwrap();

        let token = CancellationToken::new();
        {
            let proxy = Arc::clone(&proxy);
            let token = token.clone();
            tokio::spawn(async move { proxy.run(token).await });
        }

        Self {
            _dir: dir,
            proxy,
            token,
            front,
            back,
        }
    }

    pub async fn publisher(&self) -> PubEndpoint {
        let mut publisher = PubEndpoint::from_url(self.front.clone());
        publisher.open().unwrap();
        publisher.dial().await.unwrap();
        self.wait_until(|proxy| proxy.publisher_count() >= 1).await;
        publisher
    }

    pub async fn subscriber(&self) -> SubEndpoint {
        let mut sub = SubEndpoint::from_url(self.back.clone());
        sub.open().unwrap();
        sub.dial().await.unwrap();
        sub
    }

    pub async fn wait_for_subscribers(&self, count: usize) {
        self.wait_until(|proxy| proxy.subscriber_count() >= count)
            .await;
    }

    async fn wait_until(&self, ready: impl Fn(&BusProxy) -> bool) {
        for _ in 0..400 {
            if ready(&self.proxy) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("proxy never reached the expected state");
    }
}

impl Drop for TestBus {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Messages seen by a recording handler.
pub type Seen = Arc<Mutex<Vec<(String, Bytes)>>>;

pub fn recorder(seen: &Seen) -> impl MessageHandler + 'static {
    let seen = Arc::clone(seen);
    move |msg: &BusMessage| -> procbus::bus::Result<()> {
        seen.lock()
            .unwrap()
            .push((msg.topic().to_string(), msg.payload().clone()));
        Ok(())
    }
}

pub async fn wait_for_len(seen: &Seen, len: usize) {
    for _ in 0..400 {
        if seen.lock().unwrap().len() >= len {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {len} deliveries, got {}", seen.lock().unwrap().len());
}

/// Give in-flight frames time to arrive before asserting absence.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
