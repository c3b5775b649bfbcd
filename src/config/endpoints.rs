//! Static per-process endpoint table.
//!
//! Every device process publishes through the proxy's front URL and
//! subscribes through its back URL. The table maps a process id to the pair
//! of URLs that process dials, for the transport chosen at build time (or
//! overridden in configuration).

use std::fmt;

use serde::Deserialize;

use super::ConfigError;
use crate::bus::topic::heads;
use crate::transport::BusUrl;

/// Proxy front URL on the IPC transport.
pub const IPC_FRONT_URL: &str = "ipc:///tmp/front.ipc";
/// Proxy back URL on the IPC transport.
pub const IPC_BACK_URL: &str = "ipc:///tmp/back.ipc";
/// Address the proxy binds its front socket to on TCP.
pub const TCP_FRONT_BIND_URL: &str = "tcp://0.0.0.0:5533";
/// Address the proxy binds its back socket to on TCP.
pub const TCP_BACK_BIND_URL: &str = "tcp://0.0.0.0:5534";
/// Address local processes dial for the front socket on TCP.
pub const TCP_FRONT_DIAL_URL: &str = "tcp://127.0.0.1:5533";
/// Address local processes dial for the back socket on TCP.
pub const TCP_BACK_DIAL_URL: &str = "tcp://127.0.0.1:5534";

/// Transport used between processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ipc,
    Tcp,
}

impl Default for TransportKind {
    /// `tcp` when built with the `tcp` feature, otherwise `ipc`.
    fn default() -> Self {
        if cfg!(feature = "tcp") {
            Self::Tcp
        } else {
            Self::Ipc
        }
    }
}

impl TransportKind {
    /// Front/back URLs the proxy binds.
    pub fn proxy_bind_urls(&self) -> (&'static str, &'static str) {
        match self {
            Self::Ipc => (IPC_FRONT_URL, IPC_BACK_URL),
            Self::Tcp => (TCP_FRONT_BIND_URL, TCP_BACK_BIND_URL),
        }
    }

    /// Front/back URLs endpoints dial.
    pub fn proxy_dial_urls(&self) -> (&'static str, &'static str) {
        match self {
            Self::Ipc => (IPC_FRONT_URL, IPC_BACK_URL),
            Self::Tcp => (TCP_FRONT_DIAL_URL, TCP_BACK_DIAL_URL),
        }
    }
}

/// Device processes sharing the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessId {
    Main = 0,
    Hal = 1,
    Media = 2,
    Kvs = 3,
    Lvgl = 4,
}

impl ProcessId {
    pub const ALL: [ProcessId; 5] = [
        ProcessId::Main,
        ProcessId::Hal,
        ProcessId::Media,
        ProcessId::Kvs,
        ProcessId::Lvgl,
    ];

    /// Topic head this process publishes under.
    pub fn head(&self) -> &'static str {
        match self {
            Self::Main => heads::MAIN,
            Self::Hal => heads::HAL,
            Self::Media => heads::MEDIA,
            Self::Kvs => heads::KVS,
            Self::Lvgl => heads::LVGL,
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }
}

impl TryFrom<u8> for ProcessId {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(ConfigError::UnknownProcess(value))
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.head())
    }
}

/// URLs one process dials.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProcessEndpoints {
    /// Where the publish endpoint connects (proxy front).
    pub pub_url: BusUrl,
    /// Where the subscribe endpoint connects (proxy back).
    pub sub_url: BusUrl,
}

/// Endpoints for every process, indexed by `ProcessId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTable {
    entries: [ProcessEndpoints; 5],
}

impl EndpointTable {
    /// Default table: every process dials the local proxy.
    pub fn for_transport(kind: TransportKind) -> Result<Self, ConfigError> {
        let (front, back) = kind.proxy_dial_urls();
        Self::uniform(front.parse()?, back.parse()?)
    }

    /// Table where every process dials `pub_url` and `sub_url`.
    pub fn uniform(pub_url: BusUrl, sub_url: BusUrl) -> Result<Self, ConfigError> {
        Self::from_entries(vec![
            ProcessEndpoints {
                pub_url,
                sub_url,
            };
            ProcessId::ALL.len()
        ])
    }

    /// Table from explicit entries in process-id order.
    pub fn from_entries(entries: Vec<ProcessEndpoints>) -> Result<Self, ConfigError> {
        let count = entries.len();
        let entries = entries
            .try_into()
            .map_err(|_| ConfigError::EndpointTable(count))?;
        Ok(Self { entries })
    }

    pub fn get(&self, id: ProcessId) -> &ProcessEndpoints {
        &self.entries[id.index()]
    }
}
