//! Topic registry: the (head, method) pairs an endpoint publishes or
//! subscribes to, and the handler bound to each subscribed topic.
//!
//! Topics are `<head>/<method>` strings. Heads name the originating
//! subsystem, methods name the purpose of the message. The vocabulary the
//! device firmware uses lives in [`heads`] and [`methods`].

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::{BusError, MessageHandler, Result};

/// Longest accepted method name in bytes.
pub const METHOD_MAX_LEN: usize = 31;

/// Longest accepted composed topic in bytes.
pub const TOPIC_MAX_LEN: usize = 127;

/// Topic heads: the subsystem a message comes from or is addressed to.
pub mod heads {
    pub const MAIN: &str = "main";
    pub const HAL: &str = "hal";
    pub const MEDIA: &str = "media";
    pub const KVS: &str = "kvs";
    pub const LVGL: &str = "lvgl";
    pub const HUB: &str = "hub";
    pub const BATTERY_CAM: &str = "batteryCam";
    pub const QUICK_REPLY: &str = "quick_reply";
    pub const WAKEUP_SLEEP: &str = "wakeupSleep";
    // Spelling is part of the wire vocabulary.
    pub const HEARTBEAT: &str = "heatbeat";
    pub const LVGL_BUTTON_TALK: &str = "lvglButtonTalk";

    /// Every head, in the order the tap tool subscribes by default.
    pub const ALL: &[&str] = &[
        MAIN,
        HAL,
        MEDIA,
        KVS,
        LVGL,
        HUB,
        BATTERY_CAM,
        QUICK_REPLY,
        WAKEUP_SLEEP,
        HEARTBEAT,
        LVGL_BUTTON_TALK,
    ];
}

/// Topic methods: what a message is for.
pub mod methods {
    pub const BUTTON: &str = "button";
    pub const BLE: &str = "ble";
    pub const MQTT: &str = "mqtt";
    pub const SDP: &str = "sdp";
    pub const PARAMS: &str = "params";
    pub const CTRL: &str = "ctrl";
    pub const NOTIFY: &str = "notify";
    pub const REPORT: &str = "report";
    pub const STREAM: &str = "stream";
    pub const SYNC: &str = "sync";
    pub const TIME_SYNC: &str = "timeSync";
    pub const LIVE_STREAM: &str = "liveStream";
    pub const CAM_WAKEUP: &str = "wakeup";
    pub const CAM_SYNC_PARAM: &str = "syncParam";
    pub const CAM_REPORT_PARAM: &str = "reportParam";
    pub const KEEP_LIVE: &str = "keepLive";
    pub const KVS_TALK: &str = "kvsTalk";
    pub const KVS_CLOUD_END_TIME: &str = "kvsCloudEndTime";
    pub const RECORD_KEEP_ALIVE: &str = "recordKeepAlive";
    pub const DISPLAY_PARAMS: &str = "displayParams";
    pub const BOOTUP: &str = "bootup";
    pub const POWER_OFF: &str = "poweroff";
    pub const HUB_LOCK_STATE: &str = "hubLockState";
    pub const HUB_LOCK_CONTROL: &str = "hubLockControl";
    pub const HUB_UNLOCK_EVENT: &str = "unlock_event";
    pub const FORMAT: &str = "format";
    pub const HUB_LED_CONTROL: &str = "hubLedContorl";
    pub const EVENT_RECORD_INFO: &str = "eventRecordInfo";
    pub const PLAY_QUICK_REPLY: &str = "play";
    pub const UPDATE_QUICK_REPLY: &str = "update";
    pub const FACTORY_NOTIFY: &str = "factoryNotify";
    pub const STATUS_QUERY: &str = "statusQuery";
    pub const OTA_UPGRADE: &str = "upgrade";
    pub const CONFIGURE_NETWORK: &str = "configure_network";
    pub const CAM_OTA_REPORT: &str = "subOtaReport";
    pub const CAM_OTA_REQ: &str = "subOtaReq";
    pub const DISCONNECT_WEBRTC: &str = "disconnectWebrtc";
    pub const GET_RTSP_CONFIG_REQ: &str = "getRtspConfigReq";
    pub const GET_RTSP_CONFIG_RESP: &str = "getRtspConfigResp";
    pub const HUB_TALK_STATUS: &str = "hubTalkStatus";
}

/// Join head and method into the wire topic.
pub fn compose_topic(head: &str, method: &str) -> String {
    format!("{head}/{method}")
}

/// Check the limits a registered topic must respect.
pub fn validate_topic(head: &str, method: &str) -> Result<()> {
    if head.is_empty() || method.is_empty() {
        return Err(BusError::InvalidTopic(format!(
            "empty head or method in '{head}/{method}'"
        )));
    }
    if head.contains('\0') || method.contains('\0') {
        return Err(BusError::InvalidTopic("topic contains NUL".to_string()));
    }
    // The receive side splits at the first '/', so neither part may hold one.
    if head.contains('/') || method.contains('/') {
        return Err(BusError::InvalidTopic(format!(
            "'/' inside head or method of '{head}/{method}'"
        )));
    }
    if method.len() > METHOD_MAX_LEN {
        return Err(BusError::InvalidTopic(format!(
            "method '{method}' longer than {METHOD_MAX_LEN} bytes"
        )));
    }
    let topic_len = head.len() + 1 + method.len();
    if topic_len > TOPIC_MAX_LEN {
        return Err(BusError::InvalidTopic(format!(
            "topic '{head}/{method}' longer than {TOPIC_MAX_LEN} bytes"
        )));
    }
    Ok(())
}

/// One registered topic.
#[derive(Clone)]
pub struct TopicEntry {
    method: String,
    topic: String,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl TopicEntry {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The composed `<head>/<method>` string.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Handler bound to this topic; publish-side entries have none.
    pub fn handler(&self) -> Option<&Arc<dyn MessageHandler>> {
        self.handler.as_ref()
    }
}

impl fmt::Debug for TopicEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TopicEntry")
            .field("method", &self.method)
            .field("topic", &self.topic)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

#[derive(Default)]
struct Entries {
    entries: Vec<TopicEntry>,
    /// Logical capacity: 0, then doubled (minimum 1) whenever full.
    capacity: usize,
}

/// Ordered set of registered topics, safe to share between the endpoint
/// and its receive task.
///
/// Entries keep insertion order and are never removed; an index returned
/// by [`TopicRegistry::add`] stays valid for the registry's lifetime.
#[derive(Default)]
pub struct TopicRegistry {
    inner: RwLock<Entries>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `head`/`method` and return its index.
    ///
    /// Growth doubles the capacity. If growing fails, nothing is added and
    /// every previously registered entry is kept.
    pub fn add(
        &self,
        head: &str,
        method: &str,
        handler: Option<Arc<dyn MessageHandler>>,
    ) -> Result<usize> {
        validate_topic(head, method)?;

        let mut inner = self.write();
        if inner.entries.len() == inner.capacity {
            let new_capacity = (inner.capacity * 2).max(1);
            let additional = new_capacity - inner.entries.len();
            inner
                .entries
                .try_reserve_exact(additional)
                .map_err(|_| BusError::Allocation("topic registry growth"))?;
            inner.capacity = new_capacity;
            debug!(capacity = new_capacity, "Topic registry grown");
        }

        let index = inner.entries.len();
        inner.entries.push(TopicEntry {
            method: method.to_string(),
            topic: compose_topic(head, method),
            handler,
        });
        Ok(index)
    }

    /// Find the first entry whose method equals `method` and whose composed
    /// topic contains `head` anywhere.
    ///
    /// The head test is a substring test, not equality: with "hubCam/report"
    /// registered first, looking up ("hub", "report") returns that entry even
    /// if "hub/report" is registered too. Pick heads that are not substrings
    /// of one another when they share methods.
    pub fn find_topic_index(&self, head: &str, method: &str) -> Option<usize> {
        self.read()
            .entries
            .iter()
            .position(|entry| entry.method == method && entry.topic.contains(head))
    }

    /// Copy of the entry at `index`.
    pub fn entry(&self, index: usize) -> Option<TopicEntry> {
        self.read().entries.get(index).cloned()
    }

    /// Handler bound to the entry at `index`.
    pub fn handler(&self, index: usize) -> Option<Arc<dyn MessageHandler>> {
        self.read()
            .entries
            .get(index)
            .and_then(|entry| entry.handler.clone())
    }

    /// Composed topics in registration order.
    pub fn topics(&self) -> Vec<String> {
        self.read()
            .entries
            .iter()
            .map(|entry| entry.topic.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.read().capacity
    }
}

impl fmt::Debug for TopicRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("TopicRegistry")
            .field("entries", &inner.entries)
            .field("capacity", &inner.capacity)
            .finish()
    }
}
