//! procbus - inter-process message bus for embedded device processes
//!
//! A fixed set of cooperating processes (control, hardware abstraction,
//! media, key-value store and UI) exchange messages through a local
//! publish/subscribe proxy. Messages carry a two-part topic
//! (`<head>/<method>`) and opaque payload bytes.
//!
//! ## Architecture
//! ```text
//! [PubEndpoint] --front--> [BusProxy] --back--> [SubEndpoint] --> handler
//!                                                                   |
//!                                                                   v
//!                                               [BoundedMessageQueue / ring]
//!                                                                   |
//!                                                                   v
//!                                                             worker thread
//! ```

pub mod bus;
pub mod config;
pub mod process;
pub mod queue;
pub mod retention;
pub mod transport;
pub mod utils;
