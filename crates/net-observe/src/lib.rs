//! Host-side observation of the network side of a browsing session:
//! request host classification, `Set-Cookie` response capture, tracker
//! rule-list matching and websocket traffic recording. Everything here
//! mutates shared accumulation state only during the live browsing phase;
//! the inspector reads it afterwards.

pub mod hosts;
pub mod observer;
pub mod tracker;
pub mod websocket;

pub use hosts::{HostCategory, HostsReport, HostsTable, Party, PartyHosts};
pub use observer::{FrameResolver, NetworkObserver, ObservedRequest, ObservedResponse};
pub use tracker::{RequestDescriptor, RuleList, TrackerMatch, TrackerMatcher};
pub use websocket::{WsConnection, WsMessage, WsRecorder};
