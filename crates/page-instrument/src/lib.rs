//! In-page instrumentation: the interception source text injected into
//! every new document, and the host-side bridge that receives intercepted
//! events out of the page sandbox and normalizes them into the log store.

pub mod bridge;
pub mod interceptor;

pub use bridge::{Bridge, BridgeError};
pub use interceptor::{BINDING_NAME, INSTRUMENT_SOURCE};
