//! autoft-core: WSJT-X automation logic with no sockets.
//!
//! Wire codecs for the WSJT-X UDP protocol and the console control protocol,
//! the shared session status, console registry, call selection and the
//! per-period transmit decisions. `autoft-server` drives all of it from tokio
//! tasks.

pub mod clients;
pub mod config;
pub mod control;
pub mod exchange;
pub mod geo;
pub mod repo;
pub mod selector;
pub mod sequencer;
pub mod status;
pub mod types;
pub mod wsjtx;

// Re-export commonly used types at crate root
pub use clients::ClientRegistry;
pub use control::{ControlMessage, StatusData};
pub use repo::{MemoryRepository, Repository};
pub use selector::{build_selector, CallSelector};
pub use sequencer::{Action, Sequencer};
pub use status::SessionStatus;
pub use types::*;
pub use wsjtx::{Body, Packet, PacketType};
