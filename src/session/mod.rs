//! Session lifecycle: connection state machine, lease policy, model
//! bookkeeping and the controller actor tying them together.

pub mod lease;
pub mod manager;
pub mod models;
pub mod state;

pub use lease::LeaseExtensionPolicy;
pub use manager::{SessionController, SessionEvent, SessionSnapshot};
pub use models::{LoadedModel, ModelLoader, SlotId};
pub use state::{ConnectionState, ConnectionStateTracker};
