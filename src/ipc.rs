pub mod broadcast;
pub mod handlers;
pub mod registry;

pub use broadcast::{BroadcastBridge, BroadcastMessage};
pub use handlers::{CoreHandles, EXPECTED_CHANNELS, register_core_handlers};
pub use registry::{IpcErrorPayload, IpcRegistry, IpcResponse, ParamKind, ParamSpec};
