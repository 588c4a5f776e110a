pub mod history;
pub mod monitor;
pub mod site;
pub mod status;

pub use history::{HistoryEntry, HistoryStatus, normalize_history_limit};
pub use monitor::{Monitor, MonitorStatus, MonitorType, ProbeConfig};
pub use site::{Site, sanitize_sites, validate_identifier};
pub use status::{MonitorOperationFailure, MonitoringSummary, StatusUpdate};
