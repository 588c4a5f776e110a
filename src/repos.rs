pub mod history;
pub mod mapper;
pub mod monitor;
pub mod settings;
pub mod site;

pub use history::HistoryRepository;
pub use monitor::MonitorRepository;
pub use settings::SettingsRepository;
pub use site::SiteRepository;
