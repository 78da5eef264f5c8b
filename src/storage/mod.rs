pub mod dashboard;
pub mod formatting;
pub mod manager;
pub mod providers;
pub mod sheets;

pub use dashboard::{DashboardSummary, DASHBOARD_TAB};
pub use manager::{ConfigStatus, StorageManager};
pub use providers::{GoogleSheetsStorage, StorageBackend};
pub use sheets::{InMemoryConnector, InMemorySheets, SheetsApi, SheetsConnector};
