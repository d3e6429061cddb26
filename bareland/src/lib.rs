pub mod config;
pub mod output;
pub mod scenario;

pub use config::ScenarioConfig;
pub use output::DirectoryPresenter;
pub use scenario::{BareLandReport, Workspace};
