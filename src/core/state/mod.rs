pub mod app_state;
pub mod current;
pub mod settings;

pub use app_state::{SwitchReport, SwitcherState};
pub use current::{CurrentState, SwitchStatus};
pub use settings::SwitcherSettings;
