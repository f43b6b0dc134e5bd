mod actions;
mod automation;
mod error;
mod human;

pub use actions::{perform, upload_resume};
pub use automation::{BrowserLauncher, BrowserSession, LaunchOverrides, PageSession, ViewportSpec};
pub use error::{BrowserError, BrowserResult};
pub use human::HumanMotion;
