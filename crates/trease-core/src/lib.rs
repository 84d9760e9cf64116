pub mod apps;
pub mod clock;
pub mod config;
pub mod controller;
pub mod daemon;
pub mod daemon_control;
pub mod enforcer;
pub mod error;
pub mod events;
pub mod ipc;
pub mod monitor;
pub mod policy;
pub mod session;
pub mod timer;

pub use controller::{SessionController, StatusView};
pub use daemon::Daemon;
pub use daemon_control::DaemonControl;
pub use error::ControlError;
pub use session::{ApplicationId, Session, SessionStatus};
