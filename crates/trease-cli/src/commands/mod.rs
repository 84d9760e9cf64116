pub mod apps;
pub mod config;
pub mod daemon;
pub mod focus;
pub mod helpers;
pub mod history;
