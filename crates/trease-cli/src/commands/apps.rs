use anyhow::Result;
use clap::Subcommand;
use tabled::{Table, Tabled};
use trease_core::{apps::installed_apps, config::MonitorConfig};

#[derive(Subcommand, Debug)]
pub enum AppsAction {
    /// List installed applications and their identifiers
    List {
        /// Only identifiers containing this text
        #[arg(short, long)]
        filter: Option<String>,
    },
}

#[derive(Tabled)]
struct AppRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Identifier")]
    app_id: String,
}

pub fn handle_apps_command(action: AppsAction) -> Result<()> {
    match action {
        AppsAction::List { filter } => list_apps(filter.as_deref()),
    }
}

fn list_apps(filter: Option<&str>) -> Result<()> {
    let config = MonitorConfig::load_default()?;
    let rows: Vec<AppRow> = installed_apps(&config.application_dirs)?
        .into_iter()
        .filter(|app| filter.is_none_or(|f| app.app_id.contains(f)))
        .map(|app| AppRow {
            name: app.name,
            app_id: app.app_id,
        })
        .collect();

    if rows.is_empty() {
        println!("No applications found");
        return Ok(());
    }
    println!("{}", Table::new(rows));
    Ok(())
}
