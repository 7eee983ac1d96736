use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Args, Parser, Subcommand};

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightGreen.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::BrightMagenta.on_default())
}

#[derive(Debug, Parser)]
#[command(name = "dashstore")]
#[command(bin_name = "dashstore")]
#[command(version)]
#[command(about = "Transactional dashboard and folder store backed by SQLite")]
#[command(styles = cli_styles())]
pub struct Cli {
    #[arg(
        short = 'c',
        long,
        env = "DASHSTORE_CONFIG",
        help = "Path to a TOML configuration file."
    )]
    pub config: Option<PathBuf>,

    #[arg(
        short = 'd',
        long,
        env = "DASHSTORE_DB_PATH",
        help = "Path to the SQLite database; overrides database.path."
    )]
    pub db: Option<String>,

    #[arg(
        short = 'o',
        long,
        default_value_t = 1,
        global = true,
        help = "Organization id."
    )]
    pub org: i64,

    #[arg(
        short = 'u',
        long,
        default_value_t = 0,
        global = true,
        help = "Acting user id; 0 acts as the system."
    )]
    pub user: i64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Create the database and apply migrations.")]
    Init,
    #[command(about = "Create or update a dashboard or folder from a JSON file.")]
    Save(SaveArgs),
    #[command(about = "Save a dashboard on behalf of a provisioning source.")]
    Provision(ProvisionArgs),
    #[command(about = "Show one record by uid or id.")]
    Show(ShowArgs),
    #[command(about = "Search records.")]
    Ls(ListArgs),
    #[command(about = "Delete a record and everything that depends on it.")]
    Rm(UidArgs),
    #[command(about = "List the version history of a record.")]
    History(HistoryArgs),
    #[command(about = "Restore a record to an earlier version.")]
    Restore(RestoreArgs),
    #[command(about = "Detach a record from its provisioning source.")]
    Unprovision(UidArgs),
    #[command(about = "Delete provisioned records whose source is no longer active.")]
    Sweep(SweepArgs),
    #[command(about = "Show the tag cloud of the organization.")]
    Tags,
    #[command(about = "Report dashboard counts for quota or for folders.")]
    Count(CountArgs),
    #[command(about = "List the legacy alerts of a dashboard.")]
    Alerts(UidArgs),
}

#[derive(Debug, Args)]
pub struct SaveArgs {
    #[arg(help = "JSON document with the record payload.")]
    pub file: PathBuf,

    #[arg(short = 'f', long, help = "Parent folder uid; omit for root.")]
    pub folder: Option<String>,

    #[arg(long = "as-folder", help = "Save the record as a folder.")]
    pub as_folder: bool,

    #[arg(long, help = "Overwrite on version or title conflicts.")]
    pub overwrite: bool,

    #[arg(short = 'm', long, default_value = "", help = "Change message.")]
    pub message: String,

    #[arg(long, help = "Owning plugin id.")]
    pub plugin: Option<String>,

    #[arg(long = "sync-alerts", help = "Reconcile panel alerts from the payload.")]
    pub sync_alerts: bool,
}

#[derive(Debug, Args)]
pub struct ProvisionArgs {
    #[arg(help = "JSON document provided by the source.")]
    pub file: PathBuf,

    #[arg(short = 's', long, help = "Provisioning source name.")]
    pub source: String,

    #[arg(short = 'f', long, help = "Parent folder uid; omit for root.")]
    pub folder: Option<String>,

    #[arg(long = "sync-alerts", help = "Reconcile panel alerts from the payload.")]
    pub sync_alerts: bool,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[arg(help = "Record uid.", required_unless_present = "id")]
    pub uid: Option<String>,

    #[arg(long, conflicts_with = "uid", help = "Numeric record id.")]
    pub id: Option<i64>,
}

#[derive(Debug, Args)]
pub struct UidArgs {
    #[arg(help = "Record uid.")]
    pub uid: String,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(short = 't', long = "tag", help = "Require tag (repeatable).")]
    pub tags: Vec<String>,

    #[arg(long, help = "Case-insensitive title substring.")]
    pub title: Option<String>,

    #[arg(long = "type", help = "dash-db or dash-folder.")]
    pub kind: Option<String>,

    #[arg(
        short = 'f',
        long = "folder",
        help = "Parent folder uid (repeatable); an empty value selects root."
    )]
    pub folders: Vec<String>,

    #[arg(long, default_value_t = 0, help = "Page size; 0 uses the configured default.")]
    pub limit: i64,

    #[arg(long, default_value_t = 1, help = "1-based page number.")]
    pub page: i64,

    #[arg(long, help = "Sort titles descending.")]
    pub desc: bool,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    #[arg(help = "Record uid.")]
    pub uid: String,

    #[arg(long, default_value_t = 0, help = "Maximum snapshots; 0 uses the configured default.")]
    pub limit: i64,

    #[arg(long, default_value_t = 0, help = "Snapshots to skip.")]
    pub start: i64,
}

#[derive(Debug, Args)]
pub struct RestoreArgs {
    #[arg(help = "Record uid.")]
    pub uid: String,

    #[arg(help = "Version to restore.")]
    pub version: i64,
}

#[derive(Debug, Args)]
pub struct SweepArgs {
    #[arg(
        short = 'a',
        long = "active",
        value_delimiter = ',',
        help = "Active source names; every other binding is orphaned."
    )]
    pub active: Vec<String>,
}

#[derive(Debug, Args)]
pub struct CountArgs {
    #[arg(
        short = 'f',
        long = "folder",
        help = "Count dashboards in these folders instead of reporting quota usage."
    )]
    pub folders: Vec<String>,
}
