mod app;
mod cli;

use tracing_subscriber::EnvFilter;

fn main() {
    init_logging();
    if let Err(err) = run() {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}

/// Logs go to stderr so stdout stays machine-readable JSON.
fn init_logging() {
    let filter = EnvFilter::try_from_env("DASHSTORE_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn print_json(value: &impl serde::Serialize) -> Result<(), app::AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run() -> Result<(), app::AppError> {
    use app::{ListOptions, SaveOptions};
    use clap::Parser;
    use cli::Commands;

    let cli = cli::Cli::parse();
    let app = app::App::open(cli.config.as_deref(), cli.db, cli.org, cli.user)?;

    match cli.command {
        Commands::Init => print_json(&app.init_report()?)?,
        Commands::Save(args) => {
            let options = SaveOptions {
                folder_uid: args.folder,
                as_folder: args.as_folder,
                overwrite: args.overwrite,
                message: args.message,
                plugin_id: args.plugin,
                sync_alerts: args.sync_alerts,
            };
            print_json(&app.save(&args.file, &options)?)?;
        }
        Commands::Provision(args) => {
            let record = app.provision(&args.file, &args.source, args.folder, args.sync_alerts)?;
            print_json(&record)?;
        }
        Commands::Show(args) => print_json(&app.show(args.uid.as_deref(), args.id)?)?,
        Commands::Ls(args) => {
            let options = ListOptions {
                tags: args.tags,
                title: args.title,
                kind: args.kind,
                folders: args.folders,
                limit: args.limit,
                page: args.page,
                descending: args.desc,
            };
            print_json(&app.list(&options)?)?;
        }
        Commands::Rm(args) => {
            app.delete(&args.uid)?;
            print_json(&serde_json::json!({ "deleted": args.uid }))?;
        }
        Commands::History(args) => print_json(&app.history(&args.uid, args.limit, args.start)?)?,
        Commands::Restore(args) => print_json(&app.restore(&args.uid, args.version)?)?,
        Commands::Unprovision(args) => print_json(&app.unprovision(&args.uid)?)?,
        Commands::Sweep(args) => print_json(&app.sweep(&args.active)?)?,
        Commands::Tags => print_json(&app.tags()?)?,
        Commands::Count(args) => {
            if args.folders.is_empty() {
                print_json(&app.quota()?)?;
            } else {
                print_json(&app.count_in_folders(&args.folders)?)?;
            }
        }
        Commands::Alerts(args) => print_json(&app.alerts(&args.uid)?)?,
    }
    Ok(())
}
