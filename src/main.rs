use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use jvman_lib::core::state::SwitchStatus;
use jvman_lib::{JdkSwitcher, JvmanResult};

#[derive(Parser)]
#[command(name = "jvman")]
#[command(about = "Switch the active JDK through one stable link", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List registered installations
    List,
    /// Show the active installation
    Current,
    /// Register a JDK already on disk
    Add { path: PathBuf },
    /// Register a JDK unpacked by a downloader
    Register {
        #[arg(long)]
        vendor: String,
        #[arg(long)]
        version: String,
        path: PathBuf,
    },
    /// Forget an installation (files are kept)
    Remove { id: String },
    /// Make an installation the active one
    Use { id: String },
    /// Re-apply environment variables for the active installation
    Sync {
        /// Only show what would change
        #[arg(long)]
        preview: bool,
    },
    /// Report link and environment consistency
    Status,
    /// List environment backups, newest first
    Backups,
    /// Take a pinned manual backup
    Backup,
    /// Restore environment variables from a backup
    Restore { id: String },
    /// Delete a backup, pinned or not
    DeleteBackup { id: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    jvman_lib::init_tracing();
    let cli = Cli::parse();

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> JvmanResult<()> {
    let switcher = JdkSwitcher::open_default()?;

    match command {
        Commands::List => {
            let current = switcher.get_current().await.map(|i| i.id);
            for inst in switcher.list_installations().await {
                let marker = if current.as_deref() == Some(inst.id.as_str()) { "*" } else { " " };
                println!(
                    "{} {:<32} {:<10} {:<12} {:<10} {}",
                    marker,
                    inst.id,
                    inst.vendor,
                    inst.version,
                    inst.origin,
                    inst.home_path.display()
                );
            }
        }
        Commands::Current => match switcher.get_current().await {
            Some(inst) => println!("{} ({})", inst.id, inst.home_path.display()),
            None => println!("no active installation"),
        },
        Commands::Add { path } => {
            let inst = switcher.add_local_jdk(path).await?;
            println!("registered {}", inst.id);
        }
        Commands::Register {
            vendor,
            version,
            path,
        } => {
            let inst = switcher.register_downloaded(vendor, version, path).await?;
            println!("registered {}", inst.id);
        }
        Commands::Remove { id } => {
            switcher.remove_installation(&id).await?;
            println!("removed {id}");
        }
        Commands::Use { id } => {
            let report = switcher.switch_version(&id).await?;
            println!(
                "now using {} (previous environment saved as {})",
                report.installation_id, report.snapshot_id
            );
        }
        Commands::Sync { preview: true } => {
            for change in switcher.preview_env_diff().await? {
                let tag = if change.is_change() { "~" } else { "=" };
                println!(
                    "{} {}: {} -> {}",
                    tag,
                    change.name,
                    change.old_value.as_deref().unwrap_or("<unset>"),
                    change.new_value.as_deref().unwrap_or("<unset>")
                );
            }
        }
        Commands::Sync { preview: false } => match switcher.sync_env().await? {
            Some(snapshot_id) => println!("environment synced (backup {snapshot_id})"),
            None => println!("no active installation, nothing to sync"),
        },
        Commands::Status => {
            println!("link: {}", switcher.link_path().await.display());
            match switcher.get_current().await {
                Some(inst) => println!("current: {}", inst.id),
                None => println!("current: none"),
            }
            match switcher.switch_status().await {
                SwitchStatus::Consistent => println!("environment: in sync"),
                SwitchStatus::LinkSwitchedEnvStale { installation_id } => println!(
                    "environment: stale after switching to {installation_id}; run `jvman sync`"
                ),
            }
            if let Some(issue) = switcher.consistency_issue().await {
                println!("warning: {issue}");
            }
        }
        Commands::Backups => {
            for entry in switcher.list_backups().await {
                println!(
                    "{} {} {:?}{} {}",
                    entry.id,
                    entry.snapshot.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    entry.trigger,
                    if entry.pinned { " (pinned)" } else { "" },
                    entry.snapshot.scope
                );
            }
        }
        Commands::Backup => {
            let entry = switcher.create_backup().await?;
            println!("created backup {}", entry.id);
        }
        Commands::Restore { id } => {
            switcher.restore_backup(&id).await?;
            println!("restored backup {id}");
        }
        Commands::DeleteBackup { id } => {
            switcher.delete_backup(&id).await?;
            println!("deleted backup {id}");
        }
    }

    Ok(())
}
