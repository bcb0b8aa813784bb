pub mod output;
pub mod process;
pub mod report;

use std::{env, ffi::OsString, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use process::{kill_previous_servers, restart_server, serve_args, spawn_server};
use report::{
    process_apps_command, process_devices_command, process_history_command, process_stats_command,
    AppsCommand, DevicesCommand, HistoryCommand, StatsCommand,
};
use tracing::{info, level_filters::LevelFilter};

use crate::{
    config::{SyncSettings, DEFAULT_SYNC_INTERVAL},
    daemon::start_daemon,
    sync::{
        identity::load_or_create_device_id, prune::DEFAULT_RETENTION_DAYS, reconcile::Reconciler,
    },
    utils::{
        clock::DefaultClock,
        dir::{
            create_application_default_path, create_dir, default_shared_file, APPLICATION_NAME,
        },
        logging::{enable_logging, CLI_PREFIX, DAEMON_PREFIX},
    },
};

#[derive(Parser, Debug)]
#[command(name = "keytally", version, long_about = None)]
#[command(about = "Daily keystroke counter synchronized across devices through a shared file", long_about = None)]
struct Args {
    #[command(subcommand)]
    commands: Commands,
    #[arg(long, global = true, help = "Print logs to stdout in addition to the log file")]
    log: bool,
    #[arg(
        long,
        global = true,
        help = "Log level (error, warn, info, debug, trace). Overrides RUST_LOG"
    )]
    log_filter: Option<LevelFilter>,
}

#[derive(Subcommand, Debug)]
#[command(version, about, long_about = None)]
enum Commands {
    #[command(
        about = "Starts a daemon for the application in the background. Use --input with a named pipe, stdin of a detached daemon is empty"
    )]
    Init {
        #[command(flatten)]
        serve: ServeArgs,
    },
    #[command(
        about = "Run a daemon directly in current console, reading keystrokes from stdin or --input"
    )]
    Serve {
        #[command(flatten)]
        serve: ServeArgs,
    },
    #[command(about = "Stop currently running daemons. Pending counts are synced before they exit")]
    Stop {},
    #[command(about = "Show the day total, yesterday, averages and the record day")]
    Stats {
        #[command(flatten)]
        command: StatsCommand,
    },
    #[command(about = "Show daily totals of all devices, newest first")]
    History {
        #[command(flatten)]
        command: HistoryCommand,
    },
    #[command(about = "Show keystrokes per application")]
    Apps {
        #[command(flatten)]
        command: AppsCommand,
    },
    #[command(about = "Show how much every device typed")]
    Devices {
        #[command(flatten)]
        command: DevicesCommand,
    },
    #[command(
        about = "Reset today's count of this device to zero. Other devices keep their counts. Running daemons are restarted"
    )]
    Reset {
        #[command(flatten)]
        location: LocationArgs,
        #[arg(
            long,
            value_parser = clap::value_parser!(u32).range(1..),
            help = "Days of history kept in the shared file. Defaults to what the running daemons use"
        )]
        retention_days: Option<u32>,
    },
}

/// Where the application keeps its files.
#[derive(Debug, Clone, clap::Args)]
pub struct LocationArgs {
    #[arg(
        long,
        env = "KEYTALLY_DIR",
        help = "Application directory. By default tries to save into $XDG_STATE_HOME or $HOME/.local/state"
    )]
    dir: Option<PathBuf>,
    #[arg(
        long,
        env = "KEYTALLY_SHARED_FILE",
        help = "File shared between devices. By default iCloud Drive TypingStats/typing-stats.json if iCloud Drive is present, otherwise inside the application directory"
    )]
    shared_file: Option<PathBuf>,
}

impl LocationArgs {
    pub fn settings(&self) -> Result<SyncSettings> {
        let app_dir = match &self.dir {
            Some(dir) => create_dir(dir.clone())?,
            None => create_application_default_path()?,
        };
        let shared_file = self
            .shared_file
            .clone()
            .unwrap_or_else(|| default_shared_file(&app_dir));
        Ok(SyncSettings::new(app_dir, shared_file))
    }
}

#[derive(Debug, Clone, clap::Args)]
struct ServeArgs {
    #[command(flatten)]
    location: LocationArgs,
    #[arg(long, help = "Read keystrokes from this file or named pipe instead of stdin")]
    input: Option<PathBuf>,
    #[arg(
        long,
        default_value_t = DEFAULT_RETENTION_DAYS,
        value_parser = clap::value_parser!(u32).range(1..),
        help = "Days of history kept in the shared file"
    )]
    retention_days: u32,
    #[arg(
        long,
        default_value_t = DEFAULT_SYNC_INTERVAL.as_secs(),
        value_parser = clap::value_parser!(u64).range(1..),
        help = "Seconds between periodic syncs with the shared file"
    )]
    sync_interval: u64,
}

impl ServeArgs {
    fn settings(&self) -> Result<SyncSettings> {
        let mut settings = self.location.settings()?;
        settings.retention_days = self.retention_days;
        settings.sync_interval = Duration::from_secs(self.sync_interval);
        Ok(settings)
    }
}

pub async fn run_cli() -> Result<()> {
    let Args {
        commands,
        log,
        log_filter,
    } = Args::parse();
    let init_logging = |prefix: &str, settings: &SyncSettings| {
        enable_logging(prefix, &settings.log_dir(), log_filter, log)
    };

    match commands {
        Commands::Init { serve } => {
            let settings = serve.settings()?;
            init_logging(CLI_PREFIX, &settings)?;
            let exe = current_exe()?;
            restart_server(&exe, &serve_args(env::args_os().skip(1), "init"))?;
            println!("Daemon started, sharing through {:?}", settings.shared_file);
            Ok(())
        }
        Commands::Stop {} => {
            let exe = current_exe()?;
            let stopped = kill_previous_servers(&exe)?;
            println!("Stopped {} daemon(s)", stopped.len());
            Ok(())
        }
        Commands::Serve { serve } => {
            let settings = serve.settings()?;
            init_logging(DAEMON_PREFIX, &settings)?;
            start_daemon(settings, serve.input.as_deref()).await
        }
        Commands::Stats { command } => process_stats_command(command).await,
        Commands::History { command } => process_history_command(command).await,
        Commands::Apps { command } => process_apps_command(command).await,
        Commands::Devices { command } => process_devices_command(command).await,
        Commands::Reset {
            location,
            retention_days,
        } => {
            let settings = location.settings()?;
            init_logging(CLI_PREFIX, &settings)?;
            reset_today(settings, retention_days).await
        }
    }
}

/// Daemons keep today's count in memory, so they are stopped (which makes them sync), the reset
/// is applied offline, and they are started again with their original arguments.
async fn reset_today(mut settings: SyncSettings, retention_days: Option<u32>) -> Result<()> {
    let exe = current_exe()?;
    let stopped = kill_previous_servers(&exe)?;
    // The write prunes, so it has to keep at least as much history as the daemons do.
    if let Some(days) = retention_days.or_else(|| daemon_retention(&stopped)) {
        settings.retention_days = days;
    }

    let device_id = load_or_create_device_id(&settings.device_id_path()).await?;
    let mut reconciler = Reconciler::open(&settings, device_id, Box::new(DefaultClock)).await;
    let reset = reconciler.reset_today().await;

    for args in &stopped {
        info!("Restarting daemon with {args:?}");
        spawn_server(&exe, args)?;
    }
    reset?;
    println!("Today's count of this device is now 0");
    Ok(())
}

/// Largest retention among daemons started with the given arguments.
fn daemon_retention(daemons: &[Vec<OsString>]) -> Option<u32> {
    daemons
        .iter()
        .filter_map(|args| {
            let argv =
                std::iter::once(OsString::from(APPLICATION_NAME)).chain(args.iter().cloned());
            match Args::try_parse_from(argv).ok()?.commands {
                Commands::Serve { serve } | Commands::Init { serve } => Some(serve.retention_days),
                _ => None,
            }
        })
        .max()
}

fn current_exe() -> Result<PathBuf> {
    env::current_exe().context("Can't operate without an executable")
}
