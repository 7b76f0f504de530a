use bup_backup::backup::actions::RunReport;
use bup_backup::backup::config::BackupConfig;
use bup_backup::backup::result_error::error::{Error, ErrorKind};
use bup_backup::backup::result_error::result::Result;
use bup_backup::backup::result_error::AddMsg;
use bup_backup::backup::run::BackupRun;
use bup_backup::backup::services::Services;
use bup_backup::backup::options::OptionResolver;
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::process::exit;
use std::rc::Rc;
use tracing::{error, info, Level};

/// Stage snapshots, encrypted volumes, command output and plain folders into
/// one tree and save it with bup
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Folder holding the common config and the backup table
    #[arg(short, long, default_value = "/etc/bup-backup")]
    config: PathBuf,
    /// Name of the common config file inside the config folder
    #[arg(long, default_value = "common.conf")]
    common: String,
    /// Name of the backup table inside the config folder
    #[arg(short, long, default_value = "backup.table")]
    table: String,
    /// Log what is being done
    #[arg(short, long)]
    verbose: bool,
    /// Only report what would be done
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// Log everything, including option resolution
    #[arg(long)]
    debug: bool,
    /// Validate the configuration and stop
    #[arg(long)]
    check: bool,
    /// Write a JSON report of all actions to this file
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();
    let level = if args.debug {
        Level::TRACE
    } else if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let started_at = Utc::now();
    let mut run = match load(&args) {
        Ok(run) => run,
        Err(e) => fail(e),
    };

    let res = if args.check {
        run.check_config()
    } else {
        run.execute()
    };

    if let Some(path) = &args.report {
        let report = RunReport::new(
            started_at,
            run.context().actions(),
            res.as_ref().err().map(ToString::to_string),
        );
        if let Err(e) = report
            .write_to(path)
            .add_msg(format!("Writing run report to {path:?} failed"))
        {
            error!("{e}");
        }
    }

    match res {
        Ok(()) if args.check => info!("Configuration is valid"),
        Ok(()) => info!("Backup finished"),
        Err(e) => fail(e),
    }
}

fn load(args: &Args) -> Result<BackupRun> {
    let config = BackupConfig::load(&args.config, &args.common, &args.table)
        .add_msg(format!("Loading configuration from {:?} failed", args.config))?;
    let services = Services::system(&OptionResolver::new(Rc::new(config.clone())))?;
    BackupRun::new(config, services, args.dry_run)
}

fn fail(e: Error) -> ! {
    error!("{e}");
    exit(match e.kind() {
        ErrorKind::Configuration => 2,
        ErrorKind::Execution => 1,
    })
}
