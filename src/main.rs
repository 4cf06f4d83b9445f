//! komerge: fold duplicate book records in KOReader reading statistics.

mod error;

use crate::error::{ErrorKind, Result};
use clap::{Parser, Subcommand};
use exn::ResultExt;
use komerge_config::Config;
use komerge_counter::{Database, DownloadCounter};
use komerge_session::{Artifacts, ProtectionSet, Service, SessionStore, Sweeper};
use komerge_stats::{Book, StatsDatabase};
use komerge_storage::backend::LocalBackend;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use time::UtcDateTime;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "komerge", version, about)]
struct Args {
    /// Configuration file (default: komerge.toml in the platform config directory)
    #[arg(short, long, global = true, env = "KOMERGE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check that a file is a KOReader statistics database
    Validate { file: PathBuf },
    /// List the books recorded in a statistics database
    Books { file: PathBuf },
    /// Merge duplicate books and write the corrected database
    Merge {
        file: PathBuf,
        /// Book to keep and the books to fold into it, as KEEP:ID[,ID...]
        #[arg(short, long = "group", value_parser = parse_group, required = true)]
        groups: Vec<GroupArg>,
        /// Where to write the corrected database
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Run one cleanup cycle over the artifact directories
    Sweep,
    /// Keep cleaning up artifact directories until interrupted
    Watch,
    /// Print the number of completed downloads
    Downloads,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct GroupArg {
    keep: i64,
    merge: Vec<i64>,
}

fn parse_group(value: &str) -> std::result::Result<GroupArg, String> {
    let (keep, merge) = value.split_once(':').ok_or_else(|| format!("expected KEEP:ID[,ID...], got `{value}`"))?;
    let keep = keep.trim().parse().map_err(|_| format!("invalid book id `{keep}`"))?;
    let merge = merge
        .split(',')
        .map(|id| id.trim().parse().map_err(|_| format!("invalid book id `{id}`")))
        .collect::<std::result::Result<Vec<i64>, _>>()?;
    Ok(GroupArg { keep, merge })
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:?}");
            ExitCode::from(exit_status(&e))
        },
    }
}

async fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Validate { file } => {
            komerge_stats::validate(&file).await.or_raise(|| ErrorKind::Stats)?;
            println!("{}: valid statistics database", file.display());
            Ok(())
        },
        Command::Books { file } => {
            let mut db = StatsDatabase::open_read_only(&file).await.or_raise(|| ErrorKind::Stats)?;
            let books = db.books().await.or_raise(|| ErrorKind::Stats);
            db.close().await.or_raise(|| ErrorKind::Stats)?;
            print_books(&books?);
            Ok(())
        },
        Command::Merge { file, groups, output } => {
            let config = Config::load(args.config.as_deref()).or_raise(|| ErrorKind::Config)?;
            let (service, db) = service(&config).await?;
            let result = merge(&service, &file, &groups, &output).await;
            db.close().await;
            result
        },
        Command::Sweep => {
            let config = Config::load(args.config.as_deref()).or_raise(|| ErrorKind::Config)?;
            let (service, db) = service(&config).await?;
            let sweeper = Sweeper::for_service(&service, config.retention(), config.sweep_interval());
            let report = sweeper.run_cycle(UtcDateTime::now()).await;
            db.close().await;
            println!(
                "removed {} file(s), skipped {} in use, {} failed, {} expired session(s) reaped",
                report.removed, report.protected, report.failed, report.reaped
            );
            Ok(())
        },
        Command::Watch => {
            let config = Config::load(args.config.as_deref()).or_raise(|| ErrorKind::Config)?;
            let (service, db) = service(&config).await?;
            let handle = Sweeper::for_service(&service, config.retention(), config.sweep_interval()).spawn();
            let signal = tokio::signal::ctrl_c().await.or_raise(|| ErrorKind::Signal);
            tracing::info!("shutting down");
            handle.shutdown().await;
            db.close().await;
            signal
        },
        Command::Downloads => {
            let config = Config::load(args.config.as_deref()).or_raise(|| ErrorKind::Config)?;
            let (service, db) = service(&config).await?;
            let count = service.downloads().await.or_raise(|| ErrorKind::Session);
            db.close().await;
            println!("{}", count?);
            Ok(())
        },
    }
}

async fn service(config: &Config) -> Result<(Service, Database)> {
    let artifacts = Artifacts::new(
        LocalBackend::new("uploads", config.uploads_dir()).or_raise(|| ErrorKind::Storage)?,
        LocalBackend::new("processed", config.processed_dir()).or_raise(|| ErrorKind::Storage)?,
    );
    let counter_db = config.counter_db();
    if let Some(parent) = counter_db.parent() {
        tokio::fs::create_dir_all(parent).await.or_raise(|| ErrorKind::Counter)?;
    }
    let db = Database::connect(&counter_db).await.or_raise(|| ErrorKind::Counter)?;
    let store = SessionStore::new(config.session_timeout(), ProtectionSet::new());
    let service = Service::new(store, artifacts, DownloadCounter::new(db.clone()), config.retention());
    Ok((service, db))
}

/// Drive one file through a whole session: upload, stage, commit, download
/// and clean up.
async fn merge(service: &Service, file: &Path, groups: &[GroupArg], output: &Path) -> Result<()> {
    let data = tokio::fs::read(file).await.or_raise(|| ErrorKind::Input(file.to_path_buf()))?;
    let filename = file.file_name().map(|name| name.to_string_lossy().into_owned()).unwrap_or_default();
    let id = service.upload(&filename, &data).await.or_raise(|| ErrorKind::Session)?;

    let result: Result<()> = async {
        for group in groups {
            service.add_group(id, group.keep, &group.merge).await.or_raise(|| ErrorKind::Session)?;
        }
        let commit = service.commit(id).await.or_raise(|| ErrorKind::Session)?;
        for outcome in &commit.merges {
            println!(
                "book {}: absorbed {:?}, {} event(s) moved, total read time {}",
                outcome.keep,
                outcome.absorbed,
                outcome.events,
                format_duration(outcome.total_read_time)
            );
        }
        let download = service.prepare_download(id).await.or_raise(|| ErrorKind::Session)?;
        tokio::fs::copy(download.path(), output).await.or_raise(|| ErrorKind::Output(output.to_path_buf()))?;
        download.finish().await.or_raise(|| ErrorKind::Session)?;
        println!("wrote {}", output.display());
        Ok::<_, crate::error::Error>(())
    }
    .await;

    if let Err(e) = service.cleanup(id).await {
        tracing::warn!(session = %id, error = ?e, "could not clean up session");
    }
    result
}

/// `EX_TEMPFAIL` when running the command again might succeed.
fn exit_status(kind: &ErrorKind) -> u8 {
    match kind.is_retryable() {
        true => 75,
        false => 1,
    }
}

fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{}h{:02}m", seconds / 3600, (seconds % 3600) / 60)
}

fn print_books(books: &[Book]) {
    println!("{:>6}  {:<40}  {:<24}  {:>8}  {:>6}", "ID", "TITLE", "AUTHORS", "READ", "PAGES");
    for book in books {
        let pages = book.total_read_pages.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "{:>6}  {:<40}  {:<24}  {:>8}  {:>6}",
            book.id,
            truncate(&book.title, 40),
            truncate(&book.authors, 24),
            format_duration(book.total_read_time),
            pages
        );
    }
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut short: String = text.chars().take(width.saturating_sub(1)).collect();
    short.push('…');
    short
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("1:2", GroupArg { keep: 1, merge: vec![2] })]
    #[case("10:11,12", GroupArg { keep: 10, merge: vec![11, 12] })]
    #[case(" 3 : 4 , 5 ", GroupArg { keep: 3, merge: vec![4, 5] })]
    fn test_parse_group(#[case] value: &str, #[case] expected: GroupArg) {
        assert_eq!(parse_group(value).unwrap(), expected);
    }

    #[rstest]
    #[case("12")]
    #[case("a:2")]
    #[case("1:")]
    #[case("1:2,,3")]
    fn test_parse_group_rejects(#[case] value: &str) {
        assert!(parse_group(value).is_err());
    }

    #[rstest]
    #[case(ErrorKind::Counter, 75)]
    #[case(ErrorKind::Config, 1)]
    #[case(ErrorKind::Session, 1)]
    fn test_exit_status(#[case] kind: ErrorKind, #[case] expected: u8) {
        assert_eq!(exit_status(&kind), expected);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(0), "0h00m");
        assert_eq!(format_duration(3_725), "1h02m");
        assert_eq!(format_duration(-5), "0h00m");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("Dune", 10), "Dune");
        assert_eq!(truncate("Les Misérables", 5), "Les …");
    }

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }
}
