//! HubGraph - command-line interface
//!
//! Operates on a SQLite database row store and a filesystem blob store,
//! both located through the hub configuration file.

use std::error::Error;
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hubgraph::fork::render_text;
use hubgraph::graph::{BranchName, CommitId, DatabaseRef, FsBlobStore, OwnerName, Signature};
use hubgraph::hub::{Hub, HubConfig, UploadRequest};
use hubgraph::store::SqliteStore;

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Debug, Parser)]
#[command(name = "hubgraph", version, about = "Commit, branch and fork graph for hosted data files")]
struct Cli {
    /// Hub configuration file (TOML)
    #[arg(short, long, global = true, env = "HUBGRAPH_CONFIG")]
    config: Option<PathBuf>,

    /// Override the SQLite row store path
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Override the blob store directory
    #[arg(long, global = true)]
    blobs: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Upload a new version of a database file
    Upload {
        /// owner/name
        db: DatabaseRef,
        /// File to upload
        file: PathBuf,
        #[arg(long)]
        author: String,
        #[arg(long)]
        email: String,
        #[arg(short, long)]
        message: Option<String>,
        #[arg(short, long)]
        branch: Option<BranchName>,
        /// Start a new branch from this commit
        #[arg(long, requires = "branch")]
        from: Option<CommitId>,
        #[arg(long)]
        licence: Option<String>,
        /// Make a newly created database public
        #[arg(long)]
        public: bool,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        source_url: Option<String>,
    },
    /// List the commits of a branch, head first
    History {
        db: DatabaseRef,
        /// Defaults to the database's default branch
        #[arg(short, long)]
        branch: Option<BranchName>,
    },
    /// List branch heads
    Branches { db: DatabaseRef },
    /// Remove the head commit of a branch
    Rollback {
        db: DatabaseRef,
        #[arg(short, long)]
        branch: BranchName,
    },
    /// Fork a database into another owner's account
    Fork { db: DatabaseRef, owner: OwnerName },
    /// Print the fork tree a database belongs to
    ForkTree {
        db: DatabaseRef,
        /// Show private databases owned by this user
        #[arg(long)]
        viewer: Option<OwnerName>,
    },
    /// Change the visibility of a database
    SetPublic {
        db: DatabaseRef,
        #[arg(action = clap::ArgAction::Set)]
        public: bool,
    },
    /// Change the branch uploads go to by default
    SetDefaultBranch { db: DatabaseRef, branch: BranchName },
    /// Mark a database as deleted
    Delete { db: DatabaseRef },
    /// Write the data file of a commit to disk
    Download {
        db: DatabaseRef,
        /// Defaults to the head of the default branch
        #[arg(long)]
        commit: Option<CommitId>,
        #[arg(short, long)]
        out: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging(&config, cli.verbose);

    match run(cli.command, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> CliResult<HubConfig> {
    let mut config = match &cli.config {
        Some(path) => HubConfig::load(path)?,
        None => HubConfig::default(),
    };
    if let Some(path) = &cli.database {
        config.database_path = path.clone();
    }
    if let Some(path) = &cli.blobs {
        config.blob_dir = path.clone();
    }
    Ok(config)
}

fn init_logging(config: &HubConfig, verbose: bool) {
    let default = if verbose { "debug" } else { config.log_filter.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if config.log_json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(command: Command, config: HubConfig) -> CliResult<()> {
    let store = SqliteStore::open(&config.database_path)?;
    let blobs = FsBlobStore::open(&config.blob_dir, config.blob_folder_chars)?;
    let hub = Hub::new(store, blobs, config);

    match command {
        Command::Upload {
            db,
            file,
            author,
            email,
            message,
            branch,
            from,
            licence,
            public,
            description,
            source_url,
        } => {
            let mut request = UploadRequest::new(db, Signature::new(author, email)).public(public);
            if let Some(message) = message {
                request = request.message(message);
            }
            if let Some(branch) = branch {
                request = request.branch(branch);
            }
            if let Some(from) = from {
                request = request.parent(from).create_branch(true);
            }
            if let Some(licence) = licence {
                request = request.licence(licence);
            }
            if let Some(description) = description {
                request = request.description(description);
            }
            if let Some(url) = source_url {
                request = request.source_url(url);
            }

            let mut input = File::open(&file)?;
            let outcome = hub.upload(request, &mut input)?;
            if outcome.created_database {
                println!("Created database on branch {}", outcome.branch);
            }
            println!(
                "{} {} ({} bytes)",
                outcome.commit.id.short(),
                outcome.commit.summary(),
                outcome.size
            );
        }
        Command::History { db, branch } => {
            let branch = match branch {
                Some(branch) => branch,
                None => hub.default_branch(&db)?,
            };
            for commit in hub.history_entries(&db, &branch)? {
                println!(
                    "{} {} {} <{}> {}",
                    commit.id.short(),
                    commit.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    commit.author.name,
                    commit.author.email,
                    commit.summary()
                );
            }
        }
        Command::Branches { db } => {
            let default = hub.default_branch(&db)?;
            for (name, entry) in hub.branches(&db)?.iter() {
                let marker = if *name == default { "*" } else { " " };
                println!(
                    "{} {} {} ({} commits)",
                    marker,
                    name,
                    entry.commit.short(),
                    entry.commit_count
                );
            }
        }
        Command::Rollback { db, branch } => {
            let plan = hub.rollback(&db, &branch)?;
            println!(
                "Removed {}, {} is now at {}",
                plan.removed.short(),
                plan.branch,
                plan.new_head.short()
            );
            if !plan.collects_garbage() {
                let shared: Vec<&str> = plan.shared_with.iter().map(|b| b.as_str()).collect();
                println!("Commit kept, still reachable from {}", shared.join(", "));
            }
        }
        Command::Fork { db, owner } => {
            let forks = hub.fork(&db, &owner)?;
            println!("Forked {} to {}/{} ({} forks)", db, owner, db.name, forks);
        }
        Command::ForkTree { db, viewer } => {
            let rows = hub.render_fork_tree(&db, viewer.as_ref())?;
            print!("{}", render_text(&rows));
        }
        Command::SetPublic { db, public } => {
            hub.set_public(&db, public)?;
        }
        Command::SetDefaultBranch { db, branch } => {
            hub.set_default_branch(&db, &branch)?;
        }
        Command::Delete { db } => {
            hub.mark_deleted(&db)?;
        }
        Command::Download { db, commit, out } => {
            let (entry, bytes) = hub.data_file(&db, commit)?;
            std::fs::write(&out, &bytes)?;
            println!("Wrote {} ({} bytes) to {}", entry.name, entry.size, out.display());
        }
    }
    Ok(())
}
