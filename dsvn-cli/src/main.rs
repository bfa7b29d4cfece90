//! dsvn — working-copy client for DSvn repositories.
//!
//! Supports:
//! - Creating and importing into local repositories
//! - Checkout, update and switch with sticky depth
//! - Export from repositories and working copies
//! - Relocating working copies after a repository move
//!
//! # Usage
//!
//! ```bash
//! # Create a repository and import a tree into it
//! dsvn create /srv/repo
//! dsvn import ./project file:///srv/repo --prefix trunk -m "Initial import"
//!
//! # Check out and keep up to date
//! dsvn checkout file:///srv/repo/trunk wc
//! dsvn update wc -r HEAD --set-depth infinity
//!
//! # Move to a branch, export a tag
//! dsvn switch file:///srv/repo/branches/b wc
//! dsvn export file:///srv/repo/tags/1.0@42 out --native-eol CRLF
//!
//! # Follow a repository to its new home
//! dsvn relocate file:///srv/repo file:///mnt/repo wc
//! ```
//!
//! Client options are read from the JSON file named by `DSVN_CONFIG`.

mod output;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use dsvn_client::{
    ClientOptions, RevisionSpec, SessionPool, Target, TargetOutcome, UpdateClient, WorkingCopy,
};
use dsvn_ra::{Depth, RepoUrl};
use dsvn_repos::{FsRepository, LocalSessionFactory};
use output::PrintHandler;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "dsvn")]
#[command(author = "DSvn Contributors")]
#[command(version = "0.1.0")]
#[command(about = "DSvn working-copy client")]
struct Cli {
    /// Print nothing but errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create an empty repository
    Create {
        /// Repository directory
        path: PathBuf,
    },

    /// Commit an unversioned tree into a repository
    Import {
        /// Directory to import
        dir: PathBuf,
        /// Repository URL (file://)
        url: RepoUrl,
        /// Path inside the repository to import under
        #[arg(long, default_value = "")]
        prefix: String,
        /// Log message
        #[arg(short, long, default_value = "Import")]
        message: String,
        /// Commit author
        #[arg(long, default_value = "dsvn")]
        author: String,
    },

    /// Check out a working copy
    #[command(alias = "co")]
    Checkout {
        /// Repository URL, optionally with @PEG
        url: String,
        /// Destination directory (default: last URL segment)
        path: Option<PathBuf>,
        /// Revision; defaults to the peg revision
        #[arg(short, long)]
        revision: Option<RevisionSpec>,
        #[arg(long, default_value = "infinity")]
        depth: Depth,
        /// Keep unversioned obstructions in place
        #[arg(long)]
        force: bool,
        #[arg(long)]
        ignore_externals: bool,
    },

    /// Bring working copies up to date
    #[command(alias = "up")]
    Update {
        /// Working copy paths
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,
        #[arg(short, long, default_value = "HEAD")]
        revision: RevisionSpec,
        /// Depth for this update only
        #[arg(long, conflicts_with = "set_depth")]
        depth: Option<Depth>,
        /// Record a new depth on the targets
        #[arg(long)]
        set_depth: Option<Depth>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        ignore_externals: bool,
    },

    /// Point a working copy at another URL of the same repository
    #[command(alias = "sw")]
    Switch {
        /// Repository URL, optionally with @PEG
        url: String,
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Revision; defaults to the peg revision
        #[arg(short, long)]
        revision: Option<RevisionSpec>,
        #[arg(long, conflicts_with = "set_depth")]
        depth: Option<Depth>,
        #[arg(long)]
        set_depth: Option<Depth>,
        #[arg(long)]
        force: bool,
        #[arg(long)]
        ignore_externals: bool,
    },

    /// Write an unversioned copy of a tree
    Export {
        /// URL or working copy path, optionally with @PEG
        source: String,
        /// Destination (default: last segment of the source)
        path: Option<PathBuf>,
        /// Revision; defaults to HEAD for URLs and WORKING for paths
        #[arg(short, long)]
        revision: Option<RevisionSpec>,
        #[arg(long, default_value = "infinity")]
        depth: Depth,
        /// Line ending for native eol-style files (LF, CR, CRLF)
        #[arg(long)]
        native_eol: Option<String>,
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
        #[arg(long)]
        ignore_externals: bool,
    },

    /// Rewrite the repository root URL of a working copy
    Relocate {
        /// Old URL prefix
        from: RepoUrl,
        /// New URL prefix
        to: RepoUrl,
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Relocate only the path and its immediate children
        #[arg(long)]
        non_recursive: bool,
    },

    /// Show working copy or repository information
    Info {
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("dsvn=info".parse()?),
        )
        .init();

    let cli = Cli::parse();
    let quiet = cli.quiet;

    match cli.command {
        Commands::Create { path } => cmd_create(&path),

        Commands::Import {
            dir,
            url,
            prefix,
            message,
            author,
        } => cmd_import(&dir, &url, &prefix, &message, &author),

        Commands::Checkout {
            url,
            path,
            revision,
            depth,
            force,
            ignore_externals,
        } => {
            let client = client(quiet, ignore_externals)?;
            cmd_checkout(&client, &url, path, revision.unwrap_or(RevisionSpec::Undefined), depth, force)
        }

        Commands::Update {
            paths,
            revision,
            depth,
            set_depth,
            force,
            ignore_externals,
        } => {
            let client = client(quiet, ignore_externals)?;
            let (depth, sticky) = depth_choice(depth, set_depth);
            cmd_update(&client, &paths, revision, depth, sticky, force)
        }

        Commands::Switch {
            url,
            path,
            revision,
            depth,
            set_depth,
            force,
            ignore_externals,
        } => {
            let client = client(quiet, ignore_externals)?;
            let (depth, sticky) = depth_choice(depth, set_depth);
            let revision = revision.unwrap_or(RevisionSpec::Undefined);
            cmd_switch(&client, &url, &path, revision, depth, sticky, force)
        }

        Commands::Export {
            source,
            path,
            revision,
            depth,
            native_eol,
            force,
            ignore_externals,
        } => {
            let client = client(quiet, ignore_externals)?;
            cmd_export(&client, &source, path, revision, depth, native_eol.as_deref(), force)
        }

        Commands::Relocate {
            from,
            to,
            path,
            non_recursive,
        } => {
            let client = client(quiet, false)?;
            client.relocate(&path, &from, &to, !non_recursive)?;
            Ok(())
        }

        Commands::Info { path } => cmd_info(&path),
    }
}

fn load_options() -> Result<ClientOptions> {
    match std::env::var_os("DSVN_CONFIG") {
        Some(path) => {
            tracing::debug!("Loading client options from {:?}", path);
            ClientOptions::load(Path::new(&path))
        }
        None => Ok(ClientOptions::default()),
    }
}

fn client(quiet: bool, ignore_externals: bool) -> Result<UpdateClient> {
    let mut options = load_options()?;
    options.ignore_externals |= ignore_externals;
    let pool = Arc::new(SessionPool::new(Arc::new(LocalSessionFactory::new()), &options));
    let client = UpdateClient::new(pool, options);
    Ok(if quiet {
        client
    } else {
        client.with_event_handler(Arc::new(PrintHandler::new()))
    })
}

/// `--set-depth` is sticky, `--depth` applies to this run only
fn depth_choice(depth: Option<Depth>, set_depth: Option<Depth>) -> (Depth, bool) {
    match (set_depth, depth) {
        (Some(d), _) => (d, true),
        (None, Some(d)) => (d, false),
        (None, None) => (Depth::Unknown, false),
    }
}

/// Split a trailing `@PEG` off a URL or path argument
fn split_peg(arg: &str) -> Result<(&str, RevisionSpec)> {
    match arg.rsplit_once('@') {
        Some((base, peg)) if !base.is_empty() && !peg.contains('/') => {
            let peg = if peg.is_empty() {
                RevisionSpec::Undefined
            } else {
                peg.parse()?
            };
            Ok((base, peg))
        }
        _ => Ok((arg, RevisionSpec::Undefined)),
    }
}

fn is_url(arg: &str) -> bool {
    arg.contains("://")
}

fn default_destination(name: &str) -> Result<PathBuf> {
    let tail = name.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    if tail.is_empty() {
        bail!("Cannot derive a destination from '{}'; name one explicitly", name);
    }
    Ok(PathBuf::from(tail))
}

fn cmd_create(path: &Path) -> Result<()> {
    let repo = FsRepository::create(path)?;
    println!("Created repository at {}", path.display());
    println!("  UUID: {}", repo.uuid());
    Ok(())
}

fn cmd_import(dir: &Path, url: &RepoUrl, prefix: &str, message: &str, author: &str) -> Result<()> {
    if url.scheme() != "file" {
        bail!("Import only supports file:// repositories, got '{}'", url);
    }
    if !dir.is_dir() {
        bail!("'{}' is not a directory", dir.display());
    }
    let repo = FsRepository::open(Path::new(url.path()))
        .with_context(|| format!("Failed to open repository at {}", url))?;
    let mut txn = repo.begin(author, message)?;
    let prefix = prefix.trim_matches('/');
    if !prefix.is_empty() {
        txn.mkdir(prefix)?;
    }
    let count = import_dir(&mut txn, dir, prefix)?;
    let rev = txn.commit()?;
    println!("Imported {} files", count);
    println!("Committed revision {}.", rev);
    Ok(())
}

fn import_dir(txn: &mut dsvn_repos::Transaction<'_>, dir: &Path, prefix: &str) -> Result<usize> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<std::io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());
    let mut count = 0;
    for entry in entries {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name == dsvn_client::ADMIN_DIR {
            continue;
        }
        let repo_path = if prefix.is_empty() {
            name
        } else {
            format!("{}/{}", prefix, name)
        };
        if entry.file_type()?.is_dir() {
            txn.mkdir(&repo_path)?;
            count += import_dir(txn, &entry.path(), &repo_path)?;
        } else {
            txn.put_file(&repo_path, fs::read(entry.path())?)?;
            count += 1;
        }
    }
    Ok(count)
}

fn cmd_checkout(
    client: &UpdateClient,
    url: &str,
    path: Option<PathBuf>,
    revision: RevisionSpec,
    depth: Depth,
    force: bool,
) -> Result<()> {
    let (url, peg) = split_peg(url)?;
    let url = RepoUrl::parse(url)?;
    let dst = match path {
        Some(p) => p,
        None => default_destination(url.path())?,
    };
    let rev = client.checkout(&url, &dst, peg, revision, depth, force)?;
    println!("Checked out revision {}.", rev);
    Ok(())
}

fn cmd_update(
    client: &UpdateClient,
    paths: &[PathBuf],
    revision: RevisionSpec,
    depth: Depth,
    sticky: bool,
    force: bool,
) -> Result<()> {
    let outcomes = client.update_paths(paths, revision, depth, force, sticky)?;
    let mut failed = 0;
    for (path, outcome) in paths.iter().zip(&outcomes) {
        match outcome {
            TargetOutcome::Updated(rev) if *rev >= 0 => {
                println!("Updated '{}' to revision {}.", path.display(), rev)
            }
            TargetOutcome::Updated(_) => println!("Excluded '{}'.", path.display()),
            TargetOutcome::Skipped(e) => {
                eprintln!("dsvn: {}", e);
                failed += 1;
            }
        }
    }
    if failed > 0 {
        return Err(anyhow!("{} of {} targets could not be updated", failed, paths.len()));
    }
    Ok(())
}

fn cmd_switch(
    client: &UpdateClient,
    url: &str,
    path: &Path,
    revision: RevisionSpec,
    depth: Depth,
    sticky: bool,
    force: bool,
) -> Result<()> {
    let (url, peg) = split_peg(url)?;
    let url = RepoUrl::parse(url)?;
    let rev = client.switch(path, &url, peg, revision, depth, force, sticky)?;
    println!("Switched to revision {}.", rev);
    Ok(())
}

fn cmd_export(
    client: &UpdateClient,
    source: &str,
    path: Option<PathBuf>,
    revision: Option<RevisionSpec>,
    depth: Depth,
    native_eol: Option<&str>,
    force: bool,
) -> Result<()> {
    let (source, peg) = split_peg(source)?;
    let target = if is_url(source) {
        Target::Url(RepoUrl::parse(source)?)
    } else {
        Target::Path(PathBuf::from(source))
    };
    let dst = match path {
        Some(p) => p,
        None => match &target {
            Target::Url(url) => default_destination(url.path())?,
            Target::Path(p) => default_destination(&std::path::absolute(p)?.to_string_lossy())?,
        },
    };
    let revision = revision.unwrap_or(RevisionSpec::Undefined);
    let rev = client.export(&target, &dst, peg, revision, native_eol, force, depth)?;
    println!("Exported revision {}.", rev);
    Ok(())
}

fn cmd_info(path: &Path) -> Result<()> {
    if FsRepository::is_repository(path) {
        let repo = FsRepository::open(path)?;
        println!("Repository: {}", path.display());
        println!("UUID:       {}", repo.uuid());
        println!("HEAD:       r{}", repo.youngest()?);
        return Ok(());
    }

    let (wc, rel) = WorkingCopy::open_containing(path)?;
    let entry = wc.require(&rel)?;
    println!("Path:             {}", path.display());
    println!("Working Copy Root: {}", wc.root().display());
    if let Some(url) = &entry.url {
        println!("URL:              {}", url);
    }
    if let Some(root) = &entry.repos_root {
        println!("Repository Root:  {}", root);
    }
    if let Some(uuid) = &entry.uuid {
        println!("Repository UUID:  {}", uuid);
    }
    println!("Revision:         {}", entry.revision);
    println!("Node Kind:        {}", entry.kind);
    println!("Schedule:         {:?}", entry.schedule);
    if entry.is_dir() {
        println!("Depth:            {}", entry.depth);
    }
    if wc.is_switched(&rel) {
        println!("Switched:         yes");
    }
    if let Some(author) = &entry.last_author {
        println!("Last Changed Author: {}", author);
    }
    if entry.committed_rev >= 0 {
        println!("Last Changed Rev: {}", entry.committed_rev);
    }
    if let Some(date) = &entry.committed_date {
        println!("Last Changed Date: {}", date.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if entry.conflicted {
        println!("Conflicted:       yes");
    }
    Ok(())
}
