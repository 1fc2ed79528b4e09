//! # simcase CLI
//!
//! Command-line interface for inspecting simulation cases: time
//! discovery, object-path resolution, header summaries, and file
//! watching.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use simcase_comm::{CommSchedule, SoloComm};
use simcase_config::logging::{init_logging, LogLevel};
use simcase_fileops::{make_handler, FileHandler};
use simcase_ident::{CaseLayout, ObjectId};

#[derive(Parser)]
#[command(name = "simcase")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Case root directory
    #[arg(long, default_value = ".", global = true)]
    root: PathBuf,

    /// Case name under the root
    #[arg(long, default_value = "case", global = true)]
    case: String,

    /// Act as this rank of a decomposed case
    #[arg(long, global = true)]
    processor: Option<usize>,

    /// Number of ranks in the decomposition
    #[arg(long, default_value = "1", global = true)]
    n_procs: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the case's time directories in resolution order
    Times,

    /// Resolve an object path and print the winning file and how it
    /// was found
    Resolve {
        /// Object as instance/local.../name, e.g. system/controlDict
        object: String,

        /// Do not fall back to the undecomposed case directory
        #[arg(long)]
        no_global: bool,

        /// Also read and print the stored header
        #[arg(long)]
        header: bool,
    },

    /// Summarize object headers found in one time directory
    Classes {
        /// Time directory name, e.g. constant or 0.1
        time: String,
    },

    /// Watch files and report modification states
    Watch {
        /// Files to watch
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "1000")]
        interval_ms: u64,

        /// Number of polls before exiting (0 = forever)
        #[arg(long, default_value = "0")]
        count: u64,
    },
}

fn main() -> Result<()> {
    init_logging(LogLevel::Warn);

    let cli = Cli::parse();

    let mut layout = CaseLayout::new(&cli.root, &cli.case);
    if let Some(rank) = cli.processor {
        layout = layout.with_processor(rank, cli.n_procs);
    }

    let handler = make_handler(&simcase_config::config().io.file_handler)?;

    match cli.command {
        Commands::Times => cmd_times(&*handler, &layout),
        Commands::Resolve {
            object,
            no_global,
            header,
        } => cmd_resolve(&*handler, &layout, &object, !no_global, header),
        Commands::Classes { time } => cmd_classes(&*handler, &layout, &time),
        Commands::Watch {
            files,
            interval_ms,
            count,
        } => cmd_watch(&*handler, &files, interval_ms, count),
    }
}

fn cmd_times(handler: &dyn FileHandler, layout: &CaseLayout) -> Result<()> {
    let times = handler.find_times(layout);
    if times.is_empty() {
        bail!("no time directories under {}", layout.case_path().display());
    }
    for time in times {
        println!("{time}");
    }
    Ok(())
}

fn cmd_resolve(
    handler: &dyn FileHandler,
    layout: &CaseLayout,
    object: &str,
    check_global: bool,
    header: bool,
) -> Result<()> {
    let io = ObjectId::from_path(object).context("invalid object path")?;

    let Some(resolved) = handler.file_path(check_global, layout, &io) else {
        bail!(
            "'{}' not found (tried {})",
            io.name(),
            io.object_path(layout).display()
        );
    };
    println!("{}  [{:?}]", resolved.path.display(), resolved.kind);

    if header {
        let hdr = handler
            .read_header(&resolved.path)
            .with_context(|| format!("reading header of {}", resolved.path.display()))?;
        println!("{}", serde_json::to_string_pretty(&hdr)?);
    }
    Ok(())
}

fn cmd_classes(handler: &dyn FileHandler, layout: &CaseLayout, time: &str) -> Result<()> {
    let dir = layout.case_path().join(time);
    let entries = std::fs::read_dir(&dir)
        .with_context(|| format!("reading time directory {}", dir.display()))?;

    let mut by_class: std::collections::BTreeMap<String, Vec<String>> = Default::default();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match handler.read_header(&path) {
            Ok(hdr) => by_class.entry(hdr.class).or_default().push(name),
            Err(err) => tracing::warn!(file = %path.display(), %err, "skipping unreadable header"),
        }
    }

    if by_class.is_empty() {
        bail!("no readable object headers in {}", dir.display());
    }
    for (class, mut names) in by_class {
        names.sort_unstable();
        println!("{class}: {}", names.join(" "));
    }
    Ok(())
}

fn cmd_watch(
    handler: &dyn FileHandler,
    files: &[PathBuf],
    interval_ms: u64,
    count: u64,
) -> Result<()> {
    let comm = SoloComm;
    let sched =
        CommSchedule::for_size_with_threshold(1, simcase_config::config().comm.linear_threshold);

    let mut handles = Vec::with_capacity(files.len());
    for file in files {
        let handle = handler
            .add_watch(file)
            .with_context(|| format!("watching {}", file.display()))?;
        handles.push((handle, file.clone()));
    }

    let mut polls = 0u64;
    loop {
        handler.update_states(false, &comm, &sched)?;
        for (handle, file) in &handles {
            let state = handler.watch_state(*handle)?;
            println!("{}: {state:?}", file.display());
            if state == simcase_fileops::FileState::Modified {
                handler.set_unmodified(*handle)?;
            }
        }
        polls += 1;
        if count != 0 && polls >= count {
            return Ok(());
        }
        std::thread::sleep(Duration::from_millis(interval_ms));
    }
}
