//! CLI binary for cube: fetch, pin and build the components of a program.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cube_core::config::{Scope, Settings};
use cube_deploy::error::DeployError;
use cube_deploy::make::MakeCommand;
use cube_deploy::ops;
use cube_deploy::repo::Program;
use cube_deploy::sync::{Action, SyncOptions, SyncReport};
use cube_scm::ScmKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser)]
#[command(name = "cube", version, about = "Component dependency manager")]
struct Cli {
    /// Run as if started in this directory (defaults to current directory)
    #[arg(short = 'C', long = "program", global = true)]
    program: Option<PathBuf>,

    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new program under version control
    New {
        /// Directory to create
        path: PathBuf,

        /// Source control for the program: git or hg
        #[arg(long)]
        scm: Option<ScmKind>,
    },

    /// Clone an existing program and deploy its components
    Import {
        /// Repository URL, optionally with #revision
        url: String,

        /// Destination directory (defaults to the repository name)
        path: Option<PathBuf>,
    },

    /// Add a repository (.lib) or an index component (.codes) and deploy it
    Add {
        /// Repository URL (url[#rev]) or component name
        target: String,

        /// Directory receiving the .lib file (defaults to current directory)
        #[arg(long)]
        path: Option<PathBuf>,

        /// Version requirement for an index component (e.g. "^1.2")
        #[arg(long)]
        req: Option<String>,
    },

    /// Remove a component's references and its checkout
    Remove {
        name: String,

        /// Remove the checkout even with uncommitted changes
        #[arg(long)]
        force: bool,
    },

    /// Bring every checkout in line with the reference files
    Deploy {
        /// Update or remove checkouts even with uncommitted changes
        #[arg(long)]
        force: bool,

        /// Show what would change without touching the tree
        #[arg(long)]
        dry_run: bool,
    },

    /// Update the program checkout, then deploy
    Update {
        /// Revision to update to (defaults to the branch's upstream)
        rev: Option<String>,

        /// Discard uncommitted changes
        #[arg(long)]
        force: bool,

        /// Show what would change without touching the tree
        #[arg(long)]
        dry_run: bool,
    },

    /// Record current checkout revisions in the reference files
    Sync,

    /// Show the component dependency tree
    Ls,

    /// Show revision and local changes of every checkout
    Status,

    /// Get, set or list settings
    Config {
        key: Option<String>,

        value: Option<String>,

        /// Use the global config instead of the program's
        #[arg(long)]
        global: bool,

        /// Remove the key
        #[arg(long)]
        unset: bool,

        /// List every setting with its origin
        #[arg(long)]
        list: bool,
    },

    /// Build the program with make
    Make {
        /// Targets and variables passed to make
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn get_working_dir(cli: &Cli) -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    Ok(match &cli.program {
        Some(p) => cwd.join(p),
        None => cwd,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cwd = get_working_dir(&cli)?;

    match cli.command {
        Commands::New { path, scm } => cmd_new(&cwd.join(path), scm),
        Commands::Import { url, path } => cmd_import(&cwd, &url, path),
        Commands::Add { target, path, req } => {
            cmd_add(&cwd, &target, path.as_deref(), req.as_deref())
        }
        Commands::Remove { name, force } => cmd_remove(&cwd, &name, force),
        Commands::Deploy { force, dry_run } => cmd_deploy(&cwd, SyncOptions { force, dry_run }),
        Commands::Update {
            rev,
            force,
            dry_run,
        } => cmd_update(&cwd, rev.as_deref(), SyncOptions { force, dry_run }),
        Commands::Sync => cmd_sync(&cwd),
        Commands::Ls => cmd_ls(&cwd),
        Commands::Status => cmd_status(&cwd),
        Commands::Config {
            key,
            value,
            global,
            unset,
            list,
        } => cmd_config(&cwd, key, value, global, unset, list),
        Commands::Make { args } => cmd_make(&cwd, args),
    }
}

fn open_program(cwd: &Path) -> Result<Program> {
    let program = Program::find(cwd)?;
    tracing::debug!("program '{}' at {}", program.name(), program.root.display());
    Ok(program)
}

/// Run `f` behind a spinner on stderr.
fn with_spinner<T, E>(message: &str, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
    use indicatif::{ProgressBar, ProgressStyle};

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .expect("valid template"),
    );
    spinner.set_message(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = f();
    spinner.finish_and_clear();
    result
}

fn print_report(report: &SyncReport, dry_run: bool) {
    for conflict in &report.conflicts {
        eprintln!(
            "warning: '{}' declared more than once; using {}, ignoring {}",
            conflict.name, conflict.kept, conflict.ignored
        );
    }
    for action in &report.actions {
        if action.action != Action::Keep {
            eprintln!("  {}: {}", action.path, action.action);
        }
    }
    if report.is_noop() {
        eprintln!("Up to date ({} components).", report.actions.len());
    } else if dry_run {
        eprintln!("Dry run: {}", report.summary());
    } else {
        eprintln!("{}", report.summary());
    }
}

fn cmd_new(path: &Path, scm: Option<ScmKind>) -> Result<()> {
    let program = ops::new_program(path, scm)?;
    eprintln!("Created program '{}' at {}", program.name(), program.root.display());
    Ok(())
}

fn cmd_import(cwd: &Path, url: &str, path: Option<PathBuf>) -> Result<()> {
    let dest = match path {
        Some(p) => cwd.join(p),
        None => ops::import_destination(url.split('#').next().unwrap_or(url), cwd)?,
    };
    let (program, report) = with_spinner(&format!("Importing {url}..."), || {
        ops::import_program(url, &dest, SyncOptions::default())
    })?;
    eprintln!("Imported '{}' into {}", program.name(), program.root.display());
    print_report(&report, false);
    Ok(())
}

fn cmd_add(cwd: &Path, target: &str, path: Option<&Path>, req: Option<&str>) -> Result<()> {
    let program = open_program(cwd)?;
    let report = if ops::is_repository_url(target) {
        if req.is_some() {
            anyhow::bail!("--req applies to index components, not repository URLs");
        }
        let dir = path.map_or_else(|| cwd.to_path_buf(), |p| cwd.join(p));
        let (file, report) = with_spinner(&format!("Adding {target}..."), || {
            ops::add_url(&program, target, &dir, SyncOptions::default())
        })?;
        eprintln!("Wrote {}", file.display());
        report
    } else {
        if path.is_some() {
            anyhow::bail!(
                "--path applies to repository URLs; index components go to the components directory"
            );
        }
        let report = with_spinner(&format!("Adding {target}..."), || {
            ops::add_component(&program, target, req, SyncOptions::default())
        })?;
        eprintln!("Added '{}' to {}", target, ops::PROGRAM_CODES);
        report
    };
    print_report(&report, false);
    Ok(())
}

fn cmd_remove(cwd: &Path, name: &str, force: bool) -> Result<()> {
    let program = open_program(cwd)?;
    let report = ops::remove(
        &program,
        name,
        SyncOptions {
            force,
            dry_run: false,
        },
    )?;
    print_report(&report, false);
    Ok(())
}

fn cmd_deploy(cwd: &Path, options: SyncOptions) -> Result<()> {
    let program = open_program(cwd)?;
    let report = with_spinner("Deploying components...", || ops::deploy(&program, options))?;
    print_report(&report, options.dry_run);
    Ok(())
}

fn cmd_update(cwd: &Path, rev: Option<&str>, options: SyncOptions) -> Result<()> {
    let program = open_program(cwd)?;
    let report = with_spinner("Updating program...", || {
        ops::update_program(&program, rev, options)
    })?;
    print_report(&report, options.dry_run);
    Ok(())
}

fn cmd_sync(cwd: &Path) -> Result<()> {
    let program = open_program(cwd)?;
    let report = ops::sync_references(&program)?;
    if report.is_empty() {
        eprintln!("Reference files already match the working tree.");
    }
    for change in &report.changes {
        eprintln!("  {change}");
    }
    Ok(())
}

fn cmd_ls(cwd: &Path) -> Result<()> {
    let program = open_program(cwd)?;
    print!("{}", ops::list(&program)?);
    Ok(())
}

fn cmd_status(cwd: &Path) -> Result<()> {
    let program = open_program(cwd)?;
    for status in ops::status(&program)? {
        let rev = status
            .revision
            .as_deref()
            .map_or_else(|| "-".to_string(), |r| r.chars().take(12).collect());
        let path = if status.path.is_empty() {
            "."
        } else {
            status.path.as_str()
        };
        println!(
            "{:<20} {:<30} {:<4} {:<12}{}",
            status.name,
            path,
            status.scm.map_or("-", ScmKind::name),
            rev,
            if status.dirty { " (modified)" } else { "" }
        );
    }
    Ok(())
}

/// Settings seen from `cwd`. Outside a program only the global scope is writable.
fn config_settings(cwd: &Path) -> Result<Settings> {
    match Program::find(cwd) {
        Ok(program) => Ok(program.settings),
        Err(DeployError::NotAProgram(_)) => {
            tracing::debug!("not inside a program, using the global config");
            Settings::load(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn cmd_config(
    cwd: &Path,
    key: Option<String>,
    value: Option<String>,
    global: bool,
    unset: bool,
    list: bool,
) -> Result<()> {
    let mut settings = config_settings(cwd)?;
    let scope = if global { Scope::Global } else { Scope::Program };

    let Some(key) = key.filter(|_| !list) else {
        for (key, value, origin) in settings.list() {
            println!("{key} = {value}  ({origin})");
        }
        return Ok(());
    };

    if unset {
        if !settings.unset(scope, &key)? {
            eprintln!("{key} is not set in the {scope} config");
        }
        return Ok(());
    }
    match value {
        Some(value) => {
            settings.set(scope, &key, &value)?;
            eprintln!("Set {key} = {value} ({scope})");
        }
        None => match settings.get(&key) {
            Some(value) => println!("{value}"),
            None => anyhow::bail!("{key} is not set"),
        },
    }
    Ok(())
}

fn cmd_make(cwd: &Path, args: Vec<String>) -> Result<()> {
    let program = open_program(cwd)?;
    let make = MakeCommand::new(&program)?.args(args);
    eprintln!("{}", make.display());
    make.run()?;
    Ok(())
}
