//! cogcycle - human-gated cognitive cycle orchestrator
//!
//! CLI entry point with global panic handler.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use cogcycle::config::{cogcycle_home, project_reflections_path, Config};
use cogcycle::error::exit_codes;
use cogcycle::storage::{FileSessionStore, SessionStore};

// =============================================================================
// CLI Definition
// =============================================================================

/// cogcycle - human-gated propose/approve/apply/reflect cycles
#[derive(Parser)]
#[command(name = "cogcycle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a cycle for a goal, reading approvals from stdin
    Run {
        /// What the cycle should achieve
        goal: String,
        /// Continue an existing session
        #[arg(long)]
        session_id: Option<String>,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Parse proposal text from a file or stdin
    Parse {
        /// Proposal file (stdin when omitted)
        file: Option<PathBuf>,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// List recent reflections for this project
    Reflections {
        /// Maximum number of reflections
        #[arg(long, short, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// List recent sessions
    Sessions {
        /// Maximum number of sessions
        #[arg(long, short, default_value = "20")]
        limit: usize,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },

    /// Turn context auto-approval on or off
    AutoApprove {
        #[arg(value_enum)]
        state: Toggle,
        /// Apply to one session
        #[arg(long, required_unless_present = "global")]
        session_id: Option<String>,
        /// Apply to every session via the user config
        #[arg(long, conflicts_with = "session_id")]
        global: bool,
        /// Output as JSON
        #[arg(long, short)]
        json: bool,
        /// Suppress output
        #[arg(long, short)]
        quiet: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Toggle {
    On,
    Off,
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> ExitCode {
    setup_panic_handler();
    cogcycle::logging::init();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("cogcycle error: {}", e);
            exit_code(exit_codes::ERROR)
        }
    }
}

fn setup_panic_handler() {
    std::panic::set_hook(Box::new(|info| {
        eprintln!("cogcycle panic: {}", info);

        if let Some(home) = cogcycle_home() {
            let _ = std::fs::create_dir_all(&home);
            let crash_log = home.join("crash.log");
            if let Ok(mut file) = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&crash_log)
            {
                let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
                let _ = writeln!(file, "[{}] {}", timestamp, info);
            }
        }

        std::process::exit(exit_codes::CRASH);
    }));
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(code as u8)
}

fn success_to_exit_code(success: bool) -> ExitCode {
    if success {
        exit_code(exit_codes::SUCCESS)
    } else {
        exit_code(exit_codes::ERROR)
    }
}

fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Run {
            goal,
            session_id,
            json,
            quiet,
        } => run_cycle(&goal, session_id, json, quiet, &cwd),
        Commands::Parse { file, json, quiet } => run_parse(file.as_deref(), json, quiet),
        Commands::Reflections { limit, json, quiet } => run_reflections(limit, json, quiet, &cwd),
        Commands::Sessions { limit, json, quiet } => run_sessions(limit, json, quiet),
        Commands::AutoApprove {
            state,
            session_id,
            global,
            json,
            quiet,
        } => run_auto_approve(state, session_id, global, json, quiet, &cwd),
    }
}

// =============================================================================
// Command Implementations
// =============================================================================

fn run_cycle(
    goal: &str,
    session_id: Option<String>,
    json: bool,
    quiet: bool,
    cwd: &Path,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    use cogcycle::cli::run::{RunCommand, RunOptions};

    let config = Config::load_from_cwd(cwd);
    let sessions: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new()?);
    let cmd = RunCommand::from_config(config, cwd, sessions)?;
    let options = RunOptions {
        json,
        quiet,
        session_id,
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let output = runtime.block_on(async {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        cmd.run(goal, &options, stdin).await
    });
    // Stdin reads may still be parked on a blocking thread.
    runtime.shutdown_background();

    let formatted = cmd.format_output(&output, &options);
    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    Ok(exit_code(output.exit_code()))
}

fn run_parse(
    file: Option<&Path>,
    json: bool,
    quiet: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    use cogcycle::cli::parse::{ParseCommand, ParseOptions};
    use cogcycle::util::{read_to_string_with_limit, MAX_FILE_SIZE};

    let text = match file {
        Some(path) => read_to_string_with_limit(path, MAX_FILE_SIZE)?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let cmd = ParseCommand::new();
    let options = ParseOptions { json, quiet };
    let output = cmd.run(&text);

    let formatted = cmd.format_output(&output, &options);
    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    Ok(success_to_exit_code(output.success))
}

fn run_reflections(
    limit: usize,
    json: bool,
    quiet: bool,
    cwd: &Path,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    use cogcycle::cli::reflections::{ReflectionsCommand, ReflectionsOptions};
    use cogcycle::ports::{JsonlJournal, JsonlReflectionStore};

    let store = JsonlReflectionStore::new(JsonlJournal::new(project_reflections_path(cwd)));
    let cmd = ReflectionsCommand::new(store);
    let options = ReflectionsOptions { json, quiet, limit };

    let runtime = tokio::runtime::Runtime::new()?;
    let output = runtime.block_on(cmd.run(&options));

    let formatted = cmd.format_output(&output, &options);
    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    Ok(success_to_exit_code(output.success))
}

fn run_sessions(
    limit: usize,
    json: bool,
    quiet: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    use cogcycle::cli::sessions::{SessionsCommand, SessionsOptions};

    let store = FileSessionStore::new()?;
    let cmd = SessionsCommand::new(store);
    let options = SessionsOptions { json, quiet, limit };

    let output = cmd.run(&options);

    let formatted = cmd.format_output(&output, &options);
    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    Ok(success_to_exit_code(output.success))
}

fn run_auto_approve(
    state: Toggle,
    session_id: Option<String>,
    global: bool,
    json: bool,
    quiet: bool,
    cwd: &Path,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    use cogcycle::cli::auto_approve::{AutoApproveCommand, AutoApproveOptions, AutoApproveScope};

    let scope = match session_id {
        Some(id) if !global => AutoApproveScope::Session(id),
        _ => AutoApproveScope::Global,
    };
    let enabled = matches!(state, Toggle::On);

    let store = FileSessionStore::new()?;
    let cmd = AutoApproveCommand::new(store, cwd.display().to_string());
    let options = AutoApproveOptions { json, quiet };

    let output = cmd.run(&scope, enabled);

    let formatted = cmd.format_output(&output, &options);
    if !formatted.is_empty() {
        println!("{}", formatted);
    }

    Ok(success_to_exit_code(output.success))
}
