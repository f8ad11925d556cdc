/*!
 * remotebuild CLI
 *
 * Connects to a build host, mirrors the source tree, runs the configure and
 * build steps remotely with live output, and fetches the requested artifacts.
 */

use clap::{Parser, Subcommand, ValueEnum};
use remotebuild::{
    cli_style::{
        failure_table, print_error, print_info, print_success, print_warning, summary_table,
        BannerObserver,
    },
    commands::init::{write_starter_config, DEFAULT_CONFIG_NAME},
    config::{
        parse_artifacts, BuildSettings, ConfigError, ConnectionOverrides, ConnectionSettings,
        FileConfig, HostKeyPolicy, LogConfig, LogLevel,
    },
    context::RunContext,
    error::{Error, Result, EXIT_SUCCESS},
    logging,
    pipeline::Pipeline,
    remote::{ConnectError, SshConnector},
};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "remotebuild")]
#[command(version, about = "Build a CMake project on a remote host over SSH", long_about = None)]
struct Cli {
    /// Configuration document (JSON, YAML or TOML by extension) [default: config.json]
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Remote host name or address
    #[arg(long)]
    host: Option<String>,

    /// SSH user
    #[arg(long)]
    user: Option<String>,

    /// Private key used for both connections
    #[arg(long, value_name = "FILE")]
    key: Option<String>,

    /// Local directory that receives artifacts
    #[arg(long = "target-dir", value_name = "DIR")]
    target_dir: Option<String>,

    /// Local project root
    #[arg(long, value_name = "DIR")]
    src: Option<String>,

    /// Remote project root; the build runs in <remote-dir>/build
    #[arg(long = "remote-dir", value_name = "DIR")]
    remote_dir: Option<String>,

    /// CMAKE_BUILD_TYPE for the configure step
    #[arg(long = "build-type", default_value = "Release")]
    build_type: String,

    /// Extra configure arguments, passed verbatim
    #[arg(long = "cmake-args", default_value = "", allow_hyphen_values = true)]
    cmake_args: String,

    /// Comma-separated artifact paths, relative to the remote build directory
    #[arg(long, default_value = "")]
    artifacts: String,

    /// Build tool invoked on the remote host
    #[arg(long, default_value = "cmake")]
    toolchain: String,

    /// Parallel build jobs (default: the remote host's processor count)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..))]
    jobs: Option<u32>,

    /// SSH port [default: 22]
    #[arg(long)]
    port: Option<u16>,

    /// known_hosts file used to verify the host [default: ~/.ssh/known_hosts]
    #[arg(long = "known-hosts", value_name = "FILE")]
    known_hosts: Option<String>,

    /// Pin the host key by its SHA256 fingerprint
    #[arg(long = "host-key-fingerprint", value_name = "SHA256:...")]
    host_key_fingerprint: Option<String>,

    /// Skip host identity verification
    #[arg(long = "accept-any-host-key")]
    accept_any_host_key: bool,

    /// Bound on establishing the session
    #[arg(long = "connect-timeout", value_name = "SECS")]
    connect_timeout: Option<u64>,

    /// Bound on each remote command
    #[arg(long = "command-timeout", value_name = "SECS")]
    command_timeout: Option<u64>,

    /// Skip matching paths during upload (repeatable)
    #[arg(long = "exclude", value_name = "GLOB")]
    exclude: Vec<String>,

    /// Do not forward local stdin to remote commands
    #[arg(long = "no-stdin")]
    no_stdin: bool,

    /// Hide transfer progress bars
    #[arg(long = "no-progress")]
    no_progress: bool,

    /// Log level
    #[arg(long = "log-level", value_enum, default_value = "info")]
    log_level: LogLevelArg,

    /// Path to a JSON log file (default: stderr)
    #[arg(long, value_name = "FILE")]
    log: Option<PathBuf>,

    /// Enable verbose logging (equivalent to --log-level=debug)
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter configuration document
    Init {
        /// Where to write it (format follows the extension)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(code) => code,
        Err(e) => {
            report_error(&e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();

    let log_config = LogConfig {
        log_level: cli.log_level.into(),
        log_file: cli.log.clone(),
        verbose: cli.verbose,
    };
    if let Err(e) = logging::init_logging(&log_config) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    if let Some(command) = cli.command {
        return handle_subcommand(command).map(|()| EXIT_SUCCESS);
    }

    // Required project locations come first; nothing else is read without them
    let mut build = BuildSettings::require(cli.src.as_deref(), cli.remote_dir.as_deref())?;

    let (config_path, explicit) = match cli.config {
        Some(path) => (path, true),
        None => (PathBuf::from(DEFAULT_CONFIG_NAME), false),
    };
    let document = match FileConfig::load_optional(&config_path, explicit) {
        Ok(doc) => doc,
        Err(e) => {
            tracing::warn!("Continuing without configuration document: {}", e);
            print_warning(&format!("Failed to load config file: {}", e));
            None
        }
    };

    let overrides = ConnectionOverrides {
        host: cli.host,
        user: cli.user,
        key: cli.key,
        target_dir: cli.target_dir,
        port: cli.port,
        known_hosts: cli.known_hosts,
        host_key_fingerprint: cli.host_key_fingerprint,
        accept_any_host_key: cli.accept_any_host_key,
        connect_timeout_secs: cli.connect_timeout,
    };
    let connection = ConnectionSettings::resolve(&overrides, document.as_ref())?;

    if connection.host_key_policy == HostKeyPolicy::AcceptAny {
        tracing::warn!("Host key verification disabled for {}", connection.endpoint());
        print_warning("Host key verification is disabled (--accept-any-host-key)");
    }

    let doc = document.unwrap_or_default();
    build.build_type = cli.build_type;
    build.cmake_args = cli.cmake_args;
    build.artifacts = parse_artifacts(&cli.artifacts);
    build.toolchain = cli.toolchain;
    build.jobs = cli.jobs;
    build.exclude = if cli.exclude.is_empty() {
        doc.exclude
    } else {
        cli.exclude
    };
    build.forward_stdin = !cli.no_stdin;
    build.command_timeout = cli
        .command_timeout
        .or(doc.command_timeout_secs)
        .map(Duration::from_secs);
    build.show_progress = !cli.no_progress && console::Term::stderr().is_term();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let outcome = runtime.block_on(execute(connection, build));
    // A blocked remote read may still hold a blocking-pool thread
    runtime.shutdown_timeout(Duration::from_millis(500));
    outcome
}

async fn execute(connection: ConnectionSettings, build: BuildSettings) -> Result<i32> {
    let ctx = RunContext::new();
    let signal_ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            signal_ctx.cancel();
        }
    });

    let target_dir = connection.target_dir.clone();
    let connector = SshConnector::default().with_stdin(build.forward_stdin);
    let pipeline = Pipeline::new(connection, build).with_observer(Box::new(BannerObserver));
    let report = pipeline.run(&connector, &ctx).await?;

    eprintln!("{}", summary_table(&report));
    if !report.download.transferred.is_empty() {
        print_info(&format!("Artifacts written to {}", target_dir.display()));
    }
    if report.download.is_clean() {
        print_success("Remote build complete");
    } else {
        print_warning(&format!(
            "{} artifact(s) could not be retrieved",
            report.download.failures.len()
        ));
        eprintln!("{}", failure_table(&report.download));
    }
    Ok(report.exit_code())
}

fn handle_subcommand(command: Commands) -> Result<()> {
    match command {
        Commands::Init { path, force } => {
            let written = write_starter_config(path.as_deref(), force)?;
            print_success(&format!("Wrote {}", written.display()));
            Ok(())
        }
        Commands::Completions { shell } => {
            use clap::CommandFactory;
            use clap_complete::generate;
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "remotebuild", &mut std::io::stdout());
            Ok(())
        }
    }
}

fn report_error(error: &Error) {
    tracing::error!(category = %error.category(), "{}", error);

    let hint = match error {
        Error::Config(ConfigError::Missing(_)) => Some("run `remotebuild --help` for the flag list"),
        Error::Connect {
            source: ConnectError::HostKey { .. },
            ..
        } => Some("check known_hosts, pin --host-key-fingerprint, or pass --accept-any-host-key"),
        Error::Connect {
            source: ConnectError::Auth { .. },
            ..
        } => Some("set REMOTEBUILD_KEY_PASSPHRASE if the key is encrypted"),
        _ => None,
    };
    print_error(&error.to_string(), hint);

    if let Error::UploadIncomplete { report } = error {
        eprintln!("{}", failure_table(report));
    }
}
