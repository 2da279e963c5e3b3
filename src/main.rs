//! Quickterm - serial terminal with command profiles
//!
//! Interactive sessions, one-shot sends and profile editing from the
//! command line.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use crossbeam_channel::{select, unbounded, Receiver};
use quickterm_core::cli::{print_exit_codes, CliResult, ExitCodes};
use quickterm_core::config::{self, AppConfig, LoggingConfig};
use quickterm_core::core::link::BAUD_RATES;
use quickterm_core::{
    CommandDispatcher, CommandItem, LineEnding, LinkEvent, LinkSettings, Profile, ProfileStore,
    SerialLink,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// CLI output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON format for scripting
    Json,
}

/// Quickterm CLI
#[derive(Parser, Debug)]
#[command(
    name = "quickterm",
    author = "Quickterm Team",
    version,
    about = "Serial terminal with profile-driven command buttons",
    long_about = None
)]
struct Cli {
    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long)]
    quiet: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, env = "QUICKTERM_CONFIG")]
    config: Option<PathBuf>,

    /// Profile directory override
    #[arg(long, env = "QUICKTERM_PROFILES")]
    profiles_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    Ports,

    /// Open an interactive session
    Connect {
        /// Serial port name (e.g., COM3, /dev/ttyUSB0)
        #[arg(short, long)]
        port: String,

        /// Baud rate (defaults to config)
        #[arg(short, long)]
        baud: Option<u32>,

        /// Line ending: none, lf, cr, crlf (defaults to config)
        #[arg(short, long)]
        line_ending: Option<LineEnding>,

        /// Profile whose commands `:run` can send
        #[arg(long)]
        profile: Option<String>,

        /// Print received data as hex
        #[arg(long)]
        hex: bool,
    },

    /// Send one command, print the reply and exit
    Send {
        /// Serial port name
        #[arg(short, long)]
        port: String,

        /// Baud rate (defaults to config)
        #[arg(short, long)]
        baud: Option<u32>,

        /// Line ending (defaults to config)
        #[arg(short, long)]
        line_ending: Option<LineEnding>,

        /// Text to send
        #[arg(conflicts_with_all = ["profile", "interrupt"])]
        text: Option<String>,

        /// Send a profile command instead of text
        #[arg(long, requires_all = ["section", "label"])]
        profile: Option<String>,

        /// Section of the profile command
        #[arg(long)]
        section: Option<String>,

        /// Label of the profile command
        #[arg(long)]
        label: Option<String>,

        /// Send Ctrl+C (ETX) instead of text
        #[arg(long)]
        interrupt: bool,

        /// How long to collect the reply (ms)
        #[arg(short, long, default_value = "500")]
        wait: u64,

        /// Connection timeout (ms)
        #[arg(long, default_value = "3000")]
        timeout: u64,
    },

    /// Profile management
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },

    /// Section management
    Section {
        #[command(subcommand)]
        action: SectionAction,
    },

    /// Command management
    Command {
        #[command(subcommand)]
        action: CommandAction,
    },

    /// Print the exit code table
    ExitCodes,
}

#[derive(Subcommand, Debug)]
enum ProfileAction {
    /// List all profiles
    List,
    /// Show profile details
    Show { name: String },
    /// Create an empty profile
    Create { name: String },
    /// Rename a profile
    Rename { old: String, new: String },
    /// Delete a profile
    Delete { name: String },
}

#[derive(Subcommand, Debug)]
enum SectionAction {
    /// Append a section
    Add { profile: String, name: String },
    /// Rename a section
    Rename {
        profile: String,
        old: String,
        new: String,
    },
    /// Delete a section and its commands
    Delete { profile: String, name: String },
    /// Move a section to a position (0-based)
    Move {
        profile: String,
        name: String,
        position: usize,
    },
}

#[derive(Subcommand, Debug)]
enum CommandAction {
    /// Append a command (creates the section if needed)
    Add {
        profile: String,
        section: String,
        label: String,
        text: String,
    },
    /// Replace the command at an index
    Edit {
        profile: String,
        section: String,
        index: usize,
        label: String,
        text: String,
    },
    /// Delete the command at an index
    Delete {
        profile: String,
        section: String,
        index: usize,
    },
    /// Move a command within its section
    Move {
        profile: String,
        section: String,
        from: usize,
        to: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = config::init_directories() {
        eprintln!("Warning: could not create application directories: {e}");
    }

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    let _guard = init_logging(&cli, &config.logging);
    tracing::debug!("Starting Quickterm v{}", env!("CARGO_PKG_VERSION"));

    let result = match run(&cli, &config) {
        Ok(result) => result,
        Err(e) => CliResult::error(ExitCodes::ERROR, format!("{e:#}")),
    };

    if let Some(msg) = result.message() {
        if result.is_success() {
            if !cli.quiet {
                println!("{msg}");
            }
        } else {
            eprintln!("Error: {msg}");
        }
    }
    result.to_exit_code()
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) -> Option<WorkerGuard> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let stderr_layer = fmt::layer().with_writer(io::stderr).with_target(false);

    let (file_layer, guard) = match logging.directory().filter(|_| logging.file) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "quickterm.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    guard
}

fn run(cli: &Cli, config: &AppConfig) -> anyhow::Result<CliResult> {
    match &cli.command {
        Commands::Ports => list_ports(cli, config),
        Commands::Connect {
            port,
            baud,
            line_ending,
            profile,
            hex,
        } => {
            let store = open_store(cli, config);
            let profile = profile.as_deref().map(|name| store.load(name)).transpose()?;
            interactive(
                cli,
                config,
                port,
                baud.unwrap_or(config.default_baud),
                line_ending.unwrap_or(config.line_ending),
                profile,
                *hex,
            )
        }
        Commands::Send {
            port,
            baud,
            line_ending,
            text,
            profile,
            section,
            label,
            interrupt,
            wait,
            timeout,
        } => {
            let request = if *interrupt {
                Request::Interrupt
            } else if let (Some(profile), Some(section), Some(label)) = (profile, section, label) {
                let store = open_store(cli, config);
                let loaded = store.load(profile)?;
                match loaded.find_command(section, label) {
                    Some(item) => Request::Command(item.clone()),
                    None => {
                        return Ok(CliResult::not_found(format!(
                            "No command '{label}' in section '{section}' of profile '{profile}'"
                        )))
                    }
                }
            } else {
                Request::Text(text.clone().unwrap_or_default())
            };
            one_shot(
                config,
                port,
                baud.unwrap_or(config.default_baud),
                line_ending.unwrap_or(config.line_ending),
                &request,
                Duration::from_millis(*wait),
                Duration::from_millis(*timeout),
            )
        }
        Commands::Profile { action } => handle_profile(cli, config, action),
        Commands::Section { action } => handle_section(cli, config, action),
        Commands::Command { action } => handle_command(cli, config, action),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(CliResult::success())
        }
    }
}

fn open_store(cli: &Cli, config: &AppConfig) -> ProfileStore {
    let dir = cli
        .profiles_dir
        .clone()
        .unwrap_or_else(|| config.profiles_dir());
    ProfileStore::open(dir)
}

fn new_link(config: &AppConfig) -> Arc<SerialLink> {
    Arc::new(SerialLink::system(LinkSettings::from(&config.link)))
}

fn list_ports(cli: &Cli, config: &AppConfig) -> anyhow::Result<CliResult> {
    let ports = new_link(config)
        .enumerate_ports()
        .context("Failed to enumerate serial ports")?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ports)?),
        OutputFormat::Text => {
            if ports.is_empty() {
                return Ok(CliResult::success_with_message("No serial ports found."));
            }
            for port in &ports {
                println!("{}", port.display_name());
            }
            if cli.verbose {
                let rates: Vec<String> = BAUD_RATES.iter().map(u32::to_string).collect();
                println!("Baud rates: {}", rates.join(", "));
            }
        }
    }
    Ok(CliResult::success())
}

/// Wait until the link reports `Connected`, folding events into the transcript
fn wait_for_connect(
    events: &Receiver<LinkEvent>,
    dispatcher: &CommandDispatcher,
    timeout: Duration,
) -> Result<(), CliResult> {
    let deadline = Instant::now() + timeout;
    let mut failure = None;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let Ok(event) = events.recv_timeout(remaining) else {
            return Err(CliResult::timeout("Timed out waiting for the port to open"));
        };
        dispatcher.ingest(&event);
        match event {
            LinkEvent::Connected => return Ok(()),
            LinkEvent::Error(e) => failure = Some(CliResult::from(&e)),
            LinkEvent::Disconnected => {
                return Err(failure.unwrap_or_else(|| {
                    CliResult::error(ExitCodes::CONNECTION_FAILED, "Connection closed")
                }))
            }
            LinkEvent::DataReceived(_) => {}
        }
    }
}

enum Request {
    Text(String),
    Command(CommandItem),
    Interrupt,
}

fn one_shot(
    config: &AppConfig,
    port: &str,
    baud: u32,
    ending: LineEnding,
    request: &Request,
    wait: Duration,
    timeout: Duration,
) -> anyhow::Result<CliResult> {
    let link = new_link(config);
    let events = link.events();
    let dispatcher = CommandDispatcher::new(Arc::clone(&link));

    link.connect(port, baud);
    if let Err(result) = wait_for_connect(&events, &dispatcher, timeout) {
        link.disconnect();
        return Ok(result);
    }

    let sent = match request {
        Request::Text(text) => dispatcher.send(text, ending),
        Request::Command(item) => dispatcher.send_command(item, ending),
        Request::Interrupt => dispatcher.send_interrupt(),
    };
    if let Err(e) = sent {
        link.disconnect();
        return Ok(CliResult::from(e));
    }

    let deadline = Instant::now() + wait;
    let mut failure = None;
    while let Ok(event) = events.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        dispatcher.ingest(&event);
        match event {
            LinkEvent::Error(e) => failure = Some(CliResult::from(&e)),
            LinkEvent::Disconnected => break,
            _ => {}
        }
    }
    link.disconnect();

    if let Some(reply) = dispatcher.last_result() {
        println!("{reply}");
    }
    Ok(failure.unwrap_or_else(CliResult::success))
}

fn print_data(data: &[u8], as_hex: bool) {
    let mut out = io::stdout().lock();
    if as_hex {
        let _ = writeln!(out, "{}", hex::encode_upper(data));
    } else {
        let _ = out.write_all(String::from_utf8_lossy(data).as_bytes());
    }
    let _ = out.flush();
}

fn interactive(
    cli: &Cli,
    config: &AppConfig,
    port: &str,
    baud: u32,
    mut ending: LineEnding,
    profile: Option<Profile>,
    as_hex: bool,
) -> anyhow::Result<CliResult> {
    let link = new_link(config);
    let events = link.events();
    let dispatcher = Arc::new(CommandDispatcher::new(Arc::clone(&link)));

    if !cli.quiet {
        eprintln!("[Connecting to {port} @ {baud}…]");
    }
    link.connect(port, baud);
    if let Err(result) = wait_for_connect(&events, &dispatcher, link.settings().disconnect_timeout * 2) {
        link.disconnect();
        return Ok(result);
    }
    if !cli.quiet {
        eprintln!("[Connected] Type :help for commands, Ctrl+C sends ETX, Ctrl+D quits.");
    }

    // Event consumer: display plus transcript
    let (ended_tx, ended_rx) = unbounded::<Option<CliResult>>();
    let consumer = {
        let dispatcher = Arc::clone(&dispatcher);
        let quiet = cli.quiet;
        thread::spawn(move || {
            let mut failure = None;
            for event in &events {
                dispatcher.ingest(&event);
                match event {
                    LinkEvent::DataReceived(data) => print_data(&data, as_hex),
                    LinkEvent::Error(e) => {
                        eprintln!("[Error] {e}");
                        if e.is_terminal() {
                            failure = Some(CliResult::from(&e));
                        }
                    }
                    LinkEvent::Disconnected => {
                        if !quiet {
                            eprintln!("[Disconnected]");
                        }
                        break;
                    }
                    LinkEvent::Connected => {}
                }
            }
            let _ = ended_tx.send(failure);
        })
    };

    let (input_tx, input_rx) = unbounded::<Option<String>>();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if input_tx.send(Some(line)).is_err() {
                        return;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = input_tx.send(None);
    });

    let (interrupt_tx, interrupt_rx) = unbounded::<()>();
    ctrlc::set_handler(move || {
        let _ = interrupt_tx.send(());
    })
    .context("Failed to install Ctrl+C handler")?;

    let mut outcome = CliResult::success();
    loop {
        select! {
            recv(interrupt_rx) -> _ => {
                if let Err(e) = dispatcher.send_interrupt() {
                    eprintln!("[{e}]");
                }
            }
            recv(ended_rx) -> failure => {
                if let Ok(Some(failure)) = failure {
                    outcome = failure;
                }
                return Ok(outcome);
            }
            recv(input_rx) -> line => {
                let Ok(Some(line)) = line else { break };
                match handle_line(&dispatcher, profile.as_ref(), &mut ending, &line) {
                    LineOutcome::Continue => {}
                    LineOutcome::Quit => break,
                }
            }
        }
    }

    if !cli.quiet {
        eprintln!("[Disconnecting…]");
    }
    if link.disconnect() {
        if let Ok(Some(failure)) = ended_rx.recv_timeout(link.settings().disconnect_timeout) {
            outcome = failure;
        }
        let _ = consumer.join();
    }
    Ok(outcome)
}

enum LineOutcome {
    Continue,
    Quit,
}

const HELP: &str = "\
:int                  send Ctrl+C (ETX)
:run SECTION/LABEL    send a profile command
:list                 show profile commands
:le none|lf|cr|crlf   change line ending
:last                 print output since the last command
:clear                clear the transcript
:quit                 disconnect and exit";

fn handle_line(
    dispatcher: &CommandDispatcher,
    profile: Option<&Profile>,
    ending: &mut LineEnding,
    line: &str,
) -> LineOutcome {
    let Some(meta) = line.strip_prefix(':') else {
        if let Err(e) = dispatcher.send(line, *ending) {
            eprintln!("[{e}]");
        }
        return LineOutcome::Continue;
    };

    let (verb, arg) = meta.split_once(' ').unwrap_or((meta, ""));
    match verb {
        "quit" | "q" => return LineOutcome::Quit,
        "help" => eprintln!("{HELP}"),
        "int" => {
            if let Err(e) = dispatcher.send_interrupt() {
                eprintln!("[{e}]");
            }
        }
        "last" => match dispatcher.last_result() {
            Some(result) => println!("{result}"),
            None => eprintln!("[No command has been sent yet]"),
        },
        "clear" => dispatcher.clear_transcript(),
        "le" => match arg.parse::<LineEnding>() {
            Ok(mode) => {
                *ending = mode;
                eprintln!("[Line ending: {}]", mode.label());
            }
            Err(e) => eprintln!("[{e}]"),
        },
        "list" => match profile {
            Some(profile) => print_profile(profile),
            None => eprintln!("[No profile loaded; start with --profile]"),
        },
        "run" => {
            let Some(profile) = profile else {
                eprintln!("[No profile loaded; start with --profile]");
                return LineOutcome::Continue;
            };
            let (section, label) = arg.split_once('/').unwrap_or(("", arg));
            match profile.find_command(section.trim(), label.trim()) {
                Some(item) => {
                    if let Err(e) = dispatcher.send_command(item, *ending) {
                        eprintln!("[{e}]");
                    }
                }
                None => eprintln!("[No command '{label}' in section '{section}']"),
            }
        }
        _ => eprintln!("[Unknown command :{verb}; try :help]"),
    }
    LineOutcome::Continue
}

fn print_profile(profile: &Profile) {
    println!("{}: {} section(s)", profile.name, profile.sections.len());
    for (section, commands) in &profile.sections {
        println!("  [{section}]");
        for (index, command) in commands.iter().enumerate() {
            println!("    {index:>2}. {:<16} {:?}", command.label, command.text);
        }
    }
}

fn handle_profile(cli: &Cli, config: &AppConfig, action: &ProfileAction) -> anyhow::Result<CliResult> {
    let store = open_store(cli, config);
    let result = match action {
        ProfileAction::List => match store.ensure_default() {
            Ok(names) => {
                match cli.format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&names)?),
                    OutputFormat::Text => names.iter().for_each(|n| println!("{n}")),
                }
                CliResult::success()
            }
            Err(e) => CliResult::from(&e),
        },
        ProfileAction::Show { name } => match store.load(name) {
            Ok(profile) => {
                match cli.format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&profile)?),
                    OutputFormat::Text => print_profile(&profile),
                }
                CliResult::success()
            }
            Err(e) => CliResult::from(&e),
        },
        ProfileAction::Create { name } => match store.create(name) {
            Ok(profile) => CliResult::success_with_message(format!("Created profile '{}'", profile.name)),
            Err(e) => CliResult::from(&e),
        },
        ProfileAction::Rename { old, new } => match store.rename(old, new) {
            Ok(outcome) => {
                if let Some(stale) = outcome.stale_record {
                    eprintln!("Warning: old profile file left behind at {}", stale.display());
                }
                CliResult::success_with_message(format!("Renamed '{old}' to '{}'", outcome.profile.name))
            }
            Err(e) => CliResult::from(&e),
        },
        ProfileAction::Delete { name } => match store.delete(name) {
            Ok(()) => CliResult::success_with_message(format!("Deleted profile '{name}'")),
            Err(e) => CliResult::from(&e),
        },
    };
    Ok(result)
}

fn handle_section(cli: &Cli, config: &AppConfig, action: &SectionAction) -> anyhow::Result<CliResult> {
    let store = open_store(cli, config);
    let saved = match action {
        SectionAction::Add { profile, name } => store.update(profile, |p| p.add_section(name)),
        SectionAction::Rename { profile, old, new } => {
            store.update(profile, |p| p.rename_section(old, new))
        }
        SectionAction::Delete { profile, name } => {
            store.update(profile, |p| p.delete_section(name).map(drop))
        }
        SectionAction::Move {
            profile,
            name,
            position,
        } => store.update(profile, |p| p.move_section(name, *position)),
    };
    Ok(match saved {
        Ok(profile) => {
            if !cli.quiet {
                print_profile(&profile);
            }
            CliResult::success()
        }
        Err(e) => CliResult::from(&e),
    })
}

fn handle_command(cli: &Cli, config: &AppConfig, action: &CommandAction) -> anyhow::Result<CliResult> {
    let store = open_store(cli, config);
    let saved = match action {
        CommandAction::Add {
            profile,
            section,
            label,
            text,
        } => store.update(profile, |p| p.add_command(section, CommandItem::new(label.as_str(), text.as_str()))),
        CommandAction::Edit {
            profile,
            section,
            index,
            label,
            text,
        } => store.update(profile, |p| {
            p.edit_command(section, *index, CommandItem::new(label.as_str(), text.as_str()))
        }),
        CommandAction::Delete {
            profile,
            section,
            index,
        } => store.update(profile, |p| p.delete_command(section, *index).map(drop)),
        CommandAction::Move {
            profile,
            section,
            from,
            to,
        } => store.update(profile, |p| p.move_command(section, *from, *to)),
    };
    Ok(match saved {
        Ok(profile) => {
            if !cli.quiet {
                print_profile(&profile);
            }
            CliResult::success()
        }
        Err(e) => CliResult::from(&e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_send_args() {
        let cli = Cli::try_parse_from([
            "quickterm", "send", "-p", "COM3", "-l", "crlf", "--profile", "Default", "--section",
            "Quick", "--label", "AT",
        ])
        .unwrap();
        match cli.command {
            Commands::Send { line_ending, profile, .. } => {
                assert_eq!(line_ending, Some(LineEnding::CrLf));
                assert_eq!(profile.as_deref(), Some("Default"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
