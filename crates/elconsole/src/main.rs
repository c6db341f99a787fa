//
// main.rs
//
// Copyright (C) 2025 Posit Software, PBC. All rights reserved.
//
//

//! elconsole
//!
//! An interactive console for Elara kernel sessions: starts (or adopts) a
//! Jupyter kernel, executes the lines typed at its prompt, and prints what
//! the kernel sends back. Doubles as a quick way to exercise the supervisor
//! against a real kernel.
#![allow(missing_docs)]

use std::fs::File;
use std::io::Write;
use std::sync::Arc;

use async_channel::Receiver;
use clap::Parser;
use elbridge::connection_file::ConnectionFile;
use elbridge::execution_tracker::ExecutionMode;
use elbridge::kernel_session::KernelSession;
use elshared::jupyter_message::{JupyterMessage, JupyterMessageHeader};
use elshared::kernel_info::KernelInfoReply;
use elshared::kernel_message::{KernelMessage, KernelStatus, OutputStream};
use elshared::session::{InterruptMode, SessionOptions};
use elshared::session_event::SessionEvent;
use event_listener::Event;
use log::LevelFilter;
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

mod kernel_spec;
use kernel_spec::KernelSpec;

/// The parent header of an input request the kernel is waiting on, if any.
/// The next line read from standard input answers it.
type PendingInput = Arc<Mutex<Option<JupyterMessageHeader>>>;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The command line used to start the kernel; everything after the first
    /// non-option argument is taken verbatim. An argument containing
    /// `{connection_file}` is replaced with the path to the generated
    /// connection file.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    argv: Vec<String>,

    /// The path to a Jupyter kernelspec (kernel.json) to read the kernel's
    /// command line and environment from, as an alternative to passing the
    /// command line directly.
    #[arg(short, long)]
    spec: Option<String>,

    /// The path to the connection file of a running kernel to adopt. When
    /// specified, no kernel is started; the console attaches to the existing
    /// one and leaves it running on exit.
    #[arg(short, long)]
    connection_file: Option<String>,

    /// The session ID to use. If not specified, a random one is generated.
    #[arg(long)]
    session_id: Option<String>,

    /// The username to send in message headers
    #[arg(short, long, default_value_t = String::from("console"))]
    username: String,

    /// The working directory in which to start the kernel. If not specified,
    /// the kernel inherits the console's working directory.
    #[arg(short, long)]
    working_dir: Option<String>,

    /// How to interrupt the kernel. Valid values are "signal" and "message".
    /// If not specified, uses the kernelspec's interrupt_mode if one was
    /// given, "message" for adopted kernels, and "signal" otherwise.
    #[arg(short, long)]
    interrupt_mode: Option<String>,

    /// How long to wait, in seconds, for the kernel's sockets to connect
    /// before giving up on startup
    #[arg(long, default_value_t = 30)]
    connection_timeout: u64,

    /// The path to a log file. If specified, log output will be written to
    /// this file in addition to standard streams.
    #[arg(long)]
    log_file: Option<String>,

    /// The log level to use. Valid values are "trace", "debug", "info",
    /// "warn", and "error". If not specified, the default log level is
    /// "info", or the value of `RUST_LOG` if set.
    #[arg(short, long)]
    log_level: Option<String>,
}

/// Validate command line arguments for consistency and correctness
fn validate_args(args: &Args) -> Result<(), String> {
    // Count the ways the kernel was specified; exactly one is required
    let kernel_sources = [
        !args.argv.is_empty(),
        args.spec.is_some(),
        args.connection_file.is_some(),
    ]
    .into_iter()
    .filter(|present| *present)
    .count();

    if kernel_sources == 0 {
        return Err(String::from(
            "No kernel was specified. Pass the kernel's command line as trailing \
            arguments, name a kernelspec with --spec, or adopt a running kernel \
            with --connection-file.",
        ));
    }

    if kernel_sources > 1 {
        return Err(String::from(
            "The kernel command line, --spec, and --connection-file cannot be \
            combined. Specify the kernel exactly one way.",
        ));
    }

    if let Some(ref mode) = args.interrupt_mode {
        match mode.as_str() {
            "signal" | "message" => {}
            _ => {
                return Err(format!(
                    "Invalid interrupt mode '{}'. Valid values are \"signal\" and \"message\".",
                    mode
                ));
            }
        }

        if args.connection_file.is_some() && mode == "signal" {
            return Err(String::from(
                "Adopted kernels can only be interrupted with --interrupt-mode message, \
                since the kernel process is not a child of the console.",
            ));
        }
    }

    Ok(())
}

/// Build the session options from the arguments, reading the kernelspec and
/// connection file where they were given.
fn resolve_options(args: &Args) -> anyhow::Result<(SessionOptions, Option<ConnectionFile>)> {
    let session_id = match args.session_id {
        Some(ref session_id) => session_id.clone(),
        None => format!("console-{}", &uuid::Uuid::new_v4().to_string()[..8]),
    };

    let (argv, spec_interrupt_mode) = match args.spec {
        Some(ref path) => {
            let spec = KernelSpec::from_file(path)?;
            println!("{} ({})", spec.display_name, spec.language);

            // The kernel inherits the console's environment
            for (name, value) in &spec.env {
                let value = match value.as_str() {
                    Some(value) => value.to_string(),
                    None => value.to_string(),
                };
                std::env::set_var(name, value);
            }
            (spec.argv, spec.interrupt_mode)
        }
        None => (args.argv.clone(), None),
    };

    let connection = match args.connection_file {
        Some(ref path) => Some(ConnectionFile::from_file(path)?),
        None => None,
    };

    let interrupt_mode = match args.interrupt_mode.as_deref() {
        Some("message") => InterruptMode::Message,
        Some(_) => InterruptMode::Signal,
        None => match spec_interrupt_mode.as_deref() {
            Some("message") => InterruptMode::Message,
            Some(_) => InterruptMode::Signal,
            None if connection.is_some() => InterruptMode::Message,
            None => InterruptMode::Signal,
        },
    };

    let mut options = SessionOptions::new(session_id, args.username.clone(), argv);
    options.working_directory = args.working_dir.clone();
    options.interrupt_mode = interrupt_mode;
    options.connection_timeout = args.connection_timeout;
    Ok((options, connection))
}

/// Start (or adopt) a kernel session and hand it to the console loop.
#[tokio::main]
async fn main() {
    // Parse command line arguments
    let args = Args::parse();

    // Validate the arguments for consistency and correctness
    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Derive the log level
    let log_level = match args.log_level {
        Some(ref level) => {
            // If the log level is set in the command-line arguments, use it
            level.to_string()
        }
        None => match std::env::var("RUST_LOG") {
            Ok(level) => {
                // If the log level is set in the RUST_LOG environment variable, use it
                level
            }
            Err(_) => {
                // If no log level is set, use "info"
                "info".to_string()
            }
        },
    };

    // Match the log level to a `LevelFilter`
    let log_level = match log_level.as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            println!("Invalid log level '{}'; using 'info'", log_level);
            LevelFilter::Info
        }
    };

    // Check to see if a log file was provided
    match args.log_file {
        Some(ref log_file) => {
            // A log file was provided; use a combined logger that writes to the
            // log file and stdout
            if let Err(err) = CombinedLogger::init(vec![
                TermLogger::new(
                    log_level,
                    Config::default(),
                    TerminalMode::Mixed,
                    ColorChoice::Auto,
                ),
                WriteLogger::new(
                    log_level,
                    Config::default(),
                    File::create(log_file).unwrap(),
                ),
            ]) {
                // Consider it a fatal error if we can't initialize logging
                println!(
                    "Failed to initialize combined file/terminal logging: {}",
                    err
                );
                std::process::exit(1);
            }
        }
        None => {
            // No log file was provided; use a terminal logger only
            if let Err(err) = TermLogger::init(
                log_level,
                Config::default(),
                TerminalMode::Mixed,
                ColorChoice::Auto,
            ) {
                // Consider it a fatal error if we can't initialize logging
                println!("Failed to initialize terminal logging: {}", err);
                std::process::exit(1);
            }
        }
    }

    // Read the kernelspec and connection file, if any, and assemble the
    // session options
    let (options, connection) = match resolve_options(&args) {
        Ok(resolved) => resolved,
        Err(e) => {
            log::error!("Failed to prepare the session: {}", e);
            std::process::exit(1);
        }
    };

    let adopting = connection.is_some();
    let reserved_ports = Arc::new(std::sync::RwLock::new(Vec::new()));
    let session = match connection {
        Some(connection_file) => KernelSession::adopted(options, connection_file, reserved_ports),
        None => KernelSession::new(options, reserved_ports),
    };
    let session = match session {
        Ok(session) => session,
        Err(e) => {
            log::error!("Failed to create the session: {}", e);
            std::process::exit(1);
        }
    };

    // Subscribe before starting the kernel so its startup output is not missed
    let pending_input: PendingInput = Arc::new(Mutex::new(None));
    let printer = spawn_printer(&session, pending_input.clone()).await;

    let kernel_info = if adopting {
        session.connect().await
    } else {
        session.start().await
    };
    let kernel_info = match kernel_info {
        Ok(kernel_info) => kernel_info,
        Err(e) => {
            log::error!("The kernel failed to start: {}", e);
            std::process::exit(1);
        }
    };
    print_banner(&kernel_info);

    // Route Ctrl-C to the kernel's interrupt path instead of exiting the
    // console. The notification is dropped unless an execution is waiting
    // on it.
    let interrupts = Arc::new(Event::new());
    {
        let interrupts = interrupts.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    break;
                }
                interrupts.notify(usize::MAX);
            }
        });
    }

    let (session, printer) = repl(session, printer, interrupts, pending_input).await;

    // Shut the kernel down unless it already exited or was adopted; adopted
    // kernels outlive the console unless :shutdown was used
    let status = session.state.read().await.status;
    if status != KernelStatus::Exited {
        if adopting {
            log::info!("Leaving adopted kernel running");
        } else if let Err(e) = session.shutdown().await {
            log::warn!("The kernel did not shut down cleanly: {}", e);
        }
    }
    if let Err(e) = session.dispose().await {
        log::warn!("Failed to remove session state: {}", e);
    }
    printer.abort();
}

/// Read lines from standard input and run them against the session until the
/// input ends or the user quits. Returns the session (which `:restart`
/// replaces) and the event printer so the caller can wind them down.
async fn repl(
    mut session: KernelSession,
    mut printer: JoinHandle<()>,
    interrupts: Arc<Event>,
    pending_input: PendingInput,
) -> (KernelSession, JoinHandle<()>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!(">>> ");
        let _ = std::io::stdout().flush();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::error!("Failed to read from standard input: {}", e);
                break;
            }
        };

        match line.trim() {
            "" => {}
            ":exit" | ":quit" => break,
            ":info" => match serde_json::to_string_pretty(&session.info().await) {
                Ok(info) => println!("{}", info),
                Err(e) => log::error!("Failed to format session info: {}", e),
            },
            ":interrupt" => {
                if let Err(e) = session.interrupt().await {
                    log::error!("Failed to interrupt the kernel: {}", e);
                }
            }
            ":restart" => {
                if session.options.argv.is_empty() {
                    log::error!("Adopted kernels cannot be restarted (no command line to relaunch)");
                    continue;
                }
                match session.restart().await {
                    Ok(successor) => {
                        printer.abort();
                        session = successor;
                        printer = spawn_printer(&session, pending_input.clone()).await;
                        println!("Kernel restarted");
                    }
                    Err(e) => log::error!("Failed to restart the kernel: {}", e),
                }
            }
            ":shutdown" => {
                if let Err(e) = session.shutdown().await {
                    log::error!("Failed to shut down the kernel: {}", e);
                }
                break;
            }
            code => {
                let code = code.to_string();
                let stdin_open =
                    run_execution(&session, code, &interrupts, &pending_input, &mut lines).await;
                if !stdin_open {
                    break;
                }
            }
        }
    }
    (session, printer)
}

/// Execute one line of code, answering any input requests the kernel makes
/// while it runs. Returns false if standard input closed during the
/// execution.
async fn run_execution(
    session: &KernelSession,
    code: String,
    interrupts: &Arc<Event>,
    pending_input: &PendingInput,
    lines: &mut Lines<BufReader<Stdin>>,
) -> bool {
    let execution =
        session.execute_interruptible(code, ExecutionMode::Interactive, interrupts.clone());
    tokio::pin!(execution);

    let mut stdin_open = true;
    let result = loop {
        tokio::select! {
            result = &mut execution => break result,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    // While an execution is in flight, typed lines answer the
                    // kernel's input requests
                    let parent = pending_input.lock().await.take();
                    match parent {
                        Some(parent) => {
                            if let Err(e) = session.reply_input(parent, line).await {
                                log::error!("Failed to reply to input request: {}", e);
                            }
                        }
                        None => log::debug!("Ignoring input typed during execution"),
                    }
                }
                _ => stdin_open = false,
            },
        }
    };

    match result {
        Ok(result) => log::debug!("Execution {} finished", result.execution_id),
        Err(e) => eprintln!("Execution failed: {}", e),
    }
    stdin_open
}

/// Subscribe to the session's events and print them in the background.
async fn spawn_printer(session: &KernelSession, pending_input: PendingInput) -> JoinHandle<()> {
    let events = session.subscribe().await;
    tokio::spawn(print_events(events, pending_input))
}

/// Print session events to the terminal as they arrive. Jupyter output is
/// written as plain text; kernel process output and lifecycle changes are
/// labeled.
async fn print_events(events: Receiver<SessionEvent>, pending_input: PendingInput) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(_) => break,
        };
        match event {
            SessionEvent::Kernel(KernelMessage::Status(update)) => match update.status {
                // Busy/idle churn is noise at a console; the exit code
                // arrives separately with more detail
                KernelStatus::Busy | KernelStatus::Idle | KernelStatus::Exited => {}
                status => match update.reason {
                    Some(reason) => println!("[kernel {} ({})]", status, reason),
                    None => println!("[kernel {}]", status),
                },
            },
            SessionEvent::Kernel(KernelMessage::Output(OutputStream::Stdout, text)) => {
                print!("{}", text);
                let _ = std::io::stdout().flush();
            }
            SessionEvent::Kernel(KernelMessage::Output(OutputStream::Stderr, text)) => {
                eprint!("{}", text);
            }
            SessionEvent::Kernel(KernelMessage::ExecutionQueued(execution_id)) => {
                log::debug!("Execution {} queued", execution_id);
            }
            SessionEvent::Kernel(KernelMessage::Exited(exit_code)) => {
                println!("[kernel exited with code {}]", exit_code);
            }
            SessionEvent::Jupyter(msg) => print_jupyter(msg, &pending_input).await,
        }
    }
}

/// Print the interesting parts of a Jupyter message: stream output, results,
/// errors, and input prompts.
async fn print_jupyter(msg: JupyterMessage, pending_input: &PendingInput) {
    match msg.header.msg_type.as_str() {
        "stream" => {
            let text = msg.content["text"].as_str().unwrap_or("");
            match msg.content["name"].as_str() {
                Some("stderr") => eprint!("{}", text),
                _ => {
                    print!("{}", text);
                    let _ = std::io::stdout().flush();
                }
            }
        }
        "execute_result" | "display_data" => {
            if let Some(text) = msg.content["data"]["text/plain"].as_str() {
                println!("{}", text);
            }
        }
        "error" => {
            // The traceback usually carries the kernel's own formatting;
            // print it as-is
            match msg.content["traceback"].as_array() {
                Some(traceback) if !traceback.is_empty() => {
                    for line in traceback {
                        eprintln!("{}", line.as_str().unwrap_or(""));
                    }
                }
                _ => eprintln!(
                    "{}: {}",
                    msg.content["ename"].as_str().unwrap_or("error"),
                    msg.content["evalue"].as_str().unwrap_or("")
                ),
            }
        }
        "input_request" => {
            let prompt = msg.content["prompt"].as_str().unwrap_or("");
            print!("{}", prompt);
            let _ = std::io::stdout().flush();
            *pending_input.lock().await = Some(msg.header);
        }
        _ => {
            log::trace!("Ignoring {} message", msg.header.msg_type);
        }
    }
}

/// Print the kernel's banner and identification from its kernel info reply.
fn print_banner(kernel_info: &serde_json::Value) {
    match serde_json::from_value::<KernelInfoReply>(kernel_info.clone()) {
        Ok(reply) => {
            if !reply.banner.is_empty() {
                println!("{}", reply.banner);
            }
            println!(
                "{} {} (Jupyter protocol {})",
                reply.language_info.name, reply.language_info.version, reply.protocol_version
            );
        }
        Err(e) => {
            // Print it raw rather than refusing to start
            log::debug!("Unparseable kernel info reply: {}", e);
            println!("{}", kernel_info);
        }
    }
    println!("Type :exit to quit; :interrupt, :restart, :shutdown, and :info are also available.");
}
