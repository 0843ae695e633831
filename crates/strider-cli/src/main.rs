//! `strider-cli` – Strider operator console
//!
//! This binary is the entry point for operating the robot. It:
//!
//! 1. Installs structured logging (see `strider_runtime::telemetry`).
//! 2. Checks for `~/.strider/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 3. Wires the state machine, the state feed and the command executor to a
//!    dry-run loopback control channel.
//! 4. Drops the operator into an **interactive REPL** with slash-commands.
//! 5. Intercepts **Ctrl-C** to publish a `SystemAlert` and exit.

mod config;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

use strider_kernel::StateMachine;
use strider_middleware::{ControlTransport, EventBus, LoopbackTransport, StateFeed, Topic};
use strider_runtime::CommandExecutor;
use strider_types::{Event, EventPayload};

/// Alert code published when the operator interrupts the console.
pub(crate) const OPERATOR_INTERRUPT: u32 = 911;

fn main() {
    let _telemetry = strider_runtime::init_tracing("strider");

    print_banner();

    let shutdown = Arc::new(AtomicBool::new(false));
    let bus = EventBus::default();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    let shutdown_ctrlc = shutdown.clone();
    let bus_ctrlc = bus.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        let alert = Event::new(
            "strider-cli",
            EventPayload::SystemAlert {
                code: OPERATOR_INTERRUPT,
                message: "operator interrupt".to_string(),
            },
        );
        if let Err(e) = bus_ctrlc.publish_to(Topic::SystemAlerts, alert) {
            eprintln!("failed to publish interrupt alert: {e}");
        }
        shutdown_ctrlc.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Ok(None) => run_first_run_wizard(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            config::Config::default()
        }
    };

    // ── Control core ──────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: {}", "Failed to start async runtime".red(), e);
            return;
        }
    };

    let transport = Arc::new(LoopbackTransport::new().with_auto_ack());
    let fsm = StateMachine::default().into_shared();
    let executor = Arc::new(CommandExecutor::new(
        transport.clone() as Arc<dyn ControlTransport>,
        fsm.clone(),
        bus.clone(),
        cfg.executor_config(),
    ));

    match StateFeed::subscribe(&*transport) {
        Ok(subscription) => {
            runtime.spawn(StateFeed::new(fsm, bus.clone()).run(subscription));
        }
        Err(e) => warn!(error = %e, "state feed unavailable"),
    }
    info!(robot = %cfg.robot_ip, "control channel running in dry-run mode");

    println!(
        "  Control channel: {} (loopback). Teach target: {}:{}",
        "dry run".yellow(),
        cfg.robot_ip.bold(),
        cfg.teach_port
    );
    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    repl::Shell::new(runtime, executor, transport, cfg, shutdown, bus).run();
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║      Strider First-Run Wizard        ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found. Let's set up Strider.\n");

    let mut cfg = config::Config::default();

    let ip = prompt_line(&format!("  Robot IP address [{}]: ", cfg.robot_ip), &cfg.robot_ip);
    if ip.parse::<std::net::IpAddr>().is_ok() {
        cfg.robot_ip = ip;
    } else {
        println!("  {} keeping {}", "Not an IP address;".yellow(), cfg.robot_ip);
    }

    let port = prompt_line(
        &format!("  Teach-mode UDP port [{}]: ", cfg.teach_port),
        &cfg.teach_port.to_string(),
    );
    if let Ok(p) = port.parse::<u16>() {
        cfg.teach_port = p;
    }

    let width = prompt_line(
        &format!("  Action-list record width, 36 or 76 [{}]: ", cfg.action_record_width),
        &cfg.action_record_width.to_string(),
    );
    match width.parse::<usize>() {
        Ok(w @ (36 | 76)) => cfg.action_record_width = w,
        _ => println!("  {} keeping {}", "Unsupported width;".yellow(), cfg.action_record_width),
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   _____ __       _     __         "#.bold().cyan());
    println!("{}", r#"  / ___// /______(_)___/ /__  _____"#.bold().cyan());
    println!("{}", r#"  \__ \/ __/ ___/ / __  / _ \/ ___/"#.bold().cyan());
    println!("{}", r#" ___/ / /_/ /  / / /_/ /  __/ /    "#.bold().cyan());
    println!("{}", r#"/____/\__/_/  /_/\__,_/\___/_/     "#.bold().cyan());
    println!();
    println!("  {} {}", "Strider".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Humanoid control console");
    println!();
}

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
