//! REPL – the Strider operator shell.
//!
//! Supported slash-commands:
//!   /help                     – show this list
//!   /state                    – current locomotion state and indicator
//!   /transitions              – states reachable from here
//!   /goto <state>             – confirmed locomotion-state change
//!   /feed <fsm_id>            – inject a state report (dry run)
//!   /move <x> <y> <z>         – velocity request, /stop for zero
//!   /gesture <id|name>        – run a gesture and wait for it
//!   /teach <sub>              – connect | list | play <idx|name> | stop | close
//!   /settings                 – show the active configuration
//!   /quit | /exit             – leave the shell

use colored::{ColoredString, Colorize};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use strider_kernel::{ConfirmationError, ConfirmationRequest, ESCAPE_HATCHES, OperatorConfirmation, StateMachine};
use strider_middleware::{EventBus, LoopbackTransport, Topic, TopicReceiver, channel};
use strider_runtime::operation::gesture;
use strider_runtime::{CommandExecutor, Wait};
use strider_teach::{ActionListEntry, KeepAlive, TeachSession};
use strider_types::{Event, EventPayload, FsmState, IndicatorColor, RobotState, SafetyAction};

use crate::OPERATOR_INTERRUPT;
use crate::config::Config;

/// One parsed shell line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Help,
    State,
    Transitions,
    Goto(FsmState),
    Feed(u16),
    Move { x: f32, y: f32, z: f32 },
    Stop,
    Gesture(u32),
    Teach(TeachCommand),
    Settings,
    Exit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TeachCommand {
    Connect,
    List,
    Play(PlayTarget),
    Stop,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayTarget {
    Index(u16),
    Name(String),
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let head = words.next().ok_or_else(|| "empty command".to_string())?;
        let args: Vec<&str> = words.collect();

        let cmd = match (head, args.as_slice()) {
            ("/help", []) => Command::Help,
            ("/state", []) => Command::State,
            ("/transitions", []) => Command::Transitions,
            ("/goto", [state]) => Command::Goto(state.parse().map_err(|e| format!("{e}"))?),
            ("/feed", [id]) => Command::Feed(id.parse().map_err(|_| format!("'{id}' is not an fsm id"))?),
            ("/move", [x, y, z]) => Command::Move {
                x: parse_f32(x)?,
                y: parse_f32(y)?,
                z: parse_f32(z)?,
            },
            ("/stop", []) => Command::Stop,
            ("/gesture", [g]) => Command::Gesture(match g.parse::<u32>() {
                Ok(id) => id,
                Err(_) => gesture::by_name(g).ok_or_else(|| format!("unknown gesture '{g}'"))?,
            }),
            ("/teach", ["connect"]) => Command::Teach(TeachCommand::Connect),
            ("/teach", ["list"]) => Command::Teach(TeachCommand::List),
            ("/teach", ["play", target]) => Command::Teach(TeachCommand::Play(match target.parse::<u16>() {
                Ok(idx) => PlayTarget::Index(idx),
                Err(_) => PlayTarget::Name(target.to_string()),
            })),
            ("/teach", ["stop"]) => Command::Teach(TeachCommand::Stop),
            ("/teach", ["close"]) => Command::Teach(TeachCommand::Close),
            ("/settings", []) => Command::Settings,
            ("/quit" | "/exit", []) => Command::Exit,
            _ => return Err(format!("unknown or malformed command '{line}'")),
        };
        Ok(cmd)
    }
}

fn parse_f32(s: &str) -> Result<f32, String> {
    s.parse::<f32>().map_err(|_| format!("'{s}' is not a number"))
}

struct TeachState {
    session: TeachSession,
    _keep_alive: KeepAlive,
    listing: Vec<ActionListEntry>,
}

/// Everything the shell drives.
pub struct Shell {
    pub runtime: Runtime,
    pub executor: Arc<CommandExecutor>,
    pub transport: Arc<LoopbackTransport>,
    pub config: Config,
    pub shutdown: Arc<AtomicBool>,
    bus: EventBus,
    alerts: TopicReceiver,
    teach: Option<TeachState>,
}

impl Shell {
    pub fn new(
        runtime: Runtime,
        executor: Arc<CommandExecutor>,
        transport: Arc<LoopbackTransport>,
        config: Config,
        shutdown: Arc<AtomicBool>,
        bus: EventBus,
    ) -> Self {
        let alerts = bus.subscribe_to(Topic::SystemAlerts);
        Self {
            runtime,
            executor,
            transport,
            config,
            shutdown,
            bus,
            alerts,
            teach: None,
        }
    }

    /// Read-eval loop. Returns when the operator exits, stdin closes or the
    /// shutdown flag is set.
    pub fn run(mut self) {
        let mut editor = match DefaultEditor::new() {
            Ok(editor) => editor,
            Err(e) => {
                eprintln!("{}: {}", "Cannot open line editor".red(), e);
                return;
            }
        };

        loop {
            self.drain_alerts();
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            let line = match editor.readline("strider> ") {
                Ok(line) => line,
                // The line editor owns the terminal, so Ctrl-C arrives here
                // instead of at the process signal handler.
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "Interrupted.".yellow());
                    self.interrupt();
                    break;
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    eprintln!("{}: {}", "Read error".red(), e);
                    break;
                }
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Err(e) = editor.add_history_entry(line) {
                debug!(error = %e, "history entry not recorded");
            }

            match Command::parse(line) {
                Ok(Command::Exit) => {
                    println!("{}", "Goodbye.".green());
                    self.shutdown.store(true, Ordering::SeqCst);
                    break;
                }
                Ok(cmd) => self.execute(cmd, &mut editor),
                Err(e) => println!(
                    "{} {}. Type {} for available commands.",
                    "Error:".red(),
                    e.yellow(),
                    "/help".bold()
                ),
            }
        }

        if let Some(teach) = self.teach.take() {
            self.close_teach(teach);
        }
    }

    fn interrupt(&self) {
        let alert = Event::new(
            "strider-cli",
            EventPayload::SystemAlert {
                code: OPERATOR_INTERRUPT,
                message: "operator interrupt".to_string(),
            },
        );
        if let Err(e) = self.bus.publish_to(Topic::SystemAlerts, alert) {
            warn!(error = %e, "failed to publish interrupt alert");
        }
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// Print alerts published since the last prompt.
    fn drain_alerts(&mut self) {
        while let Ok(event) = self.alerts.try_recv() {
            if let EventPayload::SystemAlert { code, message } = event.payload {
                println!("  {} [{}] {}", "alert".red().bold(), code, message);
            }
        }
    }

    fn execute(&mut self, cmd: Command, editor: &mut DefaultEditor) {
        match cmd {
            Command::Help => cmd_help(),
            Command::State => print_state(&self.executor.state()),
            Command::Transitions => self.cmd_transitions(),
            Command::Goto(target) => self.cmd_goto(target, editor),
            Command::Feed(id) => self.cmd_feed(id),
            Command::Move { x, y, z } => match self.runtime.block_on(self.executor.set_velocity(x, y, z)) {
                Ok(t) => println!(
                    "  {} forward {:.2}  lateral {:.2}  turn {:.2}",
                    "sent".green(),
                    t.forward,
                    t.lateral,
                    t.turn
                ),
                Err(e) => println!("  {} {}", "refused:".red(), e),
            },
            Command::Stop => match self.runtime.block_on(self.executor.stop_motion()) {
                Ok(()) => println!("  {}", "zero velocity sent".green()),
                Err(e) => println!("  {} {}", "failed:".red(), e),
            },
            Command::Gesture(id) => {
                let wait = Wait::UpTo(self.executor.config().action_timeout);
                match self.runtime.block_on(self.executor.execute_gesture(id, wait)) {
                    Ok(outcome) => println!("  gesture {id}: {}", outcome.to_string().bold()),
                    Err(e) => println!("  {} {}", "refused:".red(), e),
                }
            }
            Command::Teach(sub) => self.cmd_teach(sub),
            Command::Settings => cmd_settings(&self.config),
            Command::Exit => {}
        }
    }

    fn cmd_transitions(&self) {
        let allowed = self.executor.state_machine().lock().allowed_transitions();
        println!("{}", "Reachable states".bold().underline());
        for state in allowed {
            let marker = if state.is_escape_hatch() { " (escape hatch)".dimmed() } else { "".normal() };
            println!("  {}{}", state.to_string().cyan(), marker);
        }
    }

    fn cmd_goto(&self, target: FsmState, editor: &mut DefaultEditor) {
        let notice = transition_notice(&self.executor.state_machine().lock(), target);
        if let Some(notice) = &notice {
            // Confirming still sends the request; the table is advisory.
            println!("  {} {}", "warning:".yellow().bold(), notice);
        }
        let action = SafetyAction::Transition(target);
        let token = match OperatorConfirmation::confirm_from_env(action) {
            Ok(token) => token,
            Err(ConfirmationError::EnvNotSet { .. }) => {
                let request = ConfirmationRequest::new(action);
                let prompt = match &notice {
                    Some(_) => format!("[outside table] {}", request.prompt()),
                    None => request.prompt(),
                };
                let typed = match editor.readline(&prompt) {
                    Ok(line) => line,
                    Err(_) => {
                        println!("  {}", "cancelled".yellow());
                        return;
                    }
                };
                match request.accept(&typed) {
                    Ok(token) => token,
                    Err(e) => {
                        println!("  {} {}", "not confirmed:".red(), e);
                        return;
                    }
                }
            }
            Err(e) => {
                println!("  {} {}", "not confirmed:".red(), e);
                return;
            }
        };

        match self.runtime.block_on(self.executor.set_fsm_state(target, token)) {
            Ok(state) => print_state(&state),
            Err(e) => println!("  {} {}", "failed:".red(), e),
        }
    }

    fn cmd_feed(&self, fsm_id: u16) {
        let mut changes = self.executor.state_machine().lock().subscribe();
        let delivered = self
            .transport
            .inject(channel::SPORT_MODE_STATE, json!({ "data": { "fsm_id": fsm_id } }));
        if delivered == 0 {
            println!("  {}", "state feed is not running".yellow());
            return;
        }
        let waited = self
            .runtime
            .block_on(tokio::time::timeout(Duration::from_millis(200), changes.recv()));
        if waited.is_err() {
            println!("  {}", "no state change recorded".dimmed());
        }
        print_state(&self.executor.state());
    }

    fn cmd_teach(&mut self, sub: TeachCommand) {
        match sub {
            TeachCommand::Connect => self.teach_connect(),
            TeachCommand::Close => match self.teach.take() {
                Some(teach) => self.close_teach(teach),
                None => println!("  {}", "no teach session".yellow()),
            },
            other => {
                let Some(teach) = self.teach.as_mut() else {
                    println!("  {} run {} first", "no teach session;".yellow(), "/teach connect".bold());
                    return;
                };
                let result = self.runtime.block_on(async move {
                    match other {
                        TeachCommand::List => {
                            teach.listing = teach.session.query_actions().await?;
                            for entry in &teach.listing {
                                println!("  {:>3}  {}", entry.index, entry.name.cyan());
                            }
                            if teach.listing.is_empty() {
                                println!("  {}", "no stored actions".dimmed());
                            }
                        }
                        TeachCommand::Play(PlayTarget::Index(idx)) => {
                            teach.session.play(idx).await?;
                            println!("  playing action {idx}");
                        }
                        TeachCommand::Play(PlayTarget::Name(name)) => {
                            let idx = teach.session.play_by_name(&name, &teach.listing).await?;
                            println!("  playing '{name}' (index {idx})");
                        }
                        TeachCommand::Stop => {
                            teach.session.stop().await?;
                            println!("  stop sent");
                        }
                        TeachCommand::Connect | TeachCommand::Close => {}
                    }
                    Ok::<(), strider_teach::TeachError>(())
                });
                if let Err(e) = result {
                    println!("  {} {}", "teach error:".red(), e);
                }
            }
        }
    }

    fn teach_connect(&mut self) {
        if self.teach.is_some() {
            println!("  {}", "teach session already open".yellow());
            return;
        }
        let teach_config = match self.config.teach_config() {
            Ok(c) => c,
            Err(e) => {
                println!("  {} {}", "config error:".red(), e);
                return;
            }
        };
        let robot = teach_config.robot_addr;
        let opened = self.runtime.block_on(async move {
            let session = TeachSession::connect(teach_config).await?;
            session.handshake().await?;
            let keep_alive = session.start_keep_alive();
            Ok::<_, strider_teach::TeachError>((session, keep_alive))
        });
        match opened {
            Ok((session, keep_alive)) => {
                info!(%robot, "teach session opened");
                println!("  {} {}", "teach session open to".green(), robot.to_string().bold());
                self.teach = Some(TeachState {
                    session,
                    _keep_alive: keep_alive,
                    listing: Vec::new(),
                });
            }
            Err(e) => println!("  {} {}", "connect failed:".red(), e),
        }
    }

    fn close_teach(&self, teach: TeachState) {
        if let Err(e) = self.runtime.block_on(teach.session.stop()) {
            warn!(error = %e, "stop on close failed");
        }
        drop(teach);
        println!("  {}", "teach session closed".green());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output helpers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_help() {
    println!();
    println!("{}", "Strider Commands".bold().underline());
    println!("  {}                – locomotion state and indicator", "/state".bold().cyan());
    println!("  {}          – states reachable from here", "/transitions".bold().cyan());
    println!("  {}         – confirmed state change", "/goto <state>".bold().cyan());
    println!("  {}        – inject a state report (dry run)", "/feed <fsm_id>".bold().cyan());
    println!("  {}     – velocity in m/s and rad/s", "/move <x> <y> <z>".bold().cyan());
    println!("  {}                 – zero velocity", "/stop".bold().cyan());
    println!("  {}    – run a gesture", "/gesture <id|name>".bold().cyan());
    println!("  {}        – open a teach session", "/teach connect".bold().cyan());
    println!("  {}           – list taught actions", "/teach list".bold().cyan());
    println!("  {} – replay a taught action", "/teach play <idx|name>".bold().cyan());
    println!("  {}  – stop playback / close session", "/teach stop|close".bold().cyan());
    println!("  {}             – show configuration", "/settings".bold().cyan());
    println!("  {}          – exit", "/quit  /exit".bold().cyan());
    println!();
}

fn indicator(color: IndicatorColor) -> ColoredString {
    match color {
        IndicatorColor::Purple => "●".purple(),
        IndicatorColor::Orange => "●".yellow(),
        IndicatorColor::Green => "●".green(),
        IndicatorColor::Blue => "●".bright_blue(),
        IndicatorColor::DarkBlue => "●".blue(),
        IndicatorColor::Red => "●".red(),
    }
}

fn print_state(state: &RobotState) {
    println!(
        "  {} {}  sub-mode {}",
        indicator(state.effective_indicator()),
        state.locomotion_state.to_string().bold(),
        state.sub_mode.map_or_else(|| "-".to_string(), |m| m.to_string()).dimmed()
    );
    if let Some(err) = &state.error {
        println!("  {} {}", "error:".red(), err);
    }
}

fn cmd_settings(cfg: &Config) {
    println!("{}", "Settings".bold().underline());
    println!("  robot_ip            : {}", cfg.robot_ip.yellow());
    println!("  teach_port          : {}", cfg.teach_port.to_string().yellow());
    println!("  keep_alive_ms       : {}", cfg.keep_alive_ms.to_string().yellow());
    println!("  action_record_width : {}", cfg.action_record_width.to_string().yellow());
    println!("  reply_timeout_ms    : {}", cfg.reply_timeout_ms.to_string().yellow());
    println!("  gesture_timeout_ms  : {}", cfg.gesture_timeout_ms.to_string().yellow());
    println!("  deadband            : {}", cfg.deadband.to_string().yellow());
    println!("  velocity_route      : {:?}", cfg.velocity_route);
    println!("  Edit {} to change.", crate::config::config_path().display().to_string().bold());
}

/// Warning shown before confirming a transition the table does not list.
fn transition_notice(fsm: &StateMachine, target: FsmState) -> Option<String> {
    fsm.check_transition(target).err().map(|e| {
        format!(
            "{e}; outside table; escape hatches: {}",
            ESCAPE_HATCHES.map(FsmState::name).join("/")
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn goto_outside_table_is_flagged_before_confirming() {
        let mut fsm = StateMachine::default();
        fsm.update_state(FsmState::Sit, None, None);

        let notice = transition_notice(&fsm, FsmState::Run).expect("Sit to Run is not listed");
        assert!(notice.contains("outside table"));
        assert!(notice.contains("escape hatches"));
        assert!(notice.contains("RUN(801)"));
        assert_eq!(transition_notice(&fsm, FsmState::Damp), None);
        assert_eq!(transition_notice(&fsm, FsmState::ZeroTorque), None);
    }

    #[test]
    fn parses_state_commands() {
        assert_eq!(Command::parse("/goto damp"), Ok(Command::Goto(FsmState::Damp)));
        assert_eq!(Command::parse("/goto 500"), Ok(Command::Goto(FsmState::LockStand)));
        assert!(Command::parse("/goto 12345").is_err());
        assert_eq!(Command::parse("/feed 801"), Ok(Command::Feed(801)));
    }

    #[test]
    fn parses_motion_commands() {
        assert_eq!(
            Command::parse("/move 0.5 0 -0.2"),
            Ok(Command::Move { x: 0.5, y: 0.0, z: -0.2 })
        );
        assert!(Command::parse("/move 0.5 0").is_err());
        assert!(Command::parse("/move a b c").is_err());
        assert_eq!(Command::parse("/gesture 26"), Ok(Command::Gesture(26)));
        assert_eq!(Command::parse("/gesture high_wave"), Ok(Command::Gesture(26)));
        assert!(Command::parse("/gesture moonwalk").is_err());
    }

    #[test]
    fn parses_teach_commands() {
        assert_eq!(
            Command::parse("/teach play 3"),
            Ok(Command::Teach(TeachCommand::Play(PlayTarget::Index(3))))
        );
        assert_eq!(
            Command::parse("/teach play wave"),
            Ok(Command::Teach(TeachCommand::Play(PlayTarget::Name("wave".into()))))
        );
        assert_eq!(Command::parse("/teach close"), Ok(Command::Teach(TeachCommand::Close)));
        assert!(Command::parse("/teach dance").is_err());
    }

    #[test]
    fn unknown_and_exit() {
        assert_eq!(Command::parse("  /exit "), Ok(Command::Exit));
        assert_eq!(Command::parse("/quit"), Ok(Command::Exit));
        assert!(Command::parse("/models").is_err());
        assert!(Command::parse("").is_err());
    }
}
