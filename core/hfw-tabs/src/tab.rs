//! One interactive tab.
//!
//! The main loop owns the coordinator and wakes at least once per poll
//! interval. A reader thread turns stdin lines into [`TabCommand`]s; EOF
//! counts as closing the tab.

use std::io::{self, BufRead};
use std::str::FromStr;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use hfw_session::{
    ChannelModalHost, CoordinatorState, DialogResponder, FrameStores, LivenessConfig, ModalEvent,
    SnapInState, SystemClock, TabStorage, TimeoutCoordinator, UnloadDecision,
};

use crate::scope::{self, ScopeArgs};

const FRAME_ID: &str = "main";
const SNAP_IN_ID: &str = "editor";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabCommand {
    Activity,
    Yes,
    No,
    Dirty,
    Clean,
    Close,
}

impl FromStr for TabCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "activity" | "a" => Ok(TabCommand::Activity),
            "yes" | "y" => Ok(TabCommand::Yes),
            "no" | "n" => Ok(TabCommand::No),
            "dirty" => Ok(TabCommand::Dirty),
            "clean" => Ok(TabCommand::Clean),
            "close" | "quit" | "q" => Ok(TabCommand::Close),
            other => Err(format!(
                "Unknown command '{}' (activity, yes, no, dirty, clean, close)",
                other
            )),
        }
    }
}

/// The single frame this tab hosts, with one editor snap-in.
#[derive(Debug, Default)]
struct EditorFrame {
    dirty: bool,
}

impl FrameStores for EditorFrame {
    fn snap_ins(&self, frame_id: &str) -> Vec<SnapInState> {
        if frame_id != FRAME_ID {
            return Vec::new();
        }
        vec![SnapInState {
            id: SNAP_IN_ID.to_string(),
            is_tab_visible: true,
            dirty: self.dirty,
        }]
    }
}

/// Terminal-side state of the open dialog.
#[derive(Default)]
struct Prompt {
    responder: Option<DialogResponder>,
    last_shown: Option<u64>,
}

impl Prompt {
    fn answer(&mut self, stay: bool) {
        match &self.responder {
            Some(responder) => {
                let sent = if stay {
                    responder.stay()
                } else {
                    responder.log_off()
                };
                if !sent {
                    println!("The dialog already closed.");
                }
            }
            None => println!("No dialog is open."),
        }
    }

    fn drain(&mut self, events: &Receiver<ModalEvent>) {
        for event in events.try_iter() {
            match event {
                ModalEvent::Shown { request, responder } => {
                    println!(
                        "Are you still there? Answer yes or no within {}s.",
                        request.countdown.as_secs()
                    );
                    self.responder = Some(responder);
                    self.last_shown = Some(request.countdown.as_secs());
                }
                ModalEvent::Hidden => {
                    self.responder = None;
                    self.last_shown = None;
                }
            }
        }
    }

    fn countdown(&mut self, seconds_left: Option<u64>) {
        let Some(left) = seconds_left else {
            return;
        };
        if self.last_shown == Some(left) {
            return;
        }
        self.last_shown = Some(left);
        if left % 10 == 0 || left <= 5 {
            println!("  {}s left", left);
        }
    }
}

pub fn run(
    config: &LivenessConfig,
    minutes: i64,
    unified_logout: bool,
    args: &ScopeArgs,
) -> Result<(), String> {
    let page = args.page();
    let store = scope::open_store(config, page.scope())?;
    let (modal, modal_events) = ChannelModalHost::new();
    let mut coordinator = TimeoutCoordinator::new(
        store,
        TabStorage::new(),
        Arc::new(SystemClock),
        Box::new(modal),
        config.clone(),
    );
    let logout = coordinator.subscribe_logout();

    coordinator.start_timeout(minutes, unified_logout)?;
    let session = coordinator.snapshot()?;
    println!(
        "Tab {} joined {}{} ({} open, {} active)",
        coordinator.tab_id(),
        page.scope().domain,
        page.scope().path,
        session.tab_counter(),
        session.tab_counter_active()
    );
    if coordinator.state() == CoordinatorState::Idle {
        println!("Inactivity timeout disabled.");
    }

    let commands = spawn_stdin_reader();
    let mut frame = EditorFrame::default();
    let mut prompt = Prompt::default();

    loop {
        match commands.recv_timeout(next_wait(&coordinator, config)) {
            Ok(TabCommand::Close) | Err(RecvTimeoutError::Disconnected) => break,
            Ok(TabCommand::Activity) => {
                keep_going("refresh_timeout", coordinator.refresh_timeout())
            }
            Ok(TabCommand::Yes) => prompt.answer(true),
            Ok(TabCommand::No) => prompt.answer(false),
            Ok(TabCommand::Dirty) => frame.dirty = true,
            Ok(TabCommand::Clean) => frame.dirty = false,
            Err(RecvTimeoutError::Timeout) => {}
        }

        keep_going("pump", coordinator.pump());
        prompt.drain(&modal_events);
        prompt.countdown(coordinator.dialog_seconds_left());

        match logout.try_recv() {
            Ok(false) => println!("Staying signed in."),
            Ok(true) => println!("Logged out after inactivity."),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
        }
        if coordinator.state() == CoordinatorState::LoggedOut {
            break;
        }
    }

    let decision = page.before_unload(&mut coordinator, &frame, FRAME_ID);
    info!(tab = %coordinator.tab_id(), decision = ?decision, "Tab closed");
    match decision {
        UnloadDecision::Proceed => println!("Tab closed."),
        UnloadDecision::Confirm => println!("Tab closed with unsaved changes (leave site?)."),
    }
    Ok(())
}

/// Logs a failed store update; the next tick retries it.
fn keep_going(op: &str, result: hfw_session::Result<()>) {
    if let Err(err) = result {
        warn!(op, error = %err, "Shared session update failed, retrying next tick");
        eprintln!("Warning: {} failed: {}", op, err);
    }
}

/// Sleeps until the next coordinator deadline, capped at one poll interval.
fn next_wait(coordinator: &TimeoutCoordinator, config: &LivenessConfig) -> Duration {
    let interval = config.poll_interval();
    coordinator
        .next_deadline()
        .and_then(|deadline| (deadline - Utc::now()).to_std().ok())
        .map_or(interval, |until| until.min(interval))
}

fn spawn_stdin_reader() -> Receiver<TabCommand> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!(error = %err, "Failed to read stdin");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<TabCommand>() {
                Ok(command) => {
                    debug!(command = ?command, "Tab command");
                    if tx.send(command).is_err() {
                        return;
                    }
                }
                Err(message) => println!("{}", message),
            }
        }
        let _ = tx.send(TabCommand::Close);
    });
    rx
}
