//! Inactivity timeout coordinator: one per tab.
//!
//! # States
//!
//! ```text
//! Idle ──start_timeout──▶ Armed ──timer──▶ Polling ──elected──▶ DialogShown
//!                          ▲  ▲               │                   │    │
//!                          │  └─false alarm───┘                   │    │
//!                          └──────────────Yes (Resumed)───────────┘    │
//!                                        No / Nothing / failure ──▶ LoggedOut
//! ```
//!
//! Nothing here sleeps or spawns. Deadlines are plain timestamps and the
//! driver calls [`TimeoutCoordinator::pump`] at least once per poll interval;
//! leaving a state drops its deadline, so a stale timer can never fire into
//! the next state.
//!
//! # Poll Branches
//!
//! While polling, each tick reads the shared session and takes the first
//! matching branch, all inside one atomic update:
//!
//! 1. Some tab already logged the session out: follow it.
//! 2. This tab vanished from the set (pruned, reset): rejoin and re-arm.
//! 3. This tab is active again (a reload normalized the set, or another tab
//!    answered "stay"): false alarm, re-arm.
//! 4. Another tab owns the dialog, some tab is still active, or another tab
//!    wins the election: keep polling.
//! 5. This tab wins the election: show the dialog.
//!
//! In unified-logout mode none of this runs: the timer firing logs the tab
//! out without asking.
//!
//! # Commit Order
//!
//! Answering the dialog writes the shared session first. Only once that
//! update lands does the tab re-arm or log out; a failed write keeps the
//! answer and retries it on the next pump.
//!
//! # Logout Signal
//!
//! [`TimeoutCoordinator::subscribe_logout`] hands out receivers. `false`
//! means "stay, no real logout"; `true` is sent once, at the real logout,
//! after which every receiver disconnects.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::clock::{to_chrono, Clock};
use crate::config::LivenessConfig;
use crate::dialog::{DialogPoll, DialogRequest, DialogResult, ModalHost, TimeoutDialog};
use crate::error::Result;
use crate::registry::{self, ClaimOutcome, TabRegistry, UnregisterOutcome};
use crate::storage::{transact, SessionKey, SharedSession, SharedStore, TabId, TabStorage};

static INSTANCES: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Armed,
    Polling,
    DialogShown,
    LoggedOut,
}

enum Phase {
    Idle,
    Armed { deadline: DateTime<Utc> },
    Polling { next_check: DateTime<Utc> },
    DialogShown {
        dialog: TimeoutDialog,
        /// An answer whose shared update has not landed yet.
        answered: Option<DialogResult>,
    },
    LoggedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PollDecision {
    FollowLogout,
    Rejoined,
    FalseAlarm,
    Wait(ClaimOutcome),
    ShowDialog,
}

enum Due {
    Nothing,
    TimerFired,
    PollTick,
    Dialog(DialogPoll),
}

#[derive(Default)]
struct LogoutSignal {
    subscribers: Vec<Sender<bool>>,
    completed: bool,
}

impl LogoutSignal {
    fn subscribe(&mut self) -> Receiver<bool> {
        let (tx, rx) = mpsc::channel();
        if !self.completed {
            self.subscribers.push(tx);
        }
        rx
    }

    fn emit(&mut self, logout: bool) {
        if self.completed {
            return;
        }
        self.subscribers.retain(|tx| tx.send(logout).is_ok());
    }

    fn complete(&mut self) {
        if self.completed {
            return;
        }
        self.emit(true);
        self.completed = true;
        self.subscribers.clear();
    }
}

pub struct TimeoutCoordinator {
    registry: TabRegistry,
    storage: TabStorage,
    clock: Arc<dyn Clock>,
    modal: Box<dyn ModalHost>,
    config: LivenessConfig,
    timeout_value: Option<Duration>,
    unified_logout: bool,
    phase: Phase,
    logout: LogoutSignal,
}

impl TimeoutCoordinator {
    pub fn new(
        store: Arc<dyn SharedStore>,
        mut storage: TabStorage,
        clock: Arc<dyn Clock>,
        modal: Box<dyn ModalHost>,
        config: LivenessConfig,
    ) -> Self {
        let id = storage.ensure_tab_id();
        let instances = INSTANCES.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(tab = %id, instances, "Timeout coordinator created");
        TimeoutCoordinator {
            registry: TabRegistry::new(id, store),
            storage,
            clock,
            modal,
            config,
            timeout_value: None,
            unified_logout: false,
            phase: Phase::Idle,
            logout: LogoutSignal::default(),
        }
    }

    /// Coordinators constructed in this process so far.
    pub fn instances() -> usize {
        INSTANCES.load(Ordering::Relaxed)
    }

    pub fn tab_id(&self) -> &TabId {
        self.registry.id()
    }

    pub fn state(&self) -> CoordinatorState {
        match self.phase {
            Phase::Idle => CoordinatorState::Idle,
            Phase::Armed { .. } => CoordinatorState::Armed,
            Phase::Polling { .. } => CoordinatorState::Polling,
            Phase::DialogShown { .. } => CoordinatorState::DialogShown,
            Phase::LoggedOut => CoordinatorState::LoggedOut,
        }
    }

    pub fn storage(&self) -> &TabStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut TabStorage {
        &mut self.storage
    }

    pub fn timeout_value(&self) -> Option<Duration> {
        self.timeout_value
    }

    pub fn snapshot(&self) -> Result<SharedSession> {
        self.registry.snapshot()
    }

    /// Seconds left on the open dialog's countdown.
    pub fn dialog_seconds_left(&self) -> Option<u64> {
        match &self.phase {
            Phase::DialogShown { dialog, .. } => Some(dialog.seconds_left(self.clock.now())),
            _ => None,
        }
    }

    pub fn subscribe_logout(&mut self) -> Receiver<bool> {
        self.logout.subscribe()
    }

    /// Registers this tab and arms the inactivity timer.
    ///
    /// A non-positive timeout disables the timer entirely.
    pub fn start_timeout(&mut self, inactivity_minutes: i64, unified_logout: bool) -> Result<()> {
        if matches!(self.phase, Phase::LoggedOut) {
            debug!(tab = %self.tab_id(), "start_timeout ignored after logout");
            return Ok(());
        }
        if inactivity_minutes <= 0 {
            info!(
                tab = %self.tab_id(),
                inactivity_minutes,
                "Inactivity timeout disabled"
            );
            return Ok(());
        }

        let timeout = Duration::from_millis((inactivity_minutes as u64).saturating_mul(60_000));
        self.timeout_value = Some(timeout);
        self.unified_logout = unified_logout;

        let now = self.clock.now();
        if self.storage.get(SessionKey::RefreshTab) {
            info!(tab = %self.tab_id(), "Rejoining session after reload");
            self.storage.remove(SessionKey::RefreshTab);
        }
        self.registry.register_tab(now)?;
        self.storage.set(SessionKey::ActiveState, true);
        self.storage.set(SessionKey::ShowModal, false);
        self.arm(now);

        info!(
            tab = %self.tab_id(),
            timeout_ms = timeout.as_millis() as u64,
            unified_logout,
            "start_timeout"
        );
        Ok(())
    }

    /// Restarts this tab's inactivity clock after user activity.
    pub fn refresh_timeout(&mut self) -> Result<()> {
        let now = self.clock.now();
        match self.phase {
            Phase::Armed { .. } => {
                self.arm(now);
                Ok(())
            }
            Phase::Polling { .. } => {
                self.arm(now);
                self.storage.set(SessionKey::ActiveState, true);
                self.registry.mark_tab_active()?;
                info!(tab = %self.tab_id(), "Tab active again, polling stopped");
                Ok(())
            }
            Phase::DialogShown { .. } => {
                debug!(tab = %self.tab_id(), "refresh_timeout ignored while dialog is open");
                Ok(())
            }
            Phase::Idle | Phase::LoggedOut => Ok(()),
        }
    }

    /// Fires whatever deadline has passed. Call at least once per poll interval.
    pub fn pump(&mut self) -> Result<()> {
        if matches!(self.phase, Phase::Idle | Phase::LoggedOut) {
            return Ok(());
        }

        let now = self.clock.now();
        let armed = matches!(self.phase, Phase::Armed { .. });
        self.registry
            .touch(now, self.config.stale_tab_after(), armed)?;

        let due = match &mut self.phase {
            Phase::Armed { deadline } if now >= *deadline => Due::TimerFired,
            Phase::Polling { next_check } if now >= *next_check => Due::PollTick,
            Phase::DialogShown {
                answered: Some(result),
                ..
            } => Due::Dialog(DialogPoll::Resolved(*result)),
            Phase::DialogShown { dialog, .. } => match dialog.poll(now) {
                DialogPoll::Pending => Due::Nothing,
                poll => Due::Dialog(poll),
            },
            _ => Due::Nothing,
        };

        match due {
            Due::Nothing => Ok(()),
            Due::TimerFired => self.on_inactive(now),
            Due::PollTick => self.check_for_show_dialog(now),
            Due::Dialog(poll) => {
                let result = match poll {
                    DialogPoll::Resolved(result) => result,
                    _ => {
                        warn!(tab = %self.tab_id(), "Timeout dialog closed without an answer");
                        DialogResult::No
                    }
                };
                let outcome = self.resolve_dialog(result);
                if outcome.is_err() {
                    if let Phase::DialogShown { answered, .. } = &mut self.phase {
                        *answered = Some(result);
                    }
                }
                outcome
            }
        }
    }

    /// Unload teardown: leaves the shared session.
    pub fn unregister_tab(&mut self) -> Result<UnregisterOutcome> {
        if matches!(self.phase, Phase::DialogShown { .. }) {
            self.modal.hide();
        }
        if !matches!(self.phase, Phase::LoggedOut) {
            self.phase = Phase::Idle;
        }

        let outcome = self.registry.unregister_tab()?;
        match outcome {
            UnregisterOutcome::Remaining { .. } => self.storage.set(SessionKey::RefreshTab, true),
            UnregisterOutcome::LastTabClosed | UnregisterOutcome::NotRegistered => {
                self.storage.clear()
            }
        }
        Ok(outcome)
    }

    /// Earliest instant at which [`pump`](Self::pump) has work to do.
    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        match &self.phase {
            Phase::Armed { deadline } => Some(*deadline),
            Phase::Polling { next_check } => Some(*next_check),
            Phase::DialogShown { dialog, .. } => Some(dialog.deadline()),
            Phase::Idle | Phase::LoggedOut => None,
        }
    }

    fn arm(&mut self, now: DateTime<Utc>) {
        let timeout = self.timeout_value.unwrap_or_default();
        let deadline = now
            .checked_add_signed(to_chrono(timeout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.phase = Phase::Armed { deadline };
    }

    fn on_inactive(&mut self, now: DateTime<Utc>) -> Result<()> {
        info!(tab = %self.tab_id(), unified_logout = self.unified_logout, "Inactivity timer fired");
        self.phase = Phase::Polling { next_check: now };
        self.storage.set(SessionKey::ActiveState, false);
        self.registry.mark_tab_inactive(now)?;
        self.check_for_show_dialog(now)
    }

    /// One poll tick. In unified-logout mode the tab is past its timeout, so
    /// every tick (the first included) is a logout attempt.
    fn check_for_show_dialog(&mut self, now: DateTime<Utc>) -> Result<()> {
        self.phase = Phase::Polling {
            next_check: now + to_chrono(self.config.poll_interval()),
        };
        if self.unified_logout {
            info!(tab = %self.tab_id(), "check_for_show_dialog: unified logout, no dialog");
            return self.unified_log_out();
        }

        let id = self.tab_id().clone();
        let decision = transact(self.registry.store(), |session| {
            poll_decision(session, &id, now)
        })?;

        match decision {
            PollDecision::FollowLogout => {
                info!(tab = %id, "check_for_show_dialog: session logged out by another tab");
                self.storage.set(SessionKey::ShowModal, false);
                self.storage.set(SessionKey::TimerLogOff, true);
                self.finish_logout();
                Ok(())
            }
            PollDecision::Rejoined | PollDecision::FalseAlarm => {
                info!(tab = %id, decision = ?decision, "check_for_show_dialog: tab active, re-arming");
                self.storage.set(SessionKey::ActiveState, true);
                self.arm(now);
                Ok(())
            }
            PollDecision::Wait(reason) => {
                debug!(tab = %id, reason = ?reason, "check_for_show_dialog: waiting");
                Ok(())
            }
            PollDecision::ShowDialog => {
                info!(tab = %id, "check_for_show_dialog: elected to show dialog");
                self.storage.set(SessionKey::ShowModal, true);
                self.open_dialog(now)
            }
        }
    }

    fn open_dialog(&mut self, now: DateTime<Utc>) -> Result<()> {
        let countdown = self.config.dialog_timeout();
        let (dialog, responder) = TimeoutDialog::open(now, countdown);
        match self.modal.show(&DialogRequest { countdown }, responder) {
            Ok(()) => {
                info!(tab = %self.tab_id(), countdown_secs = countdown.as_secs(), "Timeout dialog shown");
                self.phase = Phase::DialogShown {
                    dialog,
                    answered: None,
                };
                Ok(())
            }
            Err(err) => {
                warn!(tab = %self.tab_id(), error = %err, "Timeout dialog failed to open");
                self.log_out_after_dialog()
            }
        }
    }

    fn resolve_dialog(&mut self, result: DialogResult) -> Result<()> {
        info!(tab = %self.tab_id(), result = ?result, "Timeout dialog answered");

        match result {
            DialogResult::Yes => {
                let id = self.tab_id().clone();
                transact(self.registry.store(), |session| {
                    registry::release_dialog(session, &id);
                    registry::activate_all(session);
                })?;

                self.modal.hide();
                let now = self.clock.now();
                self.arm(now);
                self.storage.set(SessionKey::ShowModal, false);
                self.storage.set(SessionKey::ActiveState, true);
                self.logout.emit(false);
                Ok(())
            }
            DialogResult::No | DialogResult::Nothing => self.log_out_after_dialog(),
        }
    }

    fn log_out_after_dialog(&mut self) -> Result<()> {
        let id = self.tab_id().clone();
        transact(self.registry.store(), |session| {
            registry::release_dialog(session, &id);
            registry::request_logout(session);
        })?;

        if matches!(self.phase, Phase::DialogShown { .. }) {
            self.modal.hide();
        }
        self.storage.set(SessionKey::ShowModal, false);
        self.storage.set(SessionKey::TimerLogOff, true);
        self.finish_logout();
        Ok(())
    }

    fn unified_log_out(&mut self) -> Result<()> {
        let id = self.tab_id().clone();
        transact(self.registry.store(), |session| {
            registry::release_dialog(session, &id);
            session.show_modal = Some(false);
            registry::request_logout(session);
        })?;

        self.storage.set(SessionKey::ShowModal, false);
        self.storage.set(SessionKey::TimerLogOff, true);
        self.finish_logout();
        Ok(())
    }

    fn finish_logout(&mut self) {
        self.phase = Phase::LoggedOut;
        self.logout.complete();
        info!(tab = %self.tab_id(), "Logged out after inactivity");
    }
}

fn poll_decision(session: &mut SharedSession, id: &TabId, now: DateTime<Utc>) -> PollDecision {
    if session.logout_requested {
        return PollDecision::FollowLogout;
    }
    if !session.contains(id) {
        registry::register(session, id, now);
        return PollDecision::Rejoined;
    }
    if session.is_active(id) {
        return PollDecision::FalseAlarm;
    }
    match registry::claim_dialog(session, id) {
        ClaimOutcome::Claimed | ClaimOutcome::AlreadyOwned => PollDecision::ShowDialog,
        other => PollDecision::Wait(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::dialog::{ChannelModalHost, DialogResponder, ModalEvent};
    use crate::error::HfwError;
    use crate::storage::MemorySharedStore;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc::TryRecvError;

    struct Tab {
        coordinator: TimeoutCoordinator,
        events: Receiver<ModalEvent>,
    }

    impl Tab {
        fn responder(&self) -> Option<DialogResponder> {
            self.events.try_iter().find_map(|event| match event {
                ModalEvent::Shown { responder, .. } => Some(responder),
                ModalEvent::Hidden => None,
            })
        }
    }

    fn config() -> LivenessConfig {
        LivenessConfig {
            stale_tab_secs: 0,
            ..LivenessConfig::default()
        }
    }

    /// Rejects any update that moves the dialog owner or the logout flag
    /// while `failing` is set; heartbeats still go through.
    #[derive(Clone, Default)]
    struct FlakyStore {
        inner: MemorySharedStore,
        failing: Arc<AtomicBool>,
    }

    impl SharedStore for FlakyStore {
        fn load(&self) -> Result<SharedSession> {
            self.inner.load()
        }

        fn update(&self, apply: &mut dyn FnMut(&mut SharedSession)) -> Result<()> {
            let before = self.inner.load()?;
            let mut after = before.clone();
            apply(&mut after);
            if self.failing.load(Ordering::SeqCst)
                && (after.dialog_owner != before.dialog_owner
                    || after.logout_requested != before.logout_requested)
            {
                return Err(HfwError::LockTimeout(PathBuf::from("flaky.lock")));
            }
            self.inner.update(&mut |session| *session = after.clone())
        }
    }

    fn tab(store: &MemorySharedStore, clock: &ManualClock) -> Tab {
        tab_on(Arc::new(store.clone()), clock)
    }

    fn tab_on(store: Arc<dyn SharedStore>, clock: &ManualClock) -> Tab {
        let (host, events) = ChannelModalHost::new();
        let coordinator = TimeoutCoordinator::new(
            store,
            TabStorage::new(),
            Arc::new(clock.clone()),
            Box::new(host),
            config(),
        );
        Tab {
            coordinator,
            events,
        }
    }

    fn clock() -> ManualClock {
        ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap())
    }

    fn run(tabs: &mut [&mut Tab], clock: &ManualClock, secs: u64) {
        for _ in 0..secs {
            clock.advance(Duration::from_secs(1));
            for tab in tabs.iter_mut() {
                tab.coordinator.pump().unwrap();
            }
        }
    }

    #[test]
    fn non_positive_timeout_never_arms() {
        let store = MemorySharedStore::new();
        let clock = clock();
        let mut a = tab(&store, &clock);

        a.coordinator.start_timeout(0, false).unwrap();
        a.coordinator.start_timeout(-5, false).unwrap();
        assert_eq!(a.coordinator.state(), CoordinatorState::Idle);
        assert_eq!(a.coordinator.timeout_value(), None);

        run(&mut [&mut a], &clock, 600);
        assert_eq!(a.coordinator.state(), CoordinatorState::Idle);
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn start_timeout_converts_minutes_and_registers() {
        let store = MemorySharedStore::new();
        let clock = clock();
        let mut a = tab(&store, &clock);

        a.coordinator.start_timeout(2, false).unwrap();
        assert_eq!(a.coordinator.timeout_value(), Some(Duration::from_millis(120_000)));
        assert_eq!(a.coordinator.state(), CoordinatorState::Armed);
        assert!(a.coordinator.storage().get(SessionKey::ActiveState));
        assert_eq!(store.load().unwrap().tab_counter(), 1);
    }

    #[test]
    fn refresh_postpones_the_timer() {
        let store = MemorySharedStore::new();
        let clock = clock();
        let mut a = tab(&store, &clock);
        a.coordinator.start_timeout(1, false).unwrap();

        run(&mut [&mut a], &clock, 50);
        a.coordinator.refresh_timeout().unwrap();
        run(&mut [&mut a], &clock, 50);
        assert_eq!(a.coordinator.state(), CoordinatorState::Armed);

        run(&mut [&mut a], &clock, 10);
        assert_eq!(a.coordinator.state(), CoordinatorState::DialogShown);
    }

    #[test]
    fn lone_tab_shows_dialog_and_stays_on_yes() {
        let store = MemorySharedStore::new();
        let clock = clock();
        let mut a = tab(&store, &clock);
        let logout = a.coordinator.subscribe_logout();
        a.coordinator.start_timeout(1, false).unwrap();

        run(&mut [&mut a], &clock, 60);
        assert_eq!(a.coordinator.state(), CoordinatorState::DialogShown);
        assert!(a.coordinator.storage().get(SessionKey::ShowModal));
        assert_eq!(store.load().unwrap().show_modal, Some(true));

        a.responder().expect("dialog shown").stay();
        a.coordinator.pump().unwrap();

        assert_eq!(logout.try_recv(), Ok(false));
        assert_eq!(a.coordinator.state(), CoordinatorState::Armed);
        assert!(!a.coordinator.storage().get(SessionKey::ShowModal));
        let session = store.load().unwrap();
        assert_eq!(session.show_modal, Some(false));
        assert_eq!(session.dialog_owner, None);
        assert_eq!(session.tab_counter_active(), 1);
    }

    #[test]
    fn dialog_countdown_expiry_logs_out_once() {
        let store = MemorySharedStore::new();
        let clock = clock();
        let mut a = tab(&store, &clock);
        let logout = a.coordinator.subscribe_logout();
        a.coordinator.start_timeout(1, false).unwrap();

        run(&mut [&mut a], &clock, 60);
        let _responder = a.responder().expect("dialog shown");
        run(&mut [&mut a], &clock, 60);

        assert_eq!(a.coordinator.state(), CoordinatorState::LoggedOut);
        assert!(a.coordinator.storage().get(SessionKey::TimerLogOff));
        assert_eq!(logout.try_recv(), Ok(true));
        assert_eq!(logout.try_recv(), Err(TryRecvError::Disconnected));

        a.coordinator.refresh_timeout().unwrap();
        a.coordinator.start_timeout(1, false).unwrap();
        run(&mut [&mut a], &clock, 120);
        assert_eq!(a.coordinator.state(), CoordinatorState::LoggedOut);
        assert!(a.coordinator.subscribe_logout().recv().is_err());
    }

    #[test]
    fn modal_failure_logs_out() {
        let store = MemorySharedStore::new();
        let clock = clock();
        let mut a = tab(&store, &clock);
        let logout = a.coordinator.subscribe_logout();
        a.coordinator.start_timeout(1, false).unwrap();

        let Tab { coordinator, events } = &mut a;
        drop(std::mem::replace(events, mpsc::channel().1));
        for _ in 0..60 {
            clock.advance(Duration::from_secs(1));
            coordinator.pump().unwrap();
        }

        assert_eq!(a.coordinator.state(), CoordinatorState::LoggedOut);
        assert_eq!(logout.try_iter().collect::<Vec<_>>(), vec![true]);
        assert!(store.load().unwrap().logout_requested);
    }

    #[test]
    fn unified_logout_skips_dialog() {
        let store = MemorySharedStore::new();
        let clock = clock();
        let mut a = tab(&store, &clock);
        let logout = a.coordinator.subscribe_logout();
        a.coordinator.start_timeout(1, true).unwrap();

        run(&mut [&mut a], &clock, 60);

        assert!(a.responder().is_none());
        assert_eq!(logout.try_recv(), Ok(true));
        assert_eq!(a.coordinator.state(), CoordinatorState::LoggedOut);
        assert!(a.coordinator.storage().contains(SessionKey::ShowModal));
        assert!(!a.coordinator.storage().get(SessionKey::ShowModal));
        assert_eq!(store.load().unwrap().show_modal, Some(false));
    }

    #[test]
    fn failed_stay_write_keeps_the_dialog_and_retries() {
        let store = FlakyStore::default();
        let clock = clock();
        let mut a = tab_on(Arc::new(store.clone()), &clock);
        let logout = a.coordinator.subscribe_logout();
        a.coordinator.start_timeout(1, false).unwrap();
        run(&mut [&mut a], &clock, 60);
        assert_eq!(a.coordinator.state(), CoordinatorState::DialogShown);

        store.failing.store(true, Ordering::SeqCst);
        a.responder().expect("dialog shown").stay();
        assert!(a.coordinator.pump().is_err());

        assert_eq!(a.coordinator.state(), CoordinatorState::DialogShown);
        assert_eq!(logout.try_recv(), Err(TryRecvError::Empty));
        assert!(a.coordinator.storage().get(SessionKey::ShowModal));
        assert_eq!(
            store.load().unwrap().dialog_owner,
            Some(a.coordinator.tab_id().clone())
        );

        store.failing.store(false, Ordering::SeqCst);
        a.coordinator.pump().unwrap();

        assert_eq!(a.coordinator.state(), CoordinatorState::Armed);
        assert_eq!(logout.try_recv(), Ok(false));
        let session = store.load().unwrap();
        assert_eq!(session.dialog_owner, None);
        assert_eq!(session.tab_counter_active(), 1);
    }

    #[test]
    fn failed_logout_write_keeps_the_tab_signed_in_until_it_lands() {
        let store = FlakyStore::default();
        let clock = clock();
        let mut a = tab_on(Arc::new(store.clone()), &clock);
        let logout = a.coordinator.subscribe_logout();
        a.coordinator.start_timeout(1, false).unwrap();
        run(&mut [&mut a], &clock, 60);

        store.failing.store(true, Ordering::SeqCst);
        a.responder().expect("dialog shown").log_off();
        assert!(a.coordinator.pump().is_err());
        clock.advance(Duration::from_secs(1));
        assert!(a.coordinator.pump().is_err());

        assert_eq!(a.coordinator.state(), CoordinatorState::DialogShown);
        assert_eq!(logout.try_recv(), Err(TryRecvError::Empty));
        assert!(!a.coordinator.storage().get(SessionKey::TimerLogOff));
        assert!(!store.load().unwrap().logout_requested);

        store.failing.store(false, Ordering::SeqCst);
        a.coordinator.pump().unwrap();

        assert_eq!(a.coordinator.state(), CoordinatorState::LoggedOut);
        assert_eq!(logout.try_iter().collect::<Vec<_>>(), vec![true]);
        assert!(a.coordinator.storage().get(SessionKey::TimerLogOff));
        assert!(store.load().unwrap().logout_requested);
    }

    #[test]
    fn polling_tab_rejoins_a_cleared_session() {
        let store = MemorySharedStore::new();
        let clock = clock();
        let mut a = tab(&store, &clock);
        let mut b = tab(&store, &clock);
        a.coordinator.start_timeout(1, false).unwrap();
        b.coordinator.start_timeout(20, false).unwrap();

        run(&mut [&mut a, &mut b], &clock, 60);
        assert_eq!(a.coordinator.state(), CoordinatorState::Polling);

        store.clear().unwrap();
        run(&mut [&mut a], &clock, 1);

        assert_eq!(a.coordinator.state(), CoordinatorState::Armed);
        assert!(a.coordinator.storage().get(SessionKey::ActiveState));
        let session = store.load().unwrap();
        assert!(session.contains(a.coordinator.tab_id()));
        assert!(session.is_active(a.coordinator.tab_id()));
        assert_eq!(session.tab_counter(), 1);
    }

    #[test]
    fn armed_tab_rejoins_on_pump() {
        let store = MemorySharedStore::new();
        let clock = clock();
        let mut a = tab(&store, &clock);
        a.coordinator.start_timeout(5, false).unwrap();

        store.clear().unwrap();
        run(&mut [&mut a], &clock, 1);

        assert_eq!(a.coordinator.state(), CoordinatorState::Armed);
        assert!(store.load().unwrap().is_active(a.coordinator.tab_id()));
    }

    #[test]
    fn activity_while_polling_stops_the_poll() {
        let store = MemorySharedStore::new();
        let clock = clock();
        let mut a = tab(&store, &clock);
        let mut b = tab(&store, &clock);
        a.coordinator.start_timeout(1, false).unwrap();
        run(&mut [&mut a], &clock, 30);
        b.coordinator.start_timeout(1, false).unwrap();

        run(&mut [&mut a, &mut b], &clock, 30);
        assert_eq!(a.coordinator.state(), CoordinatorState::Polling);
        assert_eq!(store.load().unwrap().tab_counter_active(), 1);

        a.coordinator.refresh_timeout().unwrap();
        assert_eq!(a.coordinator.state(), CoordinatorState::Armed);
        assert!(a.coordinator.storage().get(SessionKey::ActiveState));
        assert_eq!(store.load().unwrap().tab_counter_active(), 2);
    }

    #[test]
    fn instances_counts_constructions() {
        let store = MemorySharedStore::new();
        let clock = clock();
        let before = TimeoutCoordinator::instances();
        let _a = tab(&store, &clock);
        let _b = tab(&store, &clock);
        assert!(TimeoutCoordinator::instances() >= before + 2);
    }
}
