//! Tab registry: who is open, who is active, who owns the dialog.
//!
//! The free functions are pure transitions on a [`SharedSession`]; callers
//! run them inside [`transact`] so each one is a single atomic update.
//! [`TabRegistry`] binds them to one tab and one store.
//!
//! # Election
//!
//! The timeout dialog belongs to exactly one tab, and only once no tab is
//! active. Among the inactive tabs the one idle longest wins
//! (earliest `inactive_since`), ties going to the lowest [`TabId`]. Because
//! the claim is checked and written in one update, two tabs polling in the
//! same tick cannot both win.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::clock::to_chrono;
use crate::error::Result;
use crate::storage::{transact, SharedSession, SharedStore, TabEntry, TabId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// No session existed; this tab started one.
    Initialized,
    /// Joined an existing session, every tab now counts as active.
    Joined { tab_counter: usize },
    /// This tab was already a member (reload); membership normalized.
    Rejoined { tab_counter: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnregisterOutcome {
    NotRegistered,
    /// The set emptied and the shared session was reset.
    LastTabClosed,
    Remaining {
        tab_counter: usize,
        tab_counter_active: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyOwned,
    OwnedByOther(TabId),
    TabsStillActive,
    NotElected(TabId),
    NotRegistered,
}

pub fn register(session: &mut SharedSession, id: &TabId, now: DateTime<Utc>) -> RegisterOutcome {
    if session.tabs.is_empty() {
        *session = SharedSession::default();
        session.tabs.insert(id.clone(), TabEntry::new_active(now));
        return RegisterOutcome::Initialized;
    }

    let rejoined = match session.tabs.get_mut(id) {
        Some(entry) => {
            entry.last_seen = now;
            true
        }
        None => {
            session.tabs.insert(id.clone(), TabEntry::new_active(now));
            false
        }
    };
    activate_all(session);

    let tab_counter = session.tab_counter();
    if rejoined {
        RegisterOutcome::Rejoined { tab_counter }
    } else {
        RegisterOutcome::Joined { tab_counter }
    }
}

pub fn unregister(session: &mut SharedSession, id: &TabId) -> UnregisterOutcome {
    if session.tabs.remove(id).is_none() {
        if session.tabs.is_empty() {
            *session = SharedSession::default();
        }
        return UnregisterOutcome::NotRegistered;
    }

    if session.tabs.is_empty() {
        *session = SharedSession::default();
        return UnregisterOutcome::LastTabClosed;
    }

    release_dialog(session, id);
    UnregisterOutcome::Remaining {
        tab_counter: session.tab_counter(),
        tab_counter_active: session.tab_counter_active(),
    }
}

/// Returns true when the bit actually flipped.
pub fn mark_active(session: &mut SharedSession, id: &TabId) -> bool {
    match session.tabs.get_mut(id) {
        Some(entry) if !entry.active => {
            entry.active = true;
            entry.inactive_since = None;
            true
        }
        _ => false,
    }
}

/// Returns true when the bit actually flipped.
pub fn mark_inactive(session: &mut SharedSession, id: &TabId, now: DateTime<Utc>) -> bool {
    match session.tabs.get_mut(id) {
        Some(entry) if entry.active => {
            entry.active = false;
            entry.inactive_since = Some(now);
            true
        }
        _ => false,
    }
}

pub fn activate_all(session: &mut SharedSession) {
    for entry in session.tabs.values_mut() {
        entry.active = true;
        entry.inactive_since = None;
    }
}

/// Puts a tab that was pruned or reset back in the set as active, without
/// touching the other tabs. Returns true when it had to rejoin.
pub fn rejoin(session: &mut SharedSession, id: &TabId, now: DateTime<Utc>) -> bool {
    if session.contains(id) {
        return false;
    }
    if session.tabs.is_empty() {
        register(session, id, now);
    } else {
        session.tabs.insert(id.clone(), TabEntry::new_active(now));
    }
    true
}

pub fn heartbeat(session: &mut SharedSession, id: &TabId, now: DateTime<Utc>) {
    if let Some(entry) = session.tabs.get_mut(id) {
        entry.last_seen = now;
    }
}

/// Drops tabs not seen for longer than `after`, except `keep` (the caller).
pub fn prune_stale(
    session: &mut SharedSession,
    keep: &TabId,
    now: DateTime<Utc>,
    after: Duration,
) -> Vec<TabId> {
    let Some(cutoff) = now.checked_sub_signed(to_chrono(after)) else {
        return Vec::new();
    };
    let stale: Vec<TabId> = session
        .tabs
        .iter()
        .filter(|(id, entry)| *id != keep && entry.last_seen < cutoff)
        .map(|(id, _)| id.clone())
        .collect();

    for id in &stale {
        session.tabs.remove(id);
        release_dialog(session, id);
    }
    if session.tabs.is_empty() && !stale.is_empty() {
        *session = SharedSession::default();
    }
    stale
}

pub fn elect_dialog_owner(session: &SharedSession) -> Option<TabId> {
    if session.tabs.is_empty() || session.tab_counter_active() > 0 {
        return None;
    }
    session
        .tabs
        .iter()
        .min_by(|(a_id, a), (b_id, b)| {
            a.inactive_since
                .cmp(&b.inactive_since)
                .then_with(|| a_id.cmp(b_id))
        })
        .map(|(id, _)| id.clone())
}

pub fn claim_dialog(session: &mut SharedSession, id: &TabId) -> ClaimOutcome {
    if !session.contains(id) {
        return ClaimOutcome::NotRegistered;
    }
    match &session.dialog_owner {
        Some(owner) if owner == id => return ClaimOutcome::AlreadyOwned,
        Some(owner) => return ClaimOutcome::OwnedByOther(owner.clone()),
        None => {}
    }
    match elect_dialog_owner(session) {
        None => ClaimOutcome::TabsStillActive,
        Some(elected) if &elected != id => ClaimOutcome::NotElected(elected),
        Some(_) => {
            session.dialog_owner = Some(id.clone());
            session.show_modal = Some(true);
            ClaimOutcome::Claimed
        }
    }
}

/// Releases the dialog if `id` owns it. Returns true when it did.
pub fn release_dialog(session: &mut SharedSession, id: &TabId) -> bool {
    if session.dialog_owner.as_ref() != Some(id) {
        return false;
    }
    session.dialog_owner = None;
    session.show_modal = Some(false);
    true
}

pub fn request_logout(session: &mut SharedSession) {
    session.logout_requested = true;
}

/// One tab's handle on the shared registry.
pub struct TabRegistry {
    id: TabId,
    store: Arc<dyn SharedStore>,
}

impl TabRegistry {
    pub fn new(id: TabId, store: Arc<dyn SharedStore>) -> Self {
        TabRegistry { id, store }
    }

    pub fn id(&self) -> &TabId {
        &self.id
    }

    pub fn store(&self) -> &dyn SharedStore {
        self.store.as_ref()
    }

    pub fn snapshot(&self) -> Result<SharedSession> {
        self.store.load()
    }

    pub fn register_tab(&self, now: DateTime<Utc>) -> Result<RegisterOutcome> {
        let outcome = transact(self.store(), |session| register(session, &self.id, now))?;
        info!(tab = %self.id, outcome = ?outcome, "Tab registered");
        Ok(outcome)
    }

    pub fn unregister_tab(&self) -> Result<UnregisterOutcome> {
        let outcome = transact(self.store(), |session| unregister(session, &self.id))?;
        info!(tab = %self.id, outcome = ?outcome, "Tab unregistered");
        Ok(outcome)
    }

    pub fn mark_tab_active(&self) -> Result<bool> {
        transact(self.store(), |session| mark_active(session, &self.id))
    }

    pub fn mark_tab_inactive(&self, now: DateTime<Utc>) -> Result<bool> {
        transact(self.store(), |session| mark_inactive(session, &self.id, now))
    }

    /// Heartbeat plus optional pruning, in one update. With `rejoin`, a tab
    /// missing from the set (pruned while stalled, or reset) is put back.
    pub fn touch(
        &self,
        now: DateTime<Utc>,
        stale_after: Option<Duration>,
        rejoin_if_missing: bool,
    ) -> Result<Vec<TabId>> {
        let (rejoined, pruned) = transact(self.store(), |session| {
            let rejoined = rejoin_if_missing && rejoin(session, &self.id, now);
            heartbeat(session, &self.id, now);
            let pruned = match stale_after {
                Some(after) => prune_stale(session, &self.id, now, after),
                None => Vec::new(),
            };
            (rejoined, pruned)
        })?;
        if rejoined {
            info!(tab = %self.id, "Tab missing from session, rejoined");
        }
        if !pruned.is_empty() {
            debug!(tab = %self.id, pruned = ?pruned, "Pruned stale tabs");
        }
        Ok(pruned)
    }
}
