//! Shared and per-tab session storage.
//!
//! Two scopes of state take part in the protocol:
//!
//! - **Shared** ([`SharedSession`] behind a [`SharedStore`]): visible to every
//!   tab of the same browser session scope and persisted across reloads. This
//!   is what the cookie triple `TabCounter` / `TabCounterActive` / `ShowModal`
//!   used to carry.
//! - **Local** ([`TabStorage`]): one tab's flags, the sessionStorage
//!   equivalent. Never seen by other tabs.
//!
//! Tab membership is an explicit set keyed by [`TabId`]; the counters are
//! derived from it, so `TabCounterActive ≤ TabCounter` cannot be violated.
//! Every read-modify-write goes through [`SharedStore::update`], which
//! implementations must apply atomically.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{HfwError, Result};

/// Current on-disk schema version of [`SharedSession`].
pub const SHARED_SESSION_VERSION: u32 = 1;

pub const COOKIE_TAB_COUNTER: &str = "TabCounter";
pub const COOKIE_TAB_COUNTER_ACTIVE: &str = "TabCounterActive";
pub const COOKIE_SHOW_MODAL: &str = "ShowModal";

// ═══════════════════════════════════════════════════════════════════════════════
// Session scope
// ═══════════════════════════════════════════════════════════════════════════════

/// Supplies the cookie path/domain of the signed-in session.
pub trait SessionIdentity {
    fn cookie_path(&self) -> String;
    fn cookie_domain(&self) -> String;
}

/// The path/domain pair every shared key is scoped to. Resolved once per page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CookieScope {
    pub path: String,
    pub domain: String,
}

impl CookieScope {
    pub fn new(path: impl Into<String>, domain: impl Into<String>) -> Self {
        CookieScope {
            path: path.into(),
            domain: domain.into(),
        }
    }

    pub fn resolve(identity: &dyn SessionIdentity) -> Self {
        CookieScope::new(identity.cookie_path(), identity.cookie_domain())
    }

    /// Stable file-system friendly key: MD5 of `domain|path`.
    pub fn storage_key(&self) -> String {
        format!("{:x}", md5::compute(format!("{}|{}", self.domain, self.path)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Per-tab storage
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKey {
    ActiveState,
    ShowModal,
    RefreshTab,
    TimerLogOff,
    UserRoles,
}

impl SessionKey {
    pub const ALL: [SessionKey; 5] = [
        SessionKey::ActiveState,
        SessionKey::ShowModal,
        SessionKey::RefreshTab,
        SessionKey::TimerLogOff,
        SessionKey::UserRoles,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SessionKey::ActiveState => "ActiveState",
            SessionKey::ShowModal => "ShowModal",
            SessionKey::RefreshTab => "RefreshTab",
            SessionKey::TimerLogOff => "TimerLogOff",
            SessionKey::UserRoles => "UserRoles",
        }
    }
}

/// One tab's session flags.
///
/// Survives a reload of the same tab (like sessionStorage), which is why the
/// tab's id lives here too: a refreshed tab rejoins under the id it had.
#[derive(Debug, Clone, Default)]
pub struct TabStorage {
    flags: HashMap<SessionKey, bool>,
    tab_id: Option<TabId>,
}

impl TabStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absent keys read as `false`.
    pub fn get(&self, key: SessionKey) -> bool {
        self.flags.get(&key).copied().unwrap_or(false)
    }

    pub fn contains(&self, key: SessionKey) -> bool {
        self.flags.contains_key(&key)
    }

    pub fn set(&mut self, key: SessionKey, value: bool) {
        self.flags.insert(key, value);
    }

    pub fn remove(&mut self, key: SessionKey) {
        self.flags.remove(&key);
    }

    /// Clears every flag. The tab id is kept; it identifies the tab, not the session.
    pub fn clear(&mut self) {
        self.flags.clear();
    }

    pub fn tab_id(&self) -> Option<&TabId> {
        self.tab_id.as_ref()
    }

    /// Returns this tab's id, minting one on first use.
    pub fn ensure_tab_id(&mut self) -> TabId {
        self.tab_id.get_or_insert_with(TabId::generate).clone()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Shared session
// ═══════════════════════════════════════════════════════════════════════════════

/// Identifies one tab. ULID text: lexical order follows creation time to the millisecond.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
    pub fn generate() -> Self {
        TabId(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TabId {
    fn from(value: &str) -> Self {
        TabId(value.to_string())
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabEntry {
    pub active: bool,
    pub registered_at: DateTime<Utc>,
    #[serde(default)]
    pub inactive_since: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
}

impl TabEntry {
    pub fn new_active(now: DateTime<Utc>) -> Self {
        TabEntry {
            active: true,
            registered_at: now,
            inactive_since: None,
            last_seen: now,
        }
    }
}

/// Everything the tabs of one session share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedSession {
    pub version: u32,
    #[serde(default)]
    pub tabs: BTreeMap<TabId, TabEntry>,
    /// `None` renders as an absent `ShowModal` cookie.
    #[serde(default)]
    pub show_modal: Option<bool>,
    #[serde(default)]
    pub dialog_owner: Option<TabId>,
    /// Set by the dialog owner when the session must end; every tab follows.
    #[serde(default)]
    pub logout_requested: bool,
}

impl Default for SharedSession {
    fn default() -> Self {
        SharedSession {
            version: SHARED_SESSION_VERSION,
            tabs: BTreeMap::new(),
            show_modal: None,
            dialog_owner: None,
            logout_requested: false,
        }
    }
}

impl SharedSession {
    /// `TabCounter`: open tabs.
    pub fn tab_counter(&self) -> usize {
        self.tabs.len()
    }

    /// `TabCounterActive`: tabs whose inactivity clock has not elapsed.
    pub fn tab_counter_active(&self) -> usize {
        self.tabs.values().filter(|entry| entry.active).count()
    }

    pub fn is_empty(&self) -> bool {
        *self == SharedSession::default()
    }

    pub fn contains(&self, id: &TabId) -> bool {
        self.tabs.contains_key(id)
    }

    pub fn is_active(&self, id: &TabId) -> bool {
        self.tabs.get(id).is_some_and(|entry| entry.active)
    }

    /// The legacy cookie rendering. `TabCounterActive` is omitted at zero,
    /// and nothing is emitted for an empty session.
    pub fn cookie_view(&self) -> Vec<(&'static str, String)> {
        let mut cookies = Vec::new();
        if !self.tabs.is_empty() {
            cookies.push((COOKIE_TAB_COUNTER, self.tab_counter().to_string()));
        }
        let active = self.tab_counter_active();
        if active > 0 {
            cookies.push((COOKIE_TAB_COUNTER_ACTIVE, active.to_string()));
        }
        if let Some(show) = self.show_modal {
            cookies.push((COOKIE_SHOW_MODAL, show.to_string()));
        }
        cookies
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store abstraction
// ═══════════════════════════════════════════════════════════════════════════════

/// Storage shared by all tabs of one session scope.
pub trait SharedStore: Send + Sync {
    /// Snapshot of the current shared state.
    fn load(&self) -> Result<SharedSession>;

    /// Applies `apply` as one atomic read-modify-write.
    fn update(&self, apply: &mut dyn FnMut(&mut SharedSession)) -> Result<()>;

    /// Drops everything; the next load sees an empty session.
    fn clear(&self) -> Result<()> {
        self.update(&mut |session| *session = SharedSession::default())
    }
}

/// Runs `f` atomically against the shared session and returns its value.
pub fn transact<R>(
    store: &dyn SharedStore,
    f: impl FnOnce(&mut SharedSession) -> R,
) -> Result<R> {
    let mut f = Some(f);
    let mut out = None;
    store.update(&mut |session| {
        if let Some(f) = f.take() {
            out = Some(f(session));
        }
    })?;
    out.ok_or(HfwError::UpdateNotApplied)
}

/// In-process shared store. Clones share the same session, so several
/// coordinators in one process behave like tabs of one browser.
#[derive(Debug, Clone, Default)]
pub struct MemorySharedStore {
    inner: Arc<Mutex<SharedSession>>,
}

impl MemorySharedStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SharedStore for MemorySharedStore {
    fn load(&self) -> Result<SharedSession> {
        Ok(self.inner.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn update(&self, apply: &mut dyn FnMut(&mut SharedSession)) -> Result<()> {
        let mut session = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        apply(&mut session);
        Ok(())
    }
}
