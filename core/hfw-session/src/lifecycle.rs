//! Page lifecycle hooks: init and before-unload.
//!
//! The page resolves its cookie scope once at init. Registration itself
//! happens when the host calls [`TimeoutCoordinator::start_timeout`].
//! On unload the tab leaves the shared session, then the page decides
//! whether the browser should ask "leave site?".

use tracing::{debug, info, warn};

use crate::coordinator::TimeoutCoordinator;
use crate::storage::{CookieScope, SessionIdentity, SessionKey};

/// One snap-in of a frame, as far as unload is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapInState {
    pub id: String,
    pub is_tab_visible: bool,
    pub dirty: bool,
}

/// Enumerates the snap-ins hosted by a frame.
pub trait FrameStores {
    /// Empty when the frame is unknown.
    fn snap_ins(&self, frame_id: &str) -> Vec<SnapInState>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadDecision {
    /// Let the page go without a prompt.
    Proceed,
    /// Unsaved data: ask the user to confirm leaving.
    Confirm,
}

pub struct PageLifecycle {
    scope: CookieScope,
}

impl PageLifecycle {
    pub fn on_init(identity: &dyn SessionIdentity) -> Self {
        let scope = CookieScope::resolve(identity);
        debug!(path = %scope.path, domain = %scope.domain, "Cookie scope resolved");
        PageLifecycle { scope }
    }

    pub fn scope(&self) -> &CookieScope {
        &self.scope
    }

    pub fn before_unload(
        &self,
        coordinator: &mut TimeoutCoordinator,
        frames: &dyn FrameStores,
        active_frame: &str,
    ) -> UnloadDecision {
        let storage = coordinator.storage();
        let timer_log_off = storage.get(SessionKey::TimerLogOff);
        let user_roles = storage.get(SessionKey::UserRoles);

        match coordinator.snapshot() {
            Ok(session) if session.tab_counter() > 0 => {
                if let Err(err) = coordinator.unregister_tab() {
                    warn!(error = %err, "Failed to unregister tab on unload");
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "Failed to read shared session on unload"),
        }

        if timer_log_off || user_roles {
            info!(timer_log_off, user_roles, "Unload without prompt");
            return UnloadDecision::Proceed;
        }

        let dirty: Vec<String> = frames
            .snap_ins(active_frame)
            .into_iter()
            .filter(|snap_in| snap_in.is_tab_visible && snap_in.dirty)
            .map(|snap_in| snap_in.id)
            .collect();
        if dirty.is_empty() {
            UnloadDecision::Proceed
        } else {
            info!(frame = active_frame, dirty = ?dirty, "Unsaved data, confirming unload");
            UnloadDecision::Confirm
        }
    }
}
