//! The "are you still there?" dialog.
//!
//! The dialog runs its own countdown, independent of the inactivity timeout
//! that opened it. Its answer travels back over a typed channel: the modal
//! host gets a [`DialogResponder`], the coordinator keeps the
//! [`TimeoutDialog`] and polls it.

use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::to_chrono;
use crate::error::{HfwError, Result};

/// Fixed countdown of the dialog itself.
pub const DIALOG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogResult {
    /// Stay signed in.
    Yes,
    /// Log off now.
    No,
    /// The countdown ran out without an answer.
    Nothing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialogPoll {
    Pending,
    Resolved(DialogResult),
    /// The responder went away without answering.
    Failed,
}

/// What the modal host needs to render the dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialogRequest {
    pub countdown: Duration,
}

/// Handed to the modal host; the UI answers through it.
#[derive(Debug, Clone)]
pub struct DialogResponder {
    tx: Sender<DialogResult>,
}

impl DialogResponder {
    pub fn stay(&self) -> bool {
        self.send(DialogResult::Yes)
    }

    pub fn log_off(&self) -> bool {
        self.send(DialogResult::No)
    }

    /// Returns false when the dialog is already closed.
    pub fn send(&self, result: DialogResult) -> bool {
        self.tx.send(result).is_ok()
    }
}

/// Opens, renders and closes the dialog. Implemented by the UI layer.
pub trait ModalHost {
    /// Shows the dialog. An error counts as "liveness cannot be confirmed".
    fn show(&mut self, request: &DialogRequest, responder: DialogResponder) -> Result<()>;

    fn hide(&mut self);
}

#[derive(Debug)]
pub enum ModalEvent {
    Shown {
        request: DialogRequest,
        responder: DialogResponder,
    },
    Hidden,
}

/// Forwards show/hide to whoever renders the dialog (a UI thread, a test).
/// Showing fails once the receiving side is gone.
#[derive(Debug, Clone)]
pub struct ChannelModalHost {
    tx: Sender<ModalEvent>,
}

impl ChannelModalHost {
    pub fn new() -> (Self, Receiver<ModalEvent>) {
        let (tx, rx) = mpsc::channel();
        (ChannelModalHost { tx }, rx)
    }
}

impl ModalHost for ChannelModalHost {
    fn show(&mut self, request: &DialogRequest, responder: DialogResponder) -> Result<()> {
        self.tx
            .send(ModalEvent::Shown {
                request: request.clone(),
                responder,
            })
            .map_err(|_| HfwError::ModalUnavailable("modal renderer disconnected".to_string()))
    }

    fn hide(&mut self) {
        let _ = self.tx.send(ModalEvent::Hidden);
    }
}

/// The coordinator's side of an open dialog.
#[derive(Debug)]
pub struct TimeoutDialog {
    opened_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    rx: Receiver<DialogResult>,
}

impl TimeoutDialog {
    pub fn open(now: DateTime<Utc>, countdown: Duration) -> (Self, DialogResponder) {
        let (tx, rx) = mpsc::channel();
        let deadline = now
            .checked_add_signed(to_chrono(countdown))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (
            TimeoutDialog {
                opened_at: now,
                deadline,
                rx,
            },
            DialogResponder { tx },
        )
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn deadline(&self) -> DateTime<Utc> {
        self.deadline
    }

    /// Whole seconds left on the countdown, rounded up.
    pub fn seconds_left(&self, now: DateTime<Utc>) -> u64 {
        let left = (self.deadline - now).num_milliseconds();
        if left <= 0 {
            0
        } else {
            (left as u64).div_ceil(1000)
        }
    }

    /// An answer beats the countdown, even one that arrived after the deadline
    /// but before this poll.
    pub fn poll(&mut self, now: DateTime<Utc>) -> DialogPoll {
        match self.rx.try_recv() {
            Ok(result) => DialogPoll::Resolved(result),
            Err(TryRecvError::Empty) if now >= self.deadline => {
                DialogPoll::Resolved(DialogResult::Nothing)
            }
            Err(TryRecvError::Empty) => DialogPoll::Pending,
            Err(TryRecvError::Disconnected) => DialogPoll::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn pending_until_answer() {
        let (mut dialog, responder) = TimeoutDialog::open(at(0), DIALOG_TIMEOUT);
        assert_eq!(dialog.poll(at(10)), DialogPoll::Pending);
        assert!(responder.stay());
        assert_eq!(dialog.poll(at(11)), DialogPoll::Resolved(DialogResult::Yes));
    }

    #[test]
    fn countdown_expiry_resolves_nothing() {
        let (mut dialog, _responder) = TimeoutDialog::open(at(0), DIALOG_TIMEOUT);
        assert_eq!(dialog.poll(at(59)), DialogPoll::Pending);
        assert_eq!(
            dialog.poll(at(60)),
            DialogPoll::Resolved(DialogResult::Nothing)
        );
    }

    #[test]
    fn dropped_responder_fails() {
        let (mut dialog, responder) = TimeoutDialog::open(at(0), DIALOG_TIMEOUT);
        drop(responder);
        assert_eq!(dialog.poll(at(1)), DialogPoll::Failed);
    }

    #[test]
    fn seconds_left_counts_down() {
        let (dialog, _responder) = TimeoutDialog::open(at(0), DIALOG_TIMEOUT);
        assert_eq!(dialog.seconds_left(at(0)), 60);
        assert_eq!(dialog.seconds_left(at(45)), 15);
        assert_eq!(dialog.seconds_left(at(75)), 0);
    }

    #[test]
    fn responder_reports_closed_dialog() {
        let (dialog, responder) = TimeoutDialog::open(at(0), DIALOG_TIMEOUT);
        drop(dialog);
        assert!(!responder.log_off());
    }

    #[test]
    fn channel_host_forwards_and_fails_when_disconnected() {
        let (mut host, events) = ChannelModalHost::new();
        let (_dialog, responder) = TimeoutDialog::open(at(0), DIALOG_TIMEOUT);
        let request = DialogRequest {
            countdown: DIALOG_TIMEOUT,
        };

        host.show(&request, responder.clone()).unwrap();
        assert!(matches!(
            events.try_recv().unwrap(),
            ModalEvent::Shown { request: shown, .. } if shown == request
        ));

        drop(events);
        let err = host.show(&request, responder).unwrap_err();
        assert!(matches!(err, HfwError::ModalUnavailable(_)));
    }
}
