//! Queues connecting a running experiment with whoever controls it (GUI, command line).
//!
//! [`control_channel`] creates both ends at once:
//! - the experiment keeps the [`ControlChannel`], polls it for [`ExpCmd::Stop`] between
//!   iterations and posts human-readable notes (autosave requests) on it;
//! - the controller keeps the [`ControlHandle`] to send commands and collect notes.
//!
//! Neither side ever blocks the other: polling and posting are non-blocking, and a controller
//! that went away simply stops sending commands.

use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::warn;
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpCmd {
    Stop,
}

pub struct ControlChannel {
    cmd_recvr: Receiver<ExpCmd>,
    note_sender: Sender<String>,
}

#[derive(Clone)]
pub struct ControlHandle {
    cmd_sender: Sender<ExpCmd>,
    note_recvr: Receiver<String>,
}

pub fn control_channel() -> (ControlHandle, ControlChannel) {
    let (cmd_sender, cmd_recvr) = unbounded();
    let (note_sender, note_recvr) = unbounded();
    (
        ControlHandle {
            cmd_sender,
            note_recvr,
        },
        ControlChannel {
            cmd_recvr,
            note_sender,
        },
    )
}

impl ControlChannel {
    /// A channel nobody listens to: never asks to stop, drops every note.
    pub fn detached() -> Self {
        let (_handle, chan) = control_channel();
        chan
    }

    /// Drains pending commands without blocking; `true` if any of them was a stop request.
    pub fn poll_stop(&self) -> bool {
        let mut stop = false;
        loop {
            match self.cmd_recvr.try_recv() {
                Ok(ExpCmd::Stop) => stop = true,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return stop,
            }
        }
    }

    /// Posts a note for the controller without blocking. Returns `false` if nobody listens.
    pub fn post(&self, note: String) -> bool {
        match self.note_sender.try_send(note) {
            Ok(()) => true,
            Err(e) => {
                warn!("Controller is gone, dropping note '{}'", e.into_inner());
                false
            }
        }
    }
}

impl ControlHandle {
    /// Asks the experiment to stop after its current iteration.
    pub fn stop(&self) -> bool {
        self.cmd_sender.send(ExpCmd::Stop).is_ok()
    }

    /// All notes posted so far, without blocking.
    pub fn drain_notes(&self) -> Vec<String> {
        self.note_recvr.try_iter().collect()
    }

    /// Blocks for the next note. `None` once the experiment side is dropped.
    pub fn recv_note(&self) -> Option<String> {
        self.note_recvr.recv().ok()
    }

    /// Waits up to `timeout` for the next note. `None` on timeout or once the experiment is gone.
    pub fn recv_note_timeout(&self, timeout: Duration) -> Option<String> {
        match self.note_recvr.recv_timeout(timeout) {
            Ok(note) => Some(note),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}
