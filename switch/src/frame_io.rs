// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Port backend abstraction.
//!
//! The pipeline does not care how frames reach the wire: raw sockets,
//! AF_PACKET, a tap device, or a test double all hide behind [`FrameIO`].
//! The datapath polls each device for received frames on its scheduler
//! passes and pushes outgoing frames through [`FrameIO::send_frame`].
//! Production backends live outside this crate.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Error produced by a port backend.
#[derive(Debug, thiserror::Error)]
pub enum FrameIoError {
    #[error("device is down")]
    Down,
    #[error("transmit queue full")]
    TxFull,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A link-layer device carrying one port's frames.
pub trait FrameIO {
    /// Interface name, also reported in the port description.
    fn name(&self) -> &str;

    /// Link state; FAST_FAILOVER watch ports and port-status reporting
    /// read this.
    fn is_up(&self) -> bool;

    /// Queue one frame for transmission.
    ///
    /// # Errors
    ///
    /// Backend-specific failures; a full transmit queue is
    /// [`FrameIoError::TxFull`].
    fn send_frame(&mut self, frame: &[u8]) -> Result<(), FrameIoError>;

    /// Move any frames received since the last poll into `out`.
    ///
    /// # Errors
    ///
    /// Backend-specific failures.
    fn poll_received(&mut self, out: &mut Vec<Vec<u8>>) -> Result<(), FrameIoError>;
}

#[derive(Debug, Default)]
struct MockPortState {
    up: bool,
    rx: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
}

/// In-memory device for tests.
///
/// A `MockPort` is a shared handle: clones observe the same device, so a
/// test keeps one clone while the datapath owns the other. Injected
/// frames come back from [`FrameIO::poll_received`]; transmitted frames
/// are captured for [`MockPort::sent`].
#[derive(Debug, Clone)]
pub struct MockPort {
    name: String,
    state: Rc<RefCell<MockPortState>>,
}

impl MockPort {
    #[must_use]
    pub fn new(name: &str) -> MockPort {
        MockPort {
            name: name.to_string(),
            state: Rc::new(RefCell::new(MockPortState {
                up: true,
                rx: VecDeque::new(),
                sent: Vec::new(),
            })),
        }
    }

    /// Simulate frame arrival.
    pub fn inject(&self, frame: Vec<u8>) {
        self.state.borrow_mut().rx.push_back(frame);
    }

    /// Flip the link state.
    pub fn set_up(&self, up: bool) {
        self.state.borrow_mut().up = up;
    }

    /// Every frame transmitted through this port so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.state.borrow().sent.clone()
    }

    /// Drop the record of transmitted frames.
    pub fn clear_sent(&self) {
        self.state.borrow_mut().sent.clear();
    }
}

impl FrameIO for MockPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_up(&self) -> bool {
        self.state.borrow().up
    }

    fn send_frame(&mut self, frame: &[u8]) -> Result<(), FrameIoError> {
        let mut state = self.state.borrow_mut();
        if !state.up {
            return Err(FrameIoError::Down);
        }
        state.sent.push(frame.to_vec());
        Ok(())
    }

    fn poll_received(&mut self, out: &mut Vec<Vec<u8>>) -> Result<(), FrameIoError> {
        out.extend(self.state.borrow_mut().rx.drain(..));
        Ok(())
    }
}
