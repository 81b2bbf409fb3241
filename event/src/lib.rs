// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

#![deny(
    unsafe_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]

//! # Cooperative scheduler
//!
//! A single-threaded loop primitive that interleaves socket readiness and
//! timer expiry. Each [`Scheduler::turn`] computes the earliest timer
//! deadline, blocks in `mio::Poll::poll` with that timeout, and then drains
//! expired timers in deadline order. The scheduler never invokes callbacks:
//! the owning run loop services the readiness events and expired timers it
//! is handed, so callback re-entrancy cannot arise and nothing here blocks
//! beyond the poll itself.
//!
//! Timers carry a caller-chosen payload and are cancelled by handle;
//! cancelling a fired-but-undrained timer is a no-op. Periodic timers
//! re-arm themselves on expiry.

mod scheduler;

pub use scheduler::{Expired, Scheduler, SchedulerError, TimerHandle, WAKER_TOKEN};
