//! Single-flight slots
//!
//! A `Flight` is the `Loading` state of one cache slot. The first requester
//! (the leader) performs the decode and publishes the outcome; everyone else
//! who asks for the same page meanwhile blocks on the flight and receives a
//! clone of that outcome.
//!
//! A flight created for a preload stays unclaimed while its job is queued.
//! Whoever claims it first (the worker or a foreground caller) leads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use super::PageBitmap;
use crate::utils::error::PageError;

pub(crate) type FlightResult = std::result::Result<PageBitmap, PageError>;

#[derive(Default)]
pub(crate) struct Flight {
    claimed: AtomicBool,
    outcome: Mutex<Option<FlightResult>>,
    done: Condvar,
}

impl Flight {
    /// A flight nobody leads yet
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A flight already led by its creator
    pub(crate) fn claimed() -> Self {
        let flight = Self::default();
        flight.claimed.store(true, Ordering::Release);
        flight
    }

    /// Become the leader; false if someone already is
    pub(crate) fn claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Block until the leader publishes
    pub(crate) fn wait(&self) -> FlightResult {
        let mut outcome = self
            .outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            outcome = self
                .done
                .wait(outcome)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Publish the outcome and wake every waiter; later calls are ignored
    pub(crate) fn finish(&self, result: FlightResult) {
        let mut outcome = self
            .outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if outcome.is_none() {
            *outcome = Some(result);
            self.done.notify_all();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_finished(&self) -> bool {
        self.outcome
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }
}
