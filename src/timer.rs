//! Timer service
//!
//! Timers are owned by the platform ([`Timers`]); the state machines only hold
//! [`ScopedTimer`] handles. Each arming hands out a fresh [`TimerToken`], and an
//! expiry event is honoured only if its token is the one currently armed, so a
//! timer cancelled at phase exit can never fire into a later session.

use core::time::Duration;

/// Timers used by service discovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerId {
    /// Bounds one service discovery session
    Discovery,
    /// Delays closing an idle discovery connection
    Close,
}

/// Generation token identifying one arming of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerToken(u32);

impl TimerToken {
    /// Wrap a raw generation number
    #[must_use]
    pub const fn new(generation: u32) -> Self {
        Self(generation)
    }

    /// Raw generation number
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.0
    }
}

/// Platform timer facility
///
/// When a timer armed with `token` expires the platform must feed
/// `DiscoveryEvent::DiscoveryTimeout(token)` or `DiscoveryEvent::CloseTimeout(token)`
/// (by [`TimerId`]) into the event queue. Arming an already armed timer replaces it.
pub trait Timers {
    /// Arm `timer` to expire after `after`
    fn arm(&mut self, timer: TimerId, token: TimerToken, after: Duration);

    /// Disarm `timer`; a no-op if it is not armed
    fn cancel(&mut self, timer: TimerId);
}

/// State-machine side handle of one platform timer
#[derive(Debug)]
pub struct ScopedTimer {
    id: TimerId,
    armed: Option<TimerToken>,
    generation: u32,
}

impl ScopedTimer {
    /// Create a disarmed handle for `id`
    #[must_use]
    pub const fn new(id: TimerId) -> Self {
        Self {
            id,
            armed: None,
            generation: 0,
        }
    }

    /// Which timer this handle drives
    #[must_use]
    pub const fn id(&self) -> TimerId {
        self.id
    }

    /// Whether the timer is currently armed
    #[must_use]
    pub const fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    /// Arm (or re-arm) the timer, returning the token its expiry will carry
    pub fn arm<T: Timers>(&mut self, timers: &mut T, after: Duration) -> TimerToken {
        self.generation = self.generation.wrapping_add(1);
        let token = TimerToken(self.generation);
        self.armed = Some(token);
        timers.arm(self.id, token, after);
        token
    }

    /// Disarm the timer if it is armed
    pub fn cancel<T: Timers>(&mut self, timers: &mut T) {
        if self.armed.take().is_some() {
            timers.cancel(self.id);
        }
    }

    /// Consume an expiry; returns `true` only for the currently armed token
    pub fn expire(&mut self, token: TimerToken) -> bool {
        if self.armed == Some(token) {
            self.armed = None;
            true
        } else {
            false
        }
    }
}
