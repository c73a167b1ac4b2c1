//! Configuration for Cairn
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Main configuration for Cairn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CairnConfig {
    /// Worker-side actor configuration
    #[serde(default)]
    pub actor: ActorConfig,

    /// Caller-side reservation configuration
    #[serde(default)]
    pub reservation: ReservationConfig,
}

impl CairnConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.actor.validate()?;
        self.reservation.validate()?;
        Ok(())
    }
}

/// Actor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    /// Capacity of the inbound queue
    #[serde(default = "default_mailbox_depth")]
    pub mailbox_depth_max: usize,

    /// Maximum concurrently running assignments
    #[serde(default = "default_assignments_count")]
    pub assignments_count_max: usize,

    /// Finished assignment references remembered for late unassigns
    #[serde(default = "default_finished_retained")]
    pub finished_assignments_retained_count: usize,

    /// Time running assignments get to unwind on shutdown (milliseconds)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

fn default_mailbox_depth() -> usize {
    MAILBOX_DEPTH_DEFAULT
}

fn default_assignments_count() -> usize {
    ASSIGNMENTS_COUNT_DEFAULT
}

fn default_finished_retained() -> usize {
    ASSIGNMENTS_FINISHED_RETAINED_COUNT_DEFAULT
}

fn default_shutdown_grace_ms() -> u64 {
    ACTOR_SHUTDOWN_GRACE_MS_DEFAULT
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            mailbox_depth_max: default_mailbox_depth(),
            assignments_count_max: default_assignments_count(),
            finished_assignments_retained_count: default_finished_retained(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl ActorConfig {
    fn validate(&self) -> Result<()> {
        if self.mailbox_depth_max == 0 || self.mailbox_depth_max > MAILBOX_DEPTH_MAX {
            return Err(Error::InvalidConfiguration {
                field: "actor.mailbox_depth_max".into(),
                reason: format!(
                    "{} must be in 1..={}",
                    self.mailbox_depth_max, MAILBOX_DEPTH_MAX
                ),
            });
        }

        if self.assignments_count_max == 0 || self.assignments_count_max > ASSIGNMENTS_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "actor.assignments_count_max".into(),
                reason: format!(
                    "{} must be in 1..={}",
                    self.assignments_count_max, ASSIGNMENTS_COUNT_MAX
                ),
            });
        }

        if self.shutdown_grace_ms > ACTOR_SHUTDOWN_GRACE_MS_MAX {
            return Err(Error::InvalidConfiguration {
                field: "actor.shutdown_grace_ms".into(),
                reason: format!(
                    "{} exceeds limit {}",
                    self.shutdown_grace_ms, ACTOR_SHUTDOWN_GRACE_MS_MAX
                ),
            });
        }

        Ok(())
    }
}

/// Reservation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReservationConfig {
    /// Keep faults reported after readiness off the caller's path
    #[serde(default)]
    pub ignore_node_exceptions: bool,

    /// Send an explicit unreserve when the reservation is released
    #[serde(default = "default_unreserve_on_release")]
    pub unreserve_on_release: bool,

    /// Bound on `acquire` (milliseconds); unbounded when absent
    #[serde(default)]
    pub reserve_timeout_ms: Option<u64>,

    /// Entries kept in the visible negotiation log
    #[serde(default = "default_log_entries")]
    pub log_entries_count_max: usize,
}

fn default_unreserve_on_release() -> bool {
    true
}

fn default_log_entries() -> usize {
    RESERVATION_LOG_ENTRIES_COUNT_DEFAULT
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            ignore_node_exceptions: false,
            unreserve_on_release: default_unreserve_on_release(),
            reserve_timeout_ms: None,
            log_entries_count_max: default_log_entries(),
        }
    }
}

impl ReservationConfig {
    fn validate(&self) -> Result<()> {
        if let Some(timeout_ms) = self.reserve_timeout_ms {
            if timeout_ms == 0 || timeout_ms > RESERVATION_TIMEOUT_MS_MAX {
                return Err(Error::InvalidConfiguration {
                    field: "reservation.reserve_timeout_ms".into(),
                    reason: format!(
                        "{} must be in 1..={}",
                        timeout_ms, RESERVATION_TIMEOUT_MS_MAX
                    ),
                });
            }
        }

        if self.log_entries_count_max > RESERVATION_LOG_ENTRIES_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "reservation.log_entries_count_max".into(),
                reason: format!(
                    "{} exceeds limit {}",
                    self.log_entries_count_max, RESERVATION_LOG_ENTRIES_COUNT_MAX
                ),
            });
        }

        Ok(())
    }
}
