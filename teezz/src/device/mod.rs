//! Device-reset state machine (spec.md §4.6, §7). Grounded on
//! `original_source/fuzz/runner/baserunner.py`'s `reset_device`,
//! `check_device`, `root_phone`, `factory_reset` — a hard-reset escalation
//! ladder with a three-strikes exit, and a device-unresponsive predicate
//! (recovery mode / tmpfs userdata) checked independently of the timeout
//! counter.
//!
//! ```text
//!   idle ──run──▶ running ──timeout──▶ timing_out
//!   timing_out ──5 consecutive timeouts──▶ needs_reset
//!   running ──run_count > 500──▶ needs_reset
//!   needs_reset ──reboot OK──▶ idle
//!   needs_reset ──reboot fails ×3──▶ hard_reset
//!   hard_reset ──(external power-cycle)──▶ idle
//!   any ──device in recovery / userdata=tmpfs──▶ factory_reset
//!   factory_reset ──success──▶ re-root ──success──▶ redeploy-executor ──▶ idle
//! ```

pub mod adb;

pub use adb::AdbDeviceController;

use async_trait::async_trait;
use log::{error, info, warn};

use crate::error::{Result, TeezzError};

const CONSECUTIVE_TIMEOUT_THRESHOLD: u32 = 5;
const RUN_COUNT_RESET_THRESHOLD: u32 = 500;
const HARD_RESET_STRIKE_LIMIT: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    Running,
    TimingOut,
    NeedsReset,
    HardReset,
    FactoryReset,
}

/// External collaborator: the actual reboot/root/redeploy machinery is
/// device-transport-specific (adb, ssh, ...) and out of scope (spec.md
/// §1). The fuzz loop drives this trait, not a concrete transport.
#[async_trait]
pub trait DeviceController: Send + Sync {
    async fn reboot(&self) -> Result<bool>;
    async fn hard_reset(&self) -> Result<()>;
    async fn is_in_recovery_or_tmpfs(&self) -> Result<bool>;
    async fn factory_reset(&self) -> Result<()>;
    async fn re_root(&self) -> Result<()>;
    async fn redeploy_executor(&self) -> Result<()>;
    /// Verifies a privileged `whoami` returns the super-user principal,
    /// and syncs device time to the host so evaluator log timestamps
    /// stay linear across a reboot (spec.md §4.6 closing paragraph).
    async fn verify_root_and_sync_time(&self) -> Result<bool>;
}

pub struct DeviceLifecycle {
    state: DeviceState,
    consecutive_timeouts: u32,
    run_count: u32,
    hard_reset_strikes: u32,
}

impl Default for DeviceLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceLifecycle {
    pub fn new() -> Self {
        DeviceLifecycle {
            state: DeviceState::Idle,
            consecutive_timeouts: 0,
            run_count: 0,
            hard_reset_strikes: 0,
        }
    }

    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Scenario F: records a run outcome; returns `true` exactly when
    /// this call pushed the machine into `needs_reset`.
    pub fn record_run(&mut self, timed_out: bool) -> bool {
        self.run_count += 1;
        if timed_out {
            self.consecutive_timeouts += 1;
            self.state = DeviceState::TimingOut;
            if self.consecutive_timeouts >= CONSECUTIVE_TIMEOUT_THRESHOLD {
                self.consecutive_timeouts = 0;
                self.state = DeviceState::NeedsReset;
                return true;
            }
        } else {
            self.consecutive_timeouts = 0;
            self.state = DeviceState::Running;
            if self.run_count > RUN_COUNT_RESET_THRESHOLD {
                self.run_count = 0;
                self.state = DeviceState::NeedsReset;
                return true;
            }
        }
        false
    }

    /// Drives the reset/recovery escalation to completion, returning
    /// `Ok(())` once the device is back at `idle` and ready for the next
    /// run. Exits with `DeviceUnresponsive` after three consecutive hard
    /// resets, per spec.md §7.
    pub async fn ensure_healthy(&mut self, controller: &dyn DeviceController) -> Result<()> {
        if controller.is_in_recovery_or_tmpfs().await? {
            self.state = DeviceState::FactoryReset;
            info!("device in recovery mode or userdata=tmpfs; factory resetting");
            controller.factory_reset().await?;
            controller.re_root().await?;
            controller.redeploy_executor().await?;
            self.hard_reset_strikes = 0;
            self.state = DeviceState::Idle;
            return Ok(());
        }

        if self.state != DeviceState::NeedsReset {
            return Ok(());
        }

        match controller.reboot().await {
            Ok(true) if controller.verify_root_and_sync_time().await? => {
                info!("device rebooted and verified root");
                self.hard_reset_strikes = 0;
                self.state = DeviceState::Idle;
                Ok(())
            }
            _ => {
                self.hard_reset_strikes += 1;
                warn!("reboot attempt {} failed or root check failed", self.hard_reset_strikes);
                if self.hard_reset_strikes >= HARD_RESET_STRIKE_LIMIT {
                    self.state = DeviceState::HardReset;
                    error!("three consecutive failed reboots; requesting external hard reset");
                    controller.hard_reset().await?;
                    return Err(TeezzError::DeviceUnresponsive {
                        attempts: self.hard_reset_strikes,
                    });
                }
                // Recurse to retry the reboot, bounded by the strike limit above.
                Box::pin(self.ensure_healthy(controller)).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyController {
        reboot_failures_remaining: AtomicU32,
        in_recovery: bool,
    }

    #[async_trait]
    impl DeviceController for FlakyController {
        async fn reboot(&self) -> Result<bool> {
            if self.reboot_failures_remaining.load(Ordering::SeqCst) > 0 {
                self.reboot_failures_remaining.fetch_sub(1, Ordering::SeqCst);
                Ok(false)
            } else {
                Ok(true)
            }
        }
        async fn hard_reset(&self) -> Result<()> {
            Ok(())
        }
        async fn is_in_recovery_or_tmpfs(&self) -> Result<bool> {
            Ok(self.in_recovery)
        }
        async fn factory_reset(&self) -> Result<()> {
            Ok(())
        }
        async fn re_root(&self) -> Result<()> {
            Ok(())
        }
        async fn redeploy_executor(&self) -> Result<()> {
            Ok(())
        }
        async fn verify_root_and_sync_time(&self) -> Result<bool> {
            Ok(true)
        }
    }

    #[test]
    fn scenario_f_five_consecutive_timeouts_trigger_exactly_one_reset() {
        let mut lifecycle = DeviceLifecycle::new();
        let mut needs_reset_count = 0;
        for _ in 0..5 {
            if lifecycle.record_run(true) {
                needs_reset_count += 1;
            }
        }
        assert_eq!(needs_reset_count, 1);
        assert_eq!(lifecycle.state(), DeviceState::NeedsReset);
    }

    #[test]
    fn a_successful_run_clears_the_timeout_counter() {
        let mut lifecycle = DeviceLifecycle::new();
        for _ in 0..4 {
            lifecycle.record_run(true);
        }
        lifecycle.record_run(false);
        for _ in 0..4 {
            assert!(!lifecycle.record_run(true));
        }
    }

    #[tokio::test]
    async fn reboot_failing_three_times_escalates_to_device_unresponsive() {
        let controller = FlakyController {
            reboot_failures_remaining: AtomicU32::new(10),
            in_recovery: false,
        };
        let mut lifecycle = DeviceLifecycle::new();
        lifecycle.state = DeviceState::NeedsReset;
        let result = lifecycle.ensure_healthy(&controller).await;
        assert!(matches!(result, Err(TeezzError::DeviceUnresponsive { attempts: 3 })));
    }

    #[tokio::test]
    async fn recovery_mode_routes_through_factory_reset_regardless_of_state() {
        let controller = FlakyController {
            reboot_failures_remaining: AtomicU32::new(0),
            in_recovery: true,
        };
        let mut lifecycle = DeviceLifecycle::new();
        lifecycle.ensure_healthy(&controller).await.unwrap();
        assert_eq!(lifecycle.state(), DeviceState::Idle);
    }
}
