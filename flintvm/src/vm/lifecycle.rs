//! VM lifecycle management
//!
//! Boot, state updates and shutdown. All three take the transition lock.

use super::init::{self, BootContext};
use super::instance::{VmInstance, VmResources};
use super::metrics::BootMetrics;
use super::VmState;
use crate::management::{ActionType, StateTarget};
use crate::tty::TtyClient;
use flintvm_shared::{FlintError, FlintResult, Outcome, SoftFailure};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

impl VmInstance {
    /// Uninitialized → Booting → Running.
    ///
    /// All-or-nothing: on failure the process is killed, every file created
    /// for it is removed and the instance is back in `Uninitialized` (or
    /// `Terminated` if a shutdown arrived meanwhile). Boot may be retried.
    pub async fn boot(&self) -> Outcome<()> {
        let outcome: Outcome<()> = self.boot_inner().await.into();
        self.metrics.observe(&outcome);
        outcome
    }

    async fn boot_inner(&self) -> FlintResult<()> {
        {
            let _transition = self.transition.lock().await;
            let state = self.state();
            if state != VmState::Uninitialized {
                return Err(state.reject("boot"));
            }
            self.set_state(VmState::Booting);
        }

        self.metrics.boot_attempted();
        tracing::info!(
            vm_id = %self.id,
            version = %self.install.version,
            method = ?self.options.boot_method,
            "Booting VM"
        );

        let ctx = init::new_context(BootContext::new(
            self.instance_spec(),
            self.layout.clone(),
            self.schema,
            Arc::clone(&self.host),
            Arc::clone(&self.state),
        ));
        let result = init::execute(&ctx, self.options.boot_timeout, self.state.subscribe()).await;

        let _transition = self.transition.lock().await;
        // Held across commit so the handover below never suspends.
        let mut resources = self.resources.write().await;
        let committed = match result {
            Ok(metrics) if self.state() == VmState::Booting => {
                init::commit(&ctx).await.map(|output| (output, metrics))
            }
            Ok(_) => Err(FlintError::Cancelled("shutdown requested during boot".into())),
            Err(e) => Err(e),
        };

        match committed {
            Ok((output, metrics)) => {
                let pid = output.handler.pid();
                let command_timeout = self.options.command_timeout;
                let tty = output
                    .console
                    .map(|streams| Mutex::new(TtyClient::new(streams, command_timeout)));

                *resources = Some(Arc::new(VmResources {
                    handler: Mutex::new(output.handler),
                    management: output.management,
                    tty,
                    info: output.info,
                    pid,
                    owned_paths: output.owned_paths,
                }));
                self.set_state(VmState::Running);
                drop(resources);

                self.commit_boot_metrics(metrics);
                tracing::info!(vm_id = %self.id, pid = ?pid, "VM running");
                Ok(())
            }
            Err(e) => {
                drop(resources);
                init::rollback(&ctx).await;
                self.metrics.boot_failed();

                let next = if self.state() == VmState::ShuttingDown {
                    VmState::Terminated
                } else {
                    VmState::Uninitialized
                };
                self.set_state(next);
                tracing::warn!(
                    vm_id = %self.id,
                    error = %e,
                    state = %next,
                    "VM boot failed, rolled back"
                );
                Err(e)
            }
        }
    }

    fn commit_boot_metrics(&self, metrics: BootMetrics) {
        metrics.log(self.id.as_str());
        self.metrics.set_boot(metrics);
    }

    /// Running → Paused or Paused → Running.
    ///
    /// Repeating the current state is a `SoftFailure(NoOp)`. Any other state
    /// is rejected and left unchanged.
    pub async fn update_state(&self, target: StateTarget) -> Outcome<()> {
        let outcome = self.update_state_inner(target).await;
        self.metrics.observe(&outcome);
        outcome
    }

    async fn update_state_inner(&self, target: StateTarget) -> Outcome<()> {
        let operation = match target {
            StateTarget::Paused => "pause",
            StateTarget::Resumed => "resume",
        };

        let _transition = self.transition.lock().await;
        let state = self.state();
        let next = match (state, target) {
            (VmState::Running, StateTarget::Paused) => VmState::Paused,
            (VmState::Paused, StateTarget::Resumed) => VmState::Running,
            (VmState::Paused, StateTarget::Paused) | (VmState::Running, StateTarget::Resumed) => {
                return Outcome::SoftFailure(SoftFailure::no_op(format!("VM is already {state}")));
            }
            _ => return Outcome::Failure(state.reject(operation)),
        };

        let resources = match self.connected(operation).await {
            Ok(resources) => resources,
            Err(e) => return Outcome::Failure(e),
        };

        self.metrics.management_request();
        match resources.management.update_state(target).await {
            Ok(()) => {
                self.set_state(next);
                Outcome::Success(())
            }
            Err(e) => {
                tracing::warn!(vm_id = %self.id, error = %e, "State update failed");
                Outcome::Failure(e)
            }
        }
    }

    pub async fn pause(&self) -> Outcome<()> {
        self.update_state(StateTarget::Paused).await
    }

    pub async fn resume(&self) -> Outcome<()> {
        self.update_state(StateTarget::Resumed).await
    }

    /// Any non-terminal state → ShuttingDown → Terminated.
    ///
    /// A running guest is first asked to power off (when enabled), then the
    /// process gets SIGTERM and, after the grace period, SIGKILL; the latter
    /// is reported as `SoftFailure(ForcedKill)`. Transport files are removed
    /// and the instance becomes permanently inert.
    pub async fn shutdown(&self) -> Outcome<()> {
        let outcome = self.shutdown_inner().await;
        self.metrics.observe(&outcome);
        outcome
    }

    async fn shutdown_inner(&self) -> Outcome<()> {
        let transition = self.transition.lock().await;
        let state = self.state();
        tracing::info!(vm_id = %self.id, state = %state, "Shutting down VM");

        match state {
            VmState::Terminated => Outcome::Failure(FlintError::terminal("shut down")),
            VmState::Uninitialized => {
                self.set_state(VmState::Terminated);
                Outcome::Success(())
            }
            VmState::ShuttingDown => {
                drop(transition);
                self.wait_terminated(self.boot_wind_down()).await;
                Outcome::SoftFailure(SoftFailure::no_op("shutdown already in progress"))
            }
            VmState::Booting => {
                // The in-flight boot observes this, rolls back and sets Terminated.
                self.set_state(VmState::ShuttingDown);
                drop(transition);
                let bound = self.boot_wind_down();
                if self.wait_terminated(bound).await {
                    Outcome::Success(())
                } else {
                    Outcome::Failure(FlintError::Internal(format!(
                        "boot did not wind down within {}ms",
                        bound.as_millis()
                    )))
                }
            }
            VmState::Running | VmState::Paused => {
                self.set_state(VmState::ShuttingDown);
                let outcome = self.release(state == VmState::Running).await;
                self.set_state(VmState::Terminated);
                tracing::info!(vm_id = %self.id, "VM terminated");
                outcome
            }
        }
    }

    fn boot_wind_down(&self) -> Duration {
        self.options.boot_timeout + self.options.shutdown_grace
    }

    async fn wait_terminated(&self, bound: Duration) -> bool {
        let mut state = self.state.subscribe();
        matches!(
            tokio::time::timeout(bound, state.wait_for(|s| s.is_terminal())).await,
            Ok(Ok(_))
        )
    }

    /// Stop the process and remove owned files.
    async fn release(&self, guest_running: bool) -> Outcome<()> {
        let Some(resources) = self.resources.write().await.take() else {
            return Outcome::Success(());
        };
        let pid = resources.pid;
        let grace = self.options.shutdown_grace;

        let outcome = {
            let mut handler = resources.handler.lock().await;

            if guest_running && self.options.guest_shutdown {
                self.metrics.management_request();
                match resources
                    .management
                    .perform_action(ActionType::SendCtrlAltDel)
                    .await
                {
                    Ok(()) => match handler.wait_exit(self.options.guest_shutdown_timeout).await {
                        Ok(Some(exit)) => {
                            tracing::debug!(vm_id = %self.id, %exit, "Guest powered off");
                        }
                        _ => tracing::debug!(vm_id = %self.id, "Guest did not power off in time"),
                    },
                    Err(e) => {
                        tracing::debug!(vm_id = %self.id, error = %e, "Ctrl+Alt+Del not delivered")
                    }
                }
            }

            match self.supervisor.terminate(&mut **handler, grace).await {
                Outcome::Failure(e) => {
                    tracing::warn!(
                        vm_id = %self.id,
                        error = %e,
                        "Terminate failed, killing hypervisor"
                    );
                    handler.kill_now();
                    let _ = handler.wait_exit(Duration::from_secs(1)).await;
                    Outcome::SoftFailure(SoftFailure::ForcedKill { pid, grace })
                }
                other => other,
            }
        };

        for path in resources.owned_paths.iter().rev() {
            if let Err(e) = self.host.remove_file(path).await {
                tracing::warn!(vm_id = %self.id, path = %path.display(), "Failed to remove: {}", e);
            }
        }

        outcome
    }
}
