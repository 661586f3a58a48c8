use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use zen_core::plan::{PlanClient, PlanError, PlanRequest, PlanResponse};

/// What the coach view shows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PlannerState {
    #[default]
    Idle,
    Requesting,
    Ready(PlanResponse),
    /// The request failed; the message is for display only.
    Failed(String),
}

#[derive(Debug, Default)]
struct Shared {
    state: PlannerState,
    generation: u64,
}

/// Transient state of the AI planner. Requests run on the tokio runtime
/// and land back here when they finish, unless the session was reset in
/// the meantime.
pub struct PlannerSession {
    client: Arc<dyn PlanClient>,
    timeout: Duration,
    runtime: Handle,
    shared: Arc<Mutex<Shared>>,
}

impl PlannerSession {
    pub fn new(client: Arc<dyn PlanClient>, timeout: Duration, runtime: Handle) -> Self {
        Self {
            client,
            timeout,
            runtime,
            shared: Arc::new(Mutex::new(Shared::default())),
        }
    }

    pub fn state(&self) -> PlannerState {
        self.shared.lock().state.clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.shared.lock().state, PlannerState::Requesting)
    }

    /// Start a plan request without waiting for it. Empty requests and
    /// requests made while another is pending are refused and never reach
    /// the client.
    pub fn submit(&self, request: PlanRequest) -> Result<JoinHandle<()>, PlanError> {
        if request.is_empty() {
            debug!("empty plan request refused");
            return Err(PlanError::EmptyRequest);
        }

        let generation = {
            let mut shared = self.shared.lock();
            if shared.state == PlannerState::Requesting {
                debug!("plan request refused while another is pending");
                return Err(PlanError::Busy);
            }
            shared.generation += 1;
            shared.state = PlannerState::Requesting;
            shared.generation
        };
        info!(generation, "plan requested");

        let client = Arc::clone(&self.client);
        let shared = Arc::clone(&self.shared);
        let timeout = self.timeout;
        Ok(self.runtime.spawn(async move {
            let result = match tokio::time::timeout(timeout, client.request_plan(&request)).await {
                Ok(result) => result,
                Err(_) => Err(PlanError::Timeout(timeout)),
            };

            let mut shared = shared.lock();
            if shared.generation != generation {
                debug!(generation, "dropping stale plan response");
                return;
            }
            shared.state = match result {
                Ok(plan) => {
                    info!(
                        generation,
                        items = plan.recommended_schedule.len(),
                        "plan ready"
                    );
                    PlannerState::Ready(plan)
                }
                Err(err) => {
                    warn!(generation, error = %err, "plan generation failed");
                    PlannerState::Failed(err.to_string())
                }
            };
        }))
    }

    /// Discard the current plan or failure, and ignore any response still in
    /// flight.
    pub fn start_over(&self) {
        let mut shared = self.shared.lock();
        shared.generation += 1;
        shared.state = PlannerState::Idle;
    }
}
