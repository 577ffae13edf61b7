//! Tool-permission negotiation and retry.
//!
//! When a terminal `result` carries denial records, the send is complete but
//! the user has a decision to make: approve some or all of the denied tools
//! and resubmit, or leave things as they are. The coordinator records every
//! request it sends so the retry re-issues the identical input (same message,
//! context, context type and file name), continuing the same conversation
//! through the latched resume id. Retrying is not idempotent at the agent
//! level; with the expanded allow-list the agent may take different actions.

use crate::agent::{PermissionDenial, ProcessSupervisor, SendRequest};
use crate::dispatch::{SendObserver, SendOutcome};

/// States of the permission negotiation loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    /// No request has been issued yet.
    #[default]
    Idle,
    /// A send is in flight.
    AwaitingResponse,
    /// The last send reported denials awaiting a caller decision.
    DenialsPending,
    /// An approve-all retry is in flight.
    Retrying,
    /// The last send concluded without denials.
    Done,
}

/// Drives sends through a [`ProcessSupervisor`] and negotiates denials.
#[derive(Debug, Default)]
pub struct RetryCoordinator {
    state: NegotiationState,
    last_request: Option<SendRequest>,
    pending_denials: Vec<PermissionDenial>,
}

impl RetryCoordinator {
    /// Create an idle coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current negotiation state.
    #[must_use]
    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Denials awaiting a caller decision.
    #[must_use]
    pub fn pending_denials(&self) -> &[PermissionDenial] {
        &self.pending_denials
    }

    /// The most recently issued request, if any.
    #[must_use]
    pub fn last_request(&self) -> Option<&SendRequest> {
        self.last_request.as_ref()
    }

    /// Issue a send, recording the request for a possible later retry.
    pub async fn send(
        &mut self,
        supervisor: &mut ProcessSupervisor,
        request: SendRequest,
        observer: &mut dyn SendObserver,
    ) -> SendOutcome {
        self.last_request = Some(request.clone());
        self.state = NegotiationState::AwaitingResponse;
        let outcome = supervisor.send(&request, observer).await;
        self.record_outcome(&outcome);
        outcome
    }

    /// Fold a send outcome into the negotiation state. Called automatically
    /// by [`send`](Self::send); exposed for callers driving the supervisor
    /// directly.
    pub fn record_outcome(&mut self, outcome: &SendOutcome) {
        if outcome.denials.is_empty() {
            self.pending_denials.clear();
            self.state = NegotiationState::Done;
        } else {
            self.pending_denials = outcome.denials.clone();
            self.state = NegotiationState::DenialsPending;
            tracing::info!(
                denied = self.pending_denials.len(),
                "Send concluded with permission denials"
            );
        }
    }

    /// Approve a single denied tool for future sends, without retrying.
    pub fn approve(&mut self, supervisor: &mut ProcessSupervisor, tool_name: &str) {
        tracing::debug!(tool = %tool_name, "Tool approved for future sends");
        supervisor.allow_tool(tool_name.to_string());
    }

    /// Approve every pending denied tool and re-issue the recorded request.
    ///
    /// Returns `None` when no prior request exists to retry; that is a
    /// logged no-op, not an error.
    pub async fn approve_all_and_retry(
        &mut self,
        supervisor: &mut ProcessSupervisor,
        observer: &mut dyn SendObserver,
    ) -> Option<SendOutcome> {
        let Some(request) = self.last_request.clone() else {
            tracing::warn!("Retry requested but no prior request is recorded");
            return None;
        };

        for denial in &self.pending_denials {
            supervisor.allow_tool(denial.tool_name.clone());
        }
        self.pending_denials.clear();
        self.state = NegotiationState::Retrying;

        let outcome = supervisor.send(&request, observer).await;
        self.record_outcome(&outcome);
        Some(outcome)
    }
}
