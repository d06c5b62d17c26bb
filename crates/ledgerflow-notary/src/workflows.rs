//! The two sides of a notarisation.

use std::sync::Arc;

use futures::FutureExt;
use ledgerflow_workflow::{
  ExternalOperation, Party, Resume, SessionId, Step, StepContext, WorkflowFailure, WorkflowLogic,
  WorkflowType,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::service::NotaryService;
use crate::types::{NotarisationOutcome, NotarisationRequest};
use crate::{NOTARY_RESPONDER, notarisation_request_type};

/// Asks `notary` to notarise a transaction and completes with the
/// signature. A conflict or notary error fails the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotaryClient {
  notary: Party,
  request: NotarisationRequest,
  session: Option<SessionId>,
}

impl NotaryClient {
  pub fn new(notary: Party, request: NotarisationRequest) -> Self {
    Self {
      notary,
      request,
      session: None,
    }
  }
}

impl WorkflowLogic for NotaryClient {
  fn workflow_type(&self) -> WorkflowType {
    notarisation_request_type()
  }

  fn step(&mut self, ctx: &mut StepContext<'_>, resume: Resume) -> Result<Step, WorkflowFailure> {
    match resume {
      Resume::Start => {
        let session = ctx.initiate_session(self.notary.clone());
        self.session = Some(session);
        ctx.send_json(session, &self.request)?;
        ctx.progress("requesting notarisation");
        Ok(Step::Receive(session))
      }
      Resume::Received { result, .. } => {
        let outcome: NotarisationOutcome = serde_json::from_value(result?)?;
        match outcome {
          NotarisationOutcome::Signed { signature } => {
            let signature = serde_json::to_value(signature)?;
            ctx.record_ledger_write("notarised", signature.clone());
            Ok(Step::Done(signature))
          }
          NotarisationOutcome::Conflict { consumed } => {
            let states: Vec<String> = consumed.iter().map(|c| c.state.to_string()).collect();
            Err(WorkflowFailure::Counterparty {
              party: self.notary.clone(),
              message: format!("input states already consumed: {}", states.join(", ")),
            })
          }
          NotarisationOutcome::Error { error } => Err(WorkflowFailure::Counterparty {
            party: self.notary.clone(),
            message: error.to_string(),
          }),
        }
      }
      other => Err(WorkflowFailure::logic(format!(
        "notary client cannot resume from {:?}",
        other
      ))),
    }
  }

  fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(self)
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
enum ResponderPhase {
  Receiving,
  Notarising { request: NotarisationRequest },
}

#[derive(Serialize, Deserialize)]
struct ResponderState {
  session: SessionId,
  phase: ResponderPhase,
}

/// Runs on the notary node: receives one request, decides it through the
/// installed [`NotaryService`] and answers exactly once.
pub struct NotaryResponder {
  session: SessionId,
  phase: ResponderPhase,
  service: Arc<dyn NotaryService>,
}

impl NotaryResponder {
  pub fn new(session: SessionId, service: Arc<dyn NotaryService>) -> Self {
    Self {
      session,
      phase: ResponderPhase::Receiving,
      service,
    }
  }

  /// Rebuild a responder from its checkpointed state.
  pub fn restore(
    state: serde_json::Value,
    service: Arc<dyn NotaryService>,
  ) -> Result<Self, serde_json::Error> {
    let state: ResponderState = serde_json::from_value(state)?;
    Ok(Self {
      session: state.session,
      phase: state.phase,
      service,
    })
  }

  fn notarise(&self, request: NotarisationRequest) -> ExternalOperation {
    let service = self.service.clone();
    async move {
      let outcome = service.notarise(request).await;
      serde_json::to_value(outcome).map_err(WorkflowFailure::from)
    }
    .boxed()
  }
}

impl WorkflowLogic for NotaryResponder {
  fn workflow_type(&self) -> WorkflowType {
    WorkflowType::new(NOTARY_RESPONDER)
  }

  fn step(&mut self, ctx: &mut StepContext<'_>, resume: Resume) -> Result<Step, WorkflowFailure> {
    match (resume, self.phase.clone()) {
      (Resume::Start, ResponderPhase::Receiving) => Ok(Step::Receive(self.session)),
      (Resume::Received { result, .. }, ResponderPhase::Receiving) => {
        let request: NotarisationRequest = serde_json::from_value(result?)?;
        debug!(tx_id = %request.tx_id, requester = %request.requester, "received notarisation request");
        self.phase = ResponderPhase::Notarising {
          request: request.clone(),
        };
        Ok(Step::External(self.notarise(request)))
      }
      (Resume::Restarted, ResponderPhase::Notarising { request }) => {
        debug!(tx_id = %request.tx_id, "re-issuing notarisation after restart");
        Ok(Step::External(self.notarise(request)))
      }
      (Resume::External(outcome), ResponderPhase::Notarising { .. }) => {
        let outcome = outcome?;
        ctx.send(self.session, outcome.clone());
        Ok(Step::Done(outcome))
      }
      (resume, phase) => Err(WorkflowFailure::logic(format!(
        "notary responder cannot resume from {:?} while {:?}",
        resume, phase
      ))),
    }
  }

  fn snapshot(&self) -> Result<serde_json::Value, serde_json::Error> {
    serde_json::to_value(ResponderState {
      session: self.session,
      phase: self.phase.clone(),
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::service::SingleNodeNotary;
  use crate::types::StateRef;
  use crate::uniqueness::InMemoryUniquenessProvider;
  use ledgerflow_workflow::{InvocationContext, WorkflowId};
  use std::collections::BTreeMap;

  fn responder() -> NotaryResponder {
    let service = SingleNodeNotary::new("notary-key", Arc::new(InMemoryUniquenessProvider::new()));
    NotaryResponder::new(SessionId::new_random(), Arc::new(service))
  }

  fn request() -> NotarisationRequest {
    NotarisationRequest {
      tx_id: "tx-1".to_string(),
      inputs: vec![StateRef::new("issue", 0)],
      references: Vec::new(),
      time_window: None,
      requester: Party::new("Alice"),
    }
  }

  fn step(logic: &mut dyn WorkflowLogic, resume: Resume) -> Result<Step, WorkflowFailure> {
    let us = Party::new("Notary");
    let invocation = InvocationContext::peer(Party::new("Alice"));
    let mut ctx = StepContext::new(WorkflowId::new_random(), &us, &invocation, BTreeMap::new(), chrono::Utc::now());
    logic.step(&mut ctx, resume)
  }

  #[tokio::test]
  async fn test_restored_responder_reissues_notarisation() {
    let mut original = responder();
    let session = original.session;
    step(&mut original, Resume::Start).unwrap();
    let received = Resume::Received {
      session,
      result: Ok(serde_json::to_value(request()).unwrap()),
    };
    assert!(matches!(step(&mut original, received), Ok(Step::External(_))));

    let service = original.service.clone();
    let mut restored = NotaryResponder::restore(original.snapshot().unwrap(), service).unwrap();

    match step(&mut restored, Resume::Restarted) {
      Ok(Step::External(operation)) => {
        let outcome: NotarisationOutcome = serde_json::from_value(operation.await.unwrap()).unwrap();
        assert!(matches!(outcome, NotarisationOutcome::Signed { .. }));
      }
      other => panic!("expected external operation, got {:?}", other),
    }
  }

  #[test]
  fn test_responder_rejects_out_of_order_resume() {
    let mut responder = responder();
    assert!(step(&mut responder, Resume::Yielded).is_err());
  }
}
