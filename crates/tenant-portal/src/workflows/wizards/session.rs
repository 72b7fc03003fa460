use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::blueprint::{StepTemplate, WizardBlueprint, WizardKind};
use super::form::{FormError, FormState};
use crate::workflows::payments::PaymentLookup;
use crate::workflows::stepper::{Advance, StepperEngine, StepperError, StepperSnapshot};

/// Identifier wrapper for open wizard sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

static SESSION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

fn next_session_id() -> SessionId {
    let id = SESSION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    SessionId(format!("wiz-{id:06}"))
}

/// One user's pass through a wizard.
#[derive(Debug)]
pub struct WizardSession {
    id: SessionId,
    kind: WizardKind,
    engine: StepperEngine<StepTemplate, FormState>,
    form: FormState,
    completed: bool,
    opened_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WizardSession {
    fn view(&self) -> WizardView {
        WizardView {
            session_id: self.id.clone(),
            kind: self.kind,
            title: self.kind.label(),
            stepper: self.engine.snapshot(),
            step: self.engine.current().content().clone(),
            completed: self.completed,
            form: self.form.clone(),
            opened_at: self.opened_at,
            updated_at: self.updated_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Serializable state of a session for the portals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WizardView {
    pub session_id: SessionId,
    pub kind: WizardKind,
    pub title: &'static str,
    pub stepper: StepperSnapshot,
    pub step: StepTemplate,
    pub completed: bool,
    pub form: FormState,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Answer to a step submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepResult {
    pub advance: Advance,
    pub wizard: WizardView,
}

pub const DEFAULT_IDLE_MINUTES: i64 = 30;

/// Owns open wizard sessions; each session is driven by one caller at a time.
pub struct WizardSessionService {
    payments: Arc<dyn PaymentLookup>,
    idle_timeout: Duration,
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<WizardSession>>>>,
}

impl WizardSessionService {
    pub fn new(payments: Arc<dyn PaymentLookup>) -> Self {
        Self {
            payments,
            idle_timeout: Duration::minutes(DEFAULT_IDLE_MINUTES),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Sessions untouched for this long are dropped when new ones open.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Drop idle sessions and return how many went. Sessions currently
    /// locked by a caller are kept.
    pub fn purge_idle(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let before = sessions.len();
        sessions.retain(|_, session| match session.try_lock() {
            Ok(session) => now - session.updated_at < self.idle_timeout,
            Err(_) => true,
        });
        let purged = before - sessions.len();
        if purged > 0 {
            debug!(purged, remaining = sessions.len(), "idle wizard sessions dropped");
        }
        purged
    }

    fn session(&self, id: &SessionId) -> Result<Arc<Mutex<WizardSession>>, WizardError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| WizardError::NotFound(id.clone()))
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn open(&self, kind: WizardKind) -> Result<WizardView, WizardError> {
        self.purge_idle();
        let engine = WizardBlueprint::standard(kind).build(self.payments.clone())?;
        let now = Utc::now();
        let session = WizardSession {
            id: next_session_id(),
            kind,
            engine,
            form: FormState::new(),
            completed: false,
            opened_at: now,
            updated_at: now,
        };
        let view = session.view();

        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session.id.clone(), Arc::new(Mutex::new(session)));
        info!(session_id = %view.session_id, kind = ?kind, "wizard session opened");
        Ok(view)
    }

    pub async fn get(&self, id: &SessionId) -> Result<WizardView, WizardError> {
        let session = self.session(id)?;
        let session = session.lock().await;
        Ok(session.view())
    }

    /// Merge the submitted fields and try to leave the current step.
    ///
    /// Fields are kept even when validation refuses the move.
    pub async fn submit_step(
        &self,
        id: &SessionId,
        fields: BTreeMap<String, Value>,
    ) -> Result<StepResult, WizardError> {
        let session = self.session(id)?;
        let mut guard = session.lock().await;
        let session = &mut *guard;

        session.form.merge(fields);
        session.touch();
        let advance = session.engine.go_next(&session.form).await?;
        if advance == Advance::Completed {
            if let Some(index) = session.engine.first_unmet(&session.form).await? {
                let step = session.engine.steps()[index].key().to_string();
                warn!(session_id = %session.id, step = %step, "wizard completion refused");
                return Err(WizardError::Incomplete { step, index });
            }
            session.completed = true;
            info!(session_id = %session.id, kind = ?session.kind, "wizard completed");
        }

        Ok(StepResult {
            advance,
            wizard: session.view(),
        })
    }

    pub async fn back(&self, id: &SessionId) -> Result<WizardView, WizardError> {
        let session = self.session(id)?;
        let mut session = session.lock().await;
        if session.engine.go_back() {
            session.completed = false;
            session.touch();
        }
        Ok(session.view())
    }

    pub async fn jump(&self, id: &SessionId, index: usize) -> Result<WizardView, WizardError> {
        let session = self.session(id)?;
        let mut session = session.lock().await;
        let from = session.engine.current_index();
        session.engine.go_to(index)?;
        if index != from {
            session.completed = false;
        }
        session.touch();
        Ok(session.view())
    }

    pub async fn close(&self, id: &SessionId) -> Result<WizardView, WizardError> {
        let session = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or_else(|| WizardError::NotFound(id.clone()))?;
        let session = session.lock().await;
        debug!(session_id = %id, completed = session.completed, "wizard session closed");
        Ok(session.view())
    }
}

impl fmt::Debug for WizardSessionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WizardSessionService")
            .field("sessions", &self.len())
            .finish_non_exhaustive()
    }
}

/// Error raised by the wizard session service.
#[derive(Debug, thiserror::Error)]
pub enum WizardError {
    #[error("wizard session {0} not found")]
    NotFound(SessionId),
    #[error("wizard cannot complete: step '{step}' ({index}) is not satisfied")]
    Incomplete { step: String, index: usize },
    #[error(transparent)]
    Stepper(#[from] StepperError),
}

impl WizardError {
    /// The form problem behind a refused step, when that is what happened.
    pub fn form_error(&self) -> Option<&FormError> {
        match self {
            Self::Stepper(StepperError::Validator { source, .. }) => source.downcast_ref(),
            _ => None,
        }
    }
}
