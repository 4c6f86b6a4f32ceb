use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Instant;

use tracing::{debug, warn};
use wg_core::{
    Config, ExecError, ExpressionEvaluator, HttpClient, NoExpressionEvaluator, NoHttpClient,
    OperationDef, Variable,
};

use crate::context::DynamicContext;
use crate::processors::PluginRegistry;

/// Per-session execution status. Ready -> Running -> one of the terminal
/// states; Running <-> Paused is the only side transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ready,
    Running,
    Paused,
    Stopped,
    Exited,
    Finished,
    Error,
}

#[derive(Debug)]
struct StatusCell {
    state: Mutex<Status>,
    resumed: Condvar,
    cancelled: AtomicBool,
}

fn lock_state(cell: &StatusCell) -> MutexGuard<'_, Status> {
    cell.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Controller-side handle: the only piece of session state shared with
/// other threads. `pause`/`resume`/`stop` drive the status machine;
/// `cancel` raises the cancellation signal the worker observes at its next
/// suspension point.
#[derive(Clone)]
pub struct SessionHandle {
    cell: Arc<StatusCell>,
}

impl SessionHandle {
    pub fn status(&self) -> Status {
        *lock_state(&self.cell)
    }

    pub fn pause(&self) {
        let mut state = lock_state(&self.cell);
        if *state == Status::Running {
            *state = Status::Paused;
        }
    }

    pub fn resume(&self) {
        let mut state = lock_state(&self.cell);
        if *state == Status::Paused {
            *state = Status::Running;
        }
        drop(state);
        self.cell.resumed.notify_all();
    }

    pub fn stop(&self) {
        let mut state = lock_state(&self.cell);
        if matches!(*state, Status::Running | Status::Paused) {
            *state = Status::Stopped;
        }
        drop(state);
        self.cell.resumed.notify_all();
    }

    /// Controller-side counterpart of the exit processor: the walk winds
    /// down as a sequence of no-ops, without an exit message.
    pub fn exit(&self) {
        let mut state = lock_state(&self.cell);
        if matches!(*state, Status::Running | Status::Paused) {
            *state = Status::Exited;
        }
        drop(state);
        self.cell.resumed.notify_all();
    }

    pub fn cancel(&self) {
        self.cell.cancelled.store(true, Ordering::SeqCst);
        // Take the lock so a worker checking the flag under it cannot miss
        // the wakeup.
        drop(lock_state(&self.cell));
        self.cell.resumed.notify_all();
    }
}

/// Diagnostic record for one processor activation, delivered to listeners
/// when the processor finishes (also when an ancestor later fails).
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorInfo {
    pub element: String,
    pub id: Option<String>,
    pub properties: BTreeMap<String, String>,
}

pub(crate) struct Activation {
    pub(crate) info: ProcessorInfo,
    started: Instant,
}

/// Session-lifecycle callbacks, fired synchronously in registration order.
pub trait SessionListener {
    fn on_execution_start(&mut self) {}
    fn on_execution_end(&mut self, _status: Status) {}
    fn on_execution_paused(&mut self) {}
    fn on_execution_continued(&mut self) {}
    fn on_execution_error(&mut self, _error: &ExecError) {}
    fn on_processor_started(&mut self, _info: &ProcessorInfo) {}
    fn on_processor_finished(&mut self, _info: &ProcessorInfo) {}
}

/// One function-call activation on the running-functions stack, with its own
/// result slot so nested calls cannot clobber an outer call's return value.
pub(crate) struct CallActivation {
    pub(crate) function_name: String,
    pub(crate) result: Option<Variable>,
}

/// Open http element collecting the params/headers its children register.
#[derive(Default)]
pub(crate) struct HttpActivation {
    pub(crate) params: Vec<(String, String)>,
    pub(crate) headers: Vec<(String, String)>,
}

pub struct SessionOptions {
    pub config: Config,
    pub evaluator: Option<Arc<dyn ExpressionEvaluator>>,
    pub http: Option<Arc<dyn HttpClient>>,
    pub plugins: Option<PluginRegistry>,
    pub working_dir: Option<PathBuf>,
}

impl SessionOptions {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            evaluator: None,
            http: None,
            plugins: None,
            working_dir: None,
        }
    }
}

/// Execution session: owns the root context and walks the configured
/// operation tree on the calling thread. All mutable engine state except the
/// status cell stays on this single worker thread.
pub struct Session {
    pub(crate) config: Config,
    pub(crate) plugins: Arc<PluginRegistry>,
    pub(crate) evaluator: Arc<dyn ExpressionEvaluator>,
    pub(crate) http: Arc<dyn HttpClient>,
    pub(crate) context: DynamicContext,
    pub(crate) working_dir: PathBuf,
    cell: Arc<StatusCell>,
    listeners: Vec<Box<dyn SessionListener>>,
    pub(crate) running_processors: Vec<Activation>,
    pub(crate) running_functions: Vec<CallActivation>,
    pub(crate) pending_call_params: BTreeMap<String, Variable>,
    pub(crate) http_activations: Vec<HttpActivation>,
    last_error: Option<ExecError>,
    exit_message: Option<String>,
}

impl Session {
    pub fn new(options: SessionOptions) -> Self {
        Self {
            config: options.config,
            plugins: Arc::new(options.plugins.unwrap_or_default()),
            evaluator: options
                .evaluator
                .unwrap_or_else(|| Arc::new(NoExpressionEvaluator)),
            http: options.http.unwrap_or_else(|| Arc::new(NoHttpClient)),
            context: DynamicContext::new(),
            working_dir: options.working_dir.unwrap_or_else(|| PathBuf::from(".")),
            cell: Arc::new(StatusCell {
                state: Mutex::new(Status::Ready),
                resumed: Condvar::new(),
                cancelled: AtomicBool::new(false),
            }),
            listeners: Vec::new(),
            running_processors: Vec::new(),
            running_functions: Vec::new(),
            pending_call_params: BTreeMap::new(),
            http_activations: Vec::new(),
            last_error: None,
            exit_message: None,
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            cell: Arc::clone(&self.cell),
        }
    }

    pub fn status(&self) -> Status {
        *lock_state(&self.cell)
    }

    pub fn add_listener(&mut self, listener: Box<dyn SessionListener>) {
        self.listeners.push(listener);
    }

    pub fn context(&self) -> &DynamicContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut DynamicContext {
        &mut self.context
    }

    pub fn working_dir(&self) -> &PathBuf {
        &self.working_dir
    }

    pub fn last_error(&self) -> Option<&ExecError> {
        self.last_error.as_ref()
    }

    pub fn exit_message(&self) -> Option<&str> {
        self.exit_message.as_deref()
    }

    /// Walks the root operation list. Uncaught application failures
    /// transition the session to `Error` (and are returned); a cancellation
    /// unwinds past this driver untouched.
    pub fn execute(&mut self) -> Result<Status, ExecError> {
        {
            let mut state = lock_state(&self.cell);
            if *state != Status::Ready {
                return Err(ExecError::illegal_state(format!(
                    "session cannot be executed from status {:?}",
                    *state
                )));
            }
            *state = Status::Running;
        }
        debug!("execution started");
        self.notify(|listener| listener.on_execution_start());

        let operations = self.config.operations.clone();
        match self.run_sequence(&operations) {
            Ok(_) => {
                let final_status = {
                    let mut state = lock_state(&self.cell);
                    if *state == Status::Running {
                        *state = Status::Finished;
                    }
                    *state
                };
                debug!(?final_status, "execution ended");
                self.notify(|listener| listener.on_execution_end(final_status));
                Ok(final_status)
            }
            Err(error) if error.is_cancelled() => Err(ExecError::Cancelled),
            Err(error) => {
                {
                    let mut state = lock_state(&self.cell);
                    *state = Status::Error;
                }
                warn!(%error, "execution failed");
                self.notify(|listener| listener.on_execution_error(&error));
                self.notify(|listener| listener.on_execution_end(Status::Error));
                self.last_error = Some(error.clone());
                Err(error)
            }
        }
    }

    /// The single wrapper every processor activation goes through: status
    /// gate, running-processor bookkeeping, timing, listener notification.
    /// Concrete processors never duplicate any of this.
    pub fn run_operation(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        if !self.gate()? {
            // Stopped or exited: the rest of the walk is a no-op.
            return Ok(Variable::empty());
        }

        let id = match &def.id {
            Some(template) => Some(self.evaluate_template(template, None)?.to_text()),
            None => None,
        };
        let info = ProcessorInfo {
            element: def.name.clone(),
            id,
            properties: BTreeMap::new(),
        };
        self.notify(|listener| listener.on_processor_started(&info));
        debug!(element = %info.element, "processor start");
        self.running_processors.push(Activation {
            info,
            started: Instant::now(),
        });

        let result = self.execute_operation(def);

        if let Some(activation) = self.running_processors.pop() {
            let mut info = activation.info;
            info.properties.insert(
                "time".to_string(),
                activation.started.elapsed().as_millis().to_string(),
            );
            if let Err(error) = &result {
                if !error.is_cancelled() {
                    info.properties.insert("error".to_string(), error.to_string());
                }
            }
            self.notify(|listener| listener.on_processor_finished(&info));
        }
        result
    }

    /// Sequence semantics used for the root list and for multi-child bodies:
    /// one child returns its result directly, several accumulate into a list
    /// in document order.
    pub(crate) fn run_sequence(&mut self, operations: &[OperationDef]) -> Result<Variable, ExecError> {
        match operations {
            [] => Ok(Variable::empty()),
            [single] => self.run_operation(single),
            many => {
                let mut items = Vec::with_capacity(many.len());
                for operation in many {
                    items.push(self.run_operation(operation)?);
                }
                Ok(Variable::list(items))
            }
        }
    }

    /// Body semantics of one definition: children as a sequence, or the
    /// templated body text when the definition is a leaf.
    pub(crate) fn execute_body(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        if def.children.is_empty() {
            return match &def.body_text {
                Some(text) => self.evaluate_template(text, None),
                None => Ok(Variable::empty()),
            };
        }
        self.run_sequence(&def.children)
    }

    /// Scoped-execution primitive threading the whole session through the
    /// body; the frame is popped on every exit path.
    pub(crate) fn scoped<T>(
        &mut self,
        loop_frame: bool,
        body: impl FnOnce(&mut Self) -> Result<T, ExecError>,
    ) -> Result<T, ExecError> {
        self.context.push_frame(loop_frame);
        let result = body(self);
        self.context.pop_frame();
        result
    }

    /// Status gate run before any processor does real work. Returns
    /// `Ok(false)` when execution was stopped or exited (cooperative no-op),
    /// blocks while paused, and raises `Cancelled` when the cancel flag is
    /// set — also when it is set while blocked.
    fn gate(&mut self) -> Result<bool, ExecError> {
        if self.cell.cancelled.load(Ordering::SeqCst) {
            return Err(ExecError::Cancelled);
        }

        let is_paused = *lock_state(&self.cell) == Status::Paused;
        if is_paused {
            debug!("worker pausing");
            self.notify(|listener| listener.on_execution_paused());
            {
                let mut state = lock_state(&self.cell);
                while *state == Status::Paused {
                    if self.cell.cancelled.load(Ordering::SeqCst) {
                        return Err(ExecError::Cancelled);
                    }
                    state = self
                        .cell
                        .resumed
                        .wait(state)
                        .unwrap_or_else(|poisoned| poisoned.into_inner());
                }
            }
            if self.cell.cancelled.load(Ordering::SeqCst) {
                return Err(ExecError::Cancelled);
            }
            if self.status() == Status::Running {
                debug!("worker resumed");
                self.notify(|listener| listener.on_execution_continued());
            }
        }

        match self.status() {
            Status::Stopped | Status::Exited => Ok(false),
            _ => Ok(true),
        }
    }

    /// Transition raised by the exit processor; from that point every
    /// subsequent processor invocation is a no-op.
    pub(crate) fn exit_with(&mut self, message: String) {
        self.handle().exit();
        debug!(message = %message, "exit processor triggered");
        self.exit_message = Some(message);
    }

    /// Records a diagnostic property on the currently running processor.
    pub(crate) fn set_diag(&mut self, key: impl Into<String>, value: impl Into<String>) {
        if let Some(activation) = self.running_processors.last_mut() {
            activation.info.properties.insert(key.into(), value.into());
        }
    }

    /// True when an ancestor (strictly above the current processor) has the
    /// given element name.
    pub fn inside_element(&self, name: &str) -> bool {
        self.running_processors
            .iter()
            .rev()
            .skip(1)
            .any(|activation| activation.info.element == name)
    }

    pub fn parent_element(&self) -> Option<&str> {
        let len = self.running_processors.len();
        if len < 2 {
            return None;
        }
        Some(self.running_processors[len - 2].info.element.as_str())
    }

    pub fn running_function_depth(&self) -> usize {
        self.running_functions.len()
    }

    pub(crate) fn notify(&mut self, mut callback: impl FnMut(&mut dyn SessionListener)) {
        for listener in self.listeners.iter_mut() {
            callback(listener.as_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_session() -> Session {
        let mut session = Session::new(SessionOptions::new(Config::new(Vec::new())));
        session.execute().expect("empty run");
        session
    }

    #[test]
    fn fresh_sessions_start_ready() {
        let session = Session::new(SessionOptions::new(Config::new(Vec::new())));
        assert_eq!(session.status(), Status::Ready);
        assert!(session.last_error().is_none());
        assert!(session.exit_message().is_none());
    }

    #[test]
    fn empty_configuration_finishes_immediately() {
        let session = running_session();
        assert_eq!(session.status(), Status::Finished);
    }

    #[test]
    fn pause_and_resume_only_apply_to_their_source_states() {
        let session = Session::new(SessionOptions::new(Config::new(Vec::new())));
        let handle = session.handle();

        // Ready is not pausable and not resumable.
        handle.pause();
        assert_eq!(handle.status(), Status::Ready);
        handle.resume();
        assert_eq!(handle.status(), Status::Ready);
    }

    #[test]
    fn stop_is_inert_on_terminal_states() {
        let session = running_session();
        let handle = session.handle();
        handle.stop();
        assert_eq!(handle.status(), Status::Finished);
    }

    #[test]
    fn run_sequence_wraps_only_multi_element_lists() {
        let mut session = Session::new(SessionOptions::new(Config::new(Vec::new())));
        {
            let mut state = lock_state(&session.cell);
            *state = Status::Running;
        }

        assert_eq!(
            session.run_sequence(&[]).expect("empty"),
            Variable::empty()
        );

        let single = [OperationDef::new("empty")];
        assert_eq!(
            session.run_sequence(&single).expect("single"),
            Variable::empty()
        );

        let pair = [OperationDef::new("empty"), OperationDef::new("empty")];
        let Variable::List(items) = session.run_sequence(&pair).expect("pair") else {
            panic!("two operations accumulate into a list");
        };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn ancestor_lookup_skips_the_current_processor() {
        let mut session = Session::new(SessionOptions::new(Config::new(Vec::new())));
        for element in ["http", "body", "http-param"] {
            session.running_processors.push(Activation {
                info: ProcessorInfo {
                    element: element.to_string(),
                    id: None,
                    properties: BTreeMap::new(),
                },
                started: Instant::now(),
            });
        }

        assert!(session.inside_element("http"));
        assert!(session.inside_element("body"));
        // The current processor itself does not count as an ancestor.
        assert!(!session.inside_element("http-param"));
        assert_eq!(session.parent_element(), Some("body"));
    }
}
