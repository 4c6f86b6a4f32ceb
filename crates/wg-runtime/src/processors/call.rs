use tracing::debug;
use wg_core::{ExecError, OperationDef, Variable};

use crate::session::{CallActivation, Session};

impl Session {
    /// Invokes a configured function. The call's own children run first so
    /// `call-param` elements can populate the pending-parameter map; the
    /// parameters then become locals of a fresh frame the function body runs
    /// in. Each activation carries its own result slot, written by `return`.
    pub(crate) fn execute_call(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        let name = self.required_attr(def, "name")?;
        let function = self.config.functions.get(&name).cloned().ok_or_else(|| {
            ExecError::illegal_state(format!("function \"{}\" is not defined", name))
        })?;

        // The pending map is saved and restored around the call so a call
        // nested inside another call's param body cannot mix parameters.
        let saved = std::mem::take(&mut self.pending_call_params);
        let params_result = self.execute_body(def);
        let params = std::mem::take(&mut self.pending_call_params);
        self.pending_call_params = saved;
        params_result?;

        debug!(function = %name, params = params.len(), "calling function");
        self.scoped(false, |session| {
            for (param_name, param_value) in params {
                session.context.set_local(&param_name, param_value);
            }
            session.running_functions.push(CallActivation {
                function_name: name.clone(),
                result: None,
            });
            let body_result = session.run_sequence(&function.body);
            let activation = session.running_functions.pop();
            body_result?;
            Ok(activation
                .and_then(|activation| activation.result)
                .unwrap_or_else(Variable::empty))
        })
    }

    /// Evaluates its body and registers the value in the session's pending
    /// parameter map for the enclosing call.
    pub(crate) fn execute_call_param(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        let name = self.required_attr(def, "name")?;
        if !self.inside_element("call") {
            return Err(ExecError::config(
                "call-param must appear inside a call element",
            ));
        }
        let value = self.execute_body(def)?;
        self.pending_call_params.insert(name, value);
        Ok(Variable::empty())
    }

    /// Writes the current function activation's result slot. Execution of
    /// the function body continues; the slot is consulted after the body
    /// finishes, and a later `return` in document order overwrites an
    /// earlier one.
    pub(crate) fn execute_return(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        let value = self.execute_body(def)?;
        match self.running_functions.last_mut() {
            Some(activation) => {
                activation.result = Some(value);
                Ok(Variable::empty())
            }
            None => Err(ExecError::illegal_state(
                "return used outside of a function call",
            )),
        }
    }
}
