use wg_core::{ExecError, OperationDef, Variable};

use crate::session::Session;

impl Session {
    /// Defines a variable through the legacy write path: outside loop
    /// frames the existing binding is overwritten wherever it was declared,
    /// inside loop frames the write shadows like a local.
    pub(crate) fn execute_var_def(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        let name = self.required_attr(def, "name")?;
        let overwrite = self.attr_bool(def, "overwrite", true)?;
        if !overwrite && self.context.contains(&name) {
            return Ok(Variable::empty());
        }
        let value = self.execute_body(def)?;
        self.context.set_legacy(&name, value);
        Ok(Variable::empty())
    }

    pub(crate) fn execute_var(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        let name = self.required_attr(def, "name")?;
        self.context.get(&name).cloned().ok_or_else(|| {
            ExecError::config(format!("variable \"{}\" is not defined", name))
        })
    }

    /// Executes children for their side effects only.
    pub(crate) fn execute_empty(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        self.execute_body(def)?;
        Ok(Variable::empty())
    }

    /// Flattens the body result to a text node using the configured charset.
    pub(crate) fn execute_text(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        let value = self.execute_body(def)?;
        let charset = self.config.charset.clone();
        Ok(Variable::text(value.to_text_with_charset(&charset)?))
    }

    /// Evaluates the templated body as one script in the configured (or
    /// overridden) language; `return="false"` discards the value.
    pub(crate) fn execute_script(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        let language = self.attr_text(def, "language")?;
        let keep_result = self.attr_bool(def, "return", true)?;
        let code = self.execute_body(def)?.to_text();
        let value = self.eval_expression(&code, language.as_deref())?;
        Ok(if keep_result {
            value
        } else {
            Variable::empty()
        })
    }
}
