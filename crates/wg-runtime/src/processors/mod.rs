mod call;
mod control;
mod http;
mod regexp;
mod vars;

use std::collections::BTreeMap;
use std::sync::Arc;

use wg_core::{ExecError, OperationDef, Variable};

use crate::session::Session;

/// Open extension point: third-party processors satisfy the same
/// execute-with-context contract as the built-in control-flow kinds and run
/// through the identical status/diagnostics wrapper.
pub trait PluginProcessor: Send + Sync {
    fn execute(&self, session: &mut Session, def: &OperationDef) -> Result<Variable, ExecError>;
}

/// Element-name -> plugin table, built once per configuration load and
/// immutable for the run. Deliberately an owned object rather than a
/// process-wide registry.
#[derive(Default)]
pub struct PluginRegistry {
    table: BTreeMap<String, Arc<dyn PluginProcessor>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, plugin: Arc<dyn PluginProcessor>) {
        self.table.insert(name.into(), plugin);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn PluginProcessor>> {
        self.table.get(name)
    }
}

impl Session {
    /// Closed dispatch over the built-in processor kinds; unknown element
    /// names fall through to the plugin registry.
    pub(crate) fn execute_operation(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        match def.name.as_str() {
            "body" => self.execute_body(def),
            "loop" => self.execute_loop(def),
            "while" => self.execute_while(def),
            "try" => self.execute_try(def),
            "exit" => self.execute_exit(def),
            "call" => self.execute_call(def),
            "call-param" => self.execute_call_param(def),
            "return" => self.execute_return(def),
            "regexp" => self.execute_regexp(def),
            "http" => self.execute_http(def),
            "http-param" => self.execute_http_param(def),
            "http-header" => self.execute_http_header(def),
            "script" => self.execute_script(def),
            "var-def" => self.execute_var_def(def),
            "var" => self.execute_var(def),
            "empty" => self.execute_empty(def),
            "text" => self.execute_text(def),
            other => match self.plugins.get(other) {
                Some(plugin) => {
                    let plugin = Arc::clone(plugin);
                    plugin.execute(self, def)
                }
                None => Err(ExecError::config(format!(
                    "unknown element \"{}\"",
                    other
                ))),
            },
        }
    }

    /// Attribute value evaluated as a template, `None` when absent.
    pub(crate) fn attr_text(
        &mut self,
        def: &OperationDef,
        name: &str,
    ) -> Result<Option<String>, ExecError> {
        match def.attr(name) {
            Some(template) => {
                let template = template.to_string();
                Ok(Some(self.evaluate_template(&template, None)?.to_text()))
            }
            None => Ok(None),
        }
    }

    pub(crate) fn required_attr(
        &mut self,
        def: &OperationDef,
        name: &str,
    ) -> Result<String, ExecError> {
        self.attr_text(def, name)?.ok_or_else(|| {
            ExecError::config(format!(
                "element \"{}\" requires attribute \"{}\"",
                def.name, name
            ))
        })
    }

    pub(crate) fn attr_bool(
        &mut self,
        def: &OperationDef,
        name: &str,
        default: bool,
    ) -> Result<bool, ExecError> {
        match self.attr_text(def, name)? {
            Some(text) => Ok(text.trim().eq_ignore_ascii_case("true")),
            None => Ok(default),
        }
    }

    pub(crate) fn attr_f64(
        &mut self,
        def: &OperationDef,
        name: &str,
        default: f64,
    ) -> Result<f64, ExecError> {
        match self.attr_text(def, name)? {
            Some(text) => text.trim().parse::<f64>().map_err(|_| {
                ExecError::config(format!(
                    "attribute \"{}\" of \"{}\" is not a number: \"{}\"",
                    name, def.name, text
                ))
            }),
            None => Ok(default),
        }
    }
}

pub(crate) fn required_child<'a>(
    def: &'a OperationDef,
    name: &str,
) -> Result<&'a OperationDef, ExecError> {
    def.child_named(name).ok_or_else(|| {
        ExecError::config(format!(
            "element \"{}\" requires a \"{}\" child",
            def.name, name
        ))
    })
}
