use std::collections::BTreeMap;

use rhai::{Array, Blob, Dynamic, Engine, ImmutableString, Scope, FLOAT, INT};
use wg_core::{Evaluation, ExecError, ExpressionEvaluator, Variable};

pub const LANGUAGE: &str = "rhai";

/// Rhai-backed scripting collaborator. Visible engine bindings are pushed
/// into a fresh rhai scope before evaluation; afterwards every scope entry
/// that changed, plus every name the script newly declared at top level, is
/// handed back for the engine to merge.
#[derive(Debug, Default)]
pub struct RhaiEvaluator;

impl ExpressionEvaluator for RhaiEvaluator {
    fn evaluate(
        &self,
        code: &str,
        language: &str,
        bindings: &[(String, Variable)],
    ) -> Result<Evaluation, ExecError> {
        if !language.eq_ignore_ascii_case(LANGUAGE) {
            return Err(ExecError::eval(format!(
                "unsupported scripting language \"{}\"",
                language
            )));
        }

        let mut scope = Scope::new();
        let mut pushed = BTreeMap::new();
        for (name, value) in bindings {
            let Some(dynamic) = variable_to_dynamic(value) else {
                // Internal handles stay engine-side.
                continue;
            };
            scope.push_dynamic(name.clone(), dynamic);
            pushed.insert(name.clone(), value.clone());
        }

        let mut engine = Engine::new();
        engine.set_strict_variables(true);

        let result = engine
            .eval_with_scope::<Dynamic>(&mut scope, code)
            .map_err(|error| ExecError::eval(format!("rhai evaluation failed: {}", error)))?;
        let value = dynamic_to_variable(result)?;

        let mut changed = Vec::new();
        for (name, _constant, dynamic) in scope.iter() {
            let after = dynamic_to_variable(dynamic)?;
            match pushed.get(name) {
                Some(before) if *before == after => {}
                _ => changed.push((name.to_string(), after)),
            }
        }

        Ok(Evaluation {
            value,
            bindings: changed,
        })
    }
}

/// Engine value -> rhai value. Top-level internal handles are not
/// representable and return `None`; inside lists they degrade to their
/// label.
pub fn variable_to_dynamic(value: &Variable) -> Option<Dynamic> {
    match value {
        Variable::Empty => Some(Dynamic::UNIT),
        Variable::Node(wg_core::NodeValue::Text(text)) => Some(Dynamic::from(text.clone())),
        Variable::Node(wg_core::NodeValue::Number(number)) => {
            if number.fract().abs() < f64::EPSILON
                && *number >= i64::MIN as f64
                && *number <= i64::MAX as f64
            {
                Some(Dynamic::from_int(*number as INT))
            } else {
                Some(Dynamic::from_float(*number as FLOAT))
            }
        }
        Variable::Node(wg_core::NodeValue::Binary(bytes)) => {
            Some(Dynamic::from_blob(bytes.clone()))
        }
        Variable::List(items) => {
            let mut array = Array::new();
            for item in items {
                match variable_to_dynamic(item) {
                    Some(dynamic) => array.push(dynamic),
                    None => array.push(Dynamic::from(item.to_text())),
                }
            }
            Some(Dynamic::from_array(array))
        }
        Variable::Internal(_) => None,
    }
}

pub fn dynamic_to_variable(value: Dynamic) -> Result<Variable, ExecError> {
    if value.is_unit() {
        return Ok(Variable::Empty);
    }
    if value.is::<bool>() {
        return Ok(Variable::text(if value.cast::<bool>() {
            "true"
        } else {
            "false"
        }));
    }
    if value.is::<INT>() {
        return Ok(Variable::number(value.cast::<INT>() as f64));
    }
    if value.is::<FLOAT>() {
        return Ok(Variable::number(value.cast::<FLOAT>()));
    }
    if value.is::<ImmutableString>() {
        return Ok(Variable::text(value.cast::<ImmutableString>().to_string()));
    }
    if value.is::<Blob>() {
        return Ok(Variable::binary(value.cast::<Blob>()));
    }
    if value.is::<Array>() {
        let array = value.cast::<Array>();
        let mut items = Vec::with_capacity(array.len());
        for item in array {
            items.push(dynamic_to_variable(item)?);
        }
        return Ok(Variable::list(items));
    }

    Err(ExecError::eval("unsupported rhai value type"))
}
