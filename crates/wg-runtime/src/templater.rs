use wg_core::{ExecError, Variable};

use crate::session::Session;

enum Fragment {
    Literal(String),
    Expression(Variable),
}

impl Session {
    /// Evaluates `${...}` segments in `source` against the current context.
    /// Delimiters do not nest: the first `}` after a `${` terminates the
    /// segment. A source without any `${` is returned as literal text; a
    /// source that is exactly one segment returns the segment's value
    /// unconverted, preserving its native type.
    pub fn evaluate_template(
        &mut self,
        source: &str,
        language: Option<&str>,
    ) -> Result<Variable, ExecError> {
        if !source.contains("${") {
            return Ok(Variable::text(source));
        }

        let mut fragments = Vec::new();
        let mut rest = source;
        while let Some(start) = rest.find("${") {
            if start > 0 {
                fragments.push(Fragment::Literal(rest[..start].to_string()));
            }
            let after = &rest[start + 2..];
            let Some(end) = after.find('}') else {
                return Err(ExecError::eval(format!(
                    "unterminated template expression in \"{}\"",
                    source
                )));
            };
            let expression = &after[..end];
            let value = self.eval_expression(expression, language)?;
            fragments.push(Fragment::Expression(value));
            rest = &after[end + 1..];
        }
        if !rest.is_empty() {
            fragments.push(Fragment::Literal(rest.to_string()));
        }

        if fragments.len() == 1 {
            if let Some(Fragment::Expression(value)) = fragments.pop() {
                return Ok(value);
            }
        }

        let mut joined = String::new();
        for fragment in &fragments {
            match fragment {
                Fragment::Literal(text) => joined.push_str(text),
                Fragment::Expression(value) => joined.push_str(&value.to_text()),
            }
        }
        Ok(Variable::text(joined))
    }

    /// Runs one expression through the scripting collaborator and merges the
    /// bindings it hands back: new names become locals of the current frame,
    /// pre-existing names are mutated in place without shadowing.
    pub(crate) fn eval_expression(
        &mut self,
        code: &str,
        language: Option<&str>,
    ) -> Result<Variable, ExecError> {
        let language = language
            .map(str::to_string)
            .unwrap_or_else(|| self.config.default_language.clone());
        let bindings = self.context.iter_visible();
        let evaluation = self.evaluator.evaluate(code, &language, &bindings)?;
        for (name, value) in evaluation.bindings {
            if self.context.contains(&name) {
                self.context.replace_existing(&name, value)?;
            } else {
                self.context.set_local(&name, value);
            }
        }
        Ok(evaluation.value)
    }
}
