use regex::RegexBuilder;
use tracing::warn;
use wg_core::{ExecError, OperationDef, Variable};

use crate::processors::required_child;
use crate::session::Session;
use crate::DEFAULT_MAX_LOOPS;

impl Session {
    /// Applies a compiled pattern to every element of the source's list
    /// form. Per match, the whole match and each capture group are bound as
    /// `_0`, `_1`, ... inside a scoped frame and the result template is
    /// evaluated. Extract mode flattens all per-match results into one list
    /// (source order, then match order); replace mode splices the evaluated
    /// results over the matches and keeps the unmatched remainder.
    pub(crate) fn execute_regexp(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        let pattern_def = required_child(def, "regexp-pattern")?.clone();
        let source_def = required_child(def, "regexp-source")?.clone();
        let result_def = def.child_named("regexp-result").cloned();

        let replace = self.attr_bool(def, "replace", false)?;
        let max = self.attr_f64(def, "max", DEFAULT_MAX_LOOPS)?;
        let case_insensitive = self.attr_bool(def, "flag-caseinsensitive", false)?;
        let multi_line = self.attr_bool(def, "flag-multiline", false)?;
        let dot_all = self.attr_bool(def, "flag-dotall", true)?;
        let unicode_case = self.attr_bool(def, "flag-unicodecase", true)?;
        if self.attr_bool(def, "flag-canoneq", false)? {
            warn!("canonical-equivalence matching is not supported; flag ignored");
        }

        let pattern_text = self.execute_body(&pattern_def)?.to_text();
        let pattern = RegexBuilder::new(&pattern_text)
            .case_insensitive(case_insensitive)
            .multi_line(multi_line)
            .dot_matches_new_line(dot_all)
            .unicode(unicode_case)
            .build()
            .map_err(|error| {
                ExecError::config(format!(
                    "invalid regexp pattern \"{}\": {}",
                    pattern_text, error
                ))
            })?;

        let source_items = self.execute_body(&source_def)?.to_list()?;

        let mut aggregate = Vec::new();
        for item in source_items {
            let text = item.to_text();
            let per_element = self.scoped(false, |session| {
                let mut results = Vec::new();
                let mut buffer = String::new();
                let mut last_end = 0usize;
                let mut match_index = 0usize;

                for captures in pattern.captures_iter(&text) {
                    match_index += 1;
                    if match_index as f64 > max {
                        break;
                    }
                    let Some(whole) = captures.get(0) else {
                        break;
                    };
                    session
                        .context
                        .set_local("_0", Variable::text(whole.as_str()));
                    for group in 1..captures.len() {
                        let grabbed =
                            captures.get(group).map(|m| m.as_str()).unwrap_or_default();
                        session
                            .context
                            .set_local(&format!("_{}", group), Variable::text(grabbed));
                    }

                    let match_result = match &result_def {
                        Some(result) => session.execute_body(result)?,
                        None => Variable::text(whole.as_str()),
                    };

                    if replace {
                        buffer.push_str(&text[last_end..whole.start()]);
                        buffer.push_str(&match_result.to_text());
                        last_end = whole.end();
                    } else {
                        results.push(match_result);
                    }
                }

                if replace {
                    buffer.push_str(&text[last_end..]);
                    Ok(vec![Variable::text(buffer)])
                } else {
                    Ok(results)
                }
            })?;
            aggregate.extend(per_element);
        }

        Ok(Variable::list(aggregate))
    }
}
