use tracing::debug;
use wg_core::{ExecError, OperationDef, Variable};

use crate::processors::required_child;
use crate::session::Session;
use crate::{DEFAULT_MAX_LOOPS, ERROR_VARIABLE};

impl Session {
    /// For-each over the evaluated `list` child. Every iteration runs inside
    /// its own (non-loop-tagged) frame holding the item/index bindings, so
    /// nothing set by one iteration leaks into the next.
    pub(crate) fn execute_loop(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        let item_name = self.attr_text(def, "item")?;
        let index_name = self.attr_text(def, "index")?;
        let filter = self.attr_text(def, "filter")?;
        let max = self.attr_f64(def, "maxloops", DEFAULT_MAX_LOOPS)?;
        let suppress = self.attr_bool(def, "empty", false)?;
        let list_def = required_child(def, "list")?.clone();
        let body_def = def.child_named("body").cloned();

        let source = self.execute_body(&list_def)?.to_list()?;
        let selected = apply_filter(source, filter.as_deref())?;

        let mut collected = Vec::new();
        for (position, element) in selected.into_iter().enumerate() {
            if (position + 1) as f64 > max {
                break;
            }
            let value = self.scoped(false, |session| {
                if let Some(name) = &item_name {
                    session.context.set_local(name, element.clone());
                }
                if let Some(name) = &index_name {
                    session
                        .context
                        .set_local(name, Variable::number((position + 1) as f64));
                }
                match &body_def {
                    Some(body) => session.execute_body(body),
                    None => Ok(Variable::empty()),
                }
            })?;
            if !suppress {
                collected.push(value);
            }
        }

        Ok(if suppress {
            Variable::empty()
        } else {
            Variable::list(collected)
        })
    }

    /// Condition-driven loop. One loop-tagged frame spans all iterations;
    /// the index binding is re-set within that same frame each pass, and the
    /// loop tag switches the legacy write path over to per-frame shadowing.
    pub(crate) fn execute_while(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        let condition = def
            .attr("condition")
            .map(str::to_string)
            .ok_or_else(|| {
                ExecError::config("while element requires a \"condition\" attribute")
            })?;
        let index_name = self.attr_text(def, "index")?;
        let max = self.attr_f64(def, "maxloops", DEFAULT_MAX_LOOPS)?;
        let suppress = self.attr_bool(def, "empty", false)?;
        let children = def.children.clone();

        self.scoped(true, |session| {
            let mut collected = Vec::new();
            let mut index = 1usize;
            loop {
                if index as f64 > max {
                    debug!(max, "while loop hit its iteration ceiling");
                    break;
                }
                let verdict = session.evaluate_template(&condition, None)?.to_text();
                if !is_truthy(&verdict) {
                    break;
                }
                if let Some(name) = &index_name {
                    session
                        .context
                        .set_local(name, Variable::number(index as f64));
                }
                let value = session.run_sequence(&children)?;
                if !suppress {
                    collected.push(value);
                }
                index += 1;
            }
            Ok(if suppress {
                Variable::empty()
            } else {
                Variable::list(collected)
            })
        })
    }

    /// Runs the `body` child; application failures are recovered by the
    /// `catch` child with the failure bound to the error variable in a fresh
    /// frame. Cancellation is never recovered: even when it arrives wrapped
    /// inside an application failure, it is re-raised as cancellation.
    pub(crate) fn execute_try(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        let body = required_child(def, "body")?.clone();
        let catch = required_child(def, "catch")?.clone();

        match self.execute_body(&body) {
            Ok(value) => Ok(value),
            Err(error) if error.is_cancelled() => Err(ExecError::Cancelled),
            Err(error) => {
                debug!(%error, "try body failed, running catch");
                self.scoped(false, |session| {
                    session
                        .context
                        .set_local(ERROR_VARIABLE, Variable::text(error.to_string()));
                    session.execute_body(&catch)
                })
            }
        }
    }

    /// Transitions the session to `Exited` when the (optional) condition
    /// holds; empty or absent condition counts as true.
    pub(crate) fn execute_exit(&mut self, def: &OperationDef) -> Result<Variable, ExecError> {
        let condition = self.attr_text(def, "condition")?;
        let triggered = match condition.as_deref() {
            None => true,
            Some(text) if text.trim().is_empty() => true,
            Some(text) => is_truthy(text),
        };
        if triggered {
            let message = self.attr_text(def, "message")?.unwrap_or_default();
            self.exit_with(message);
        }
        Ok(Variable::empty())
    }
}

fn is_truthy(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("true")
}

/// Iteration filter grammar: comma-separated tokens out of `odd`, `even`,
/// `unique`, single 1-based indices and `m-n` / `m-` ranges. Positional
/// tokens select (union); `unique` additionally drops repeated values.
pub(crate) fn apply_filter(
    items: Vec<Variable>,
    filter: Option<&str>,
) -> Result<Vec<Variable>, ExecError> {
    let Some(filter) = filter else {
        return Ok(items);
    };
    let filter = filter.trim();
    if filter.is_empty() {
        return Ok(items);
    }

    let mut unique = false;
    let mut positional = false;
    let mut selected = vec![false; items.len()];

    for token in filter.split(',') {
        let token = token.trim();
        match token {
            "" => continue,
            "unique" => unique = true,
            "odd" => {
                positional = true;
                for index in (0..items.len()).step_by(2) {
                    selected[index] = true;
                }
            }
            "even" => {
                positional = true;
                for index in (1..items.len()).step_by(2) {
                    selected[index] = true;
                }
            }
            _ => {
                positional = true;
                let (from, to) = parse_range(token)?;
                for index in from..=to.min(items.len()) {
                    if index >= 1 && index <= items.len() {
                        selected[index - 1] = true;
                    }
                }
            }
        }
    }

    let mut seen = Vec::new();
    let mut out = Vec::new();
    for (index, item) in items.into_iter().enumerate() {
        if positional && !selected[index] {
            continue;
        }
        if unique {
            let key = item.to_text();
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
        }
        out.push(item);
    }
    Ok(out)
}

fn parse_range(token: &str) -> Result<(usize, usize), ExecError> {
    let invalid = || ExecError::config(format!("invalid loop filter token \"{}\"", token));
    match token.split_once('-') {
        Some((from, to)) => {
            let from = from.trim().parse::<usize>().map_err(|_| invalid())?;
            let to = if to.trim().is_empty() {
                usize::MAX
            } else {
                to.trim().parse::<usize>().map_err(|_| invalid())?
            };
            if from == 0 || to < from {
                return Err(invalid());
            }
            Ok((from, to))
        }
        None => {
            let single = token.trim().parse::<usize>().map_err(|_| invalid())?;
            if single == 0 {
                return Err(invalid());
            }
            Ok((single, single))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(values: &[&str]) -> Vec<Variable> {
        values.iter().map(|value| Variable::text(*value)).collect()
    }

    #[test]
    fn filter_selects_odd_even_and_ranges() {
        let items = texts(&["a", "b", "c", "d", "e"]);
        let odd = apply_filter(items.clone(), Some("odd")).expect("odd");
        assert_eq!(odd, texts(&["a", "c", "e"]));

        let even = apply_filter(items.clone(), Some("even")).expect("even");
        assert_eq!(even, texts(&["b", "d"]));

        let range = apply_filter(items.clone(), Some("2-4")).expect("range");
        assert_eq!(range, texts(&["b", "c", "d"]));

        let open = apply_filter(items.clone(), Some("4-")).expect("open range");
        assert_eq!(open, texts(&["d", "e"]));

        let union = apply_filter(items, Some("1,5")).expect("union");
        assert_eq!(union, texts(&["a", "e"]));
    }

    #[test]
    fn filter_unique_drops_repeated_values() {
        let items = texts(&["x", "y", "x", "z", "y"]);
        let unique = apply_filter(items.clone(), Some("unique")).expect("unique");
        assert_eq!(unique, texts(&["x", "y", "z"]));

        // unique combined with a positional selection
        let combined = apply_filter(items, Some("1-4,unique")).expect("combined");
        assert_eq!(combined, texts(&["x", "y", "z"]));
    }

    #[test]
    fn filter_rejects_malformed_tokens() {
        assert!(apply_filter(texts(&["a"]), Some("0")).is_err());
        assert!(apply_filter(texts(&["a"]), Some("5-2")).is_err());
        assert!(apply_filter(texts(&["a"]), Some("first")).is_err());
    }

    #[test]
    fn blank_filter_keeps_everything() {
        let items = texts(&["a", "b"]);
        assert_eq!(apply_filter(items.clone(), None).expect("none"), items);
        assert_eq!(apply_filter(items.clone(), Some("  ")).expect("blank"), items);
    }
}
