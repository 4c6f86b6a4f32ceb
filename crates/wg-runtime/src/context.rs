use std::collections::HashMap;

use wg_core::{ExecError, Variable};

#[derive(Debug, Clone)]
struct Binding {
    frame: usize,
    value: Variable,
}

#[derive(Debug, Default)]
struct Frame {
    names: Vec<String>,
    loop_frame: bool,
}

/// Dynamic-scope variable store. A central table maps each name to a stack
/// of bindings (top = visible value); each frame records the names it
/// introduced or shadowed so closing the frame pops exactly those entries.
///
/// The root frame is created at construction and lives for the whole
/// session. Nested frames are managed through [`DynamicContext::scoped`],
/// which guarantees the frame is popped on every exit path.
#[derive(Debug)]
pub struct DynamicContext {
    table: HashMap<String, Vec<Binding>>,
    frames: Vec<Frame>,
}

impl Default for DynamicContext {
    fn default() -> Self {
        Self::new()
    }
}

impl DynamicContext {
    pub fn new() -> Self {
        Self {
            table: HashMap::new(),
            frames: vec![Frame::default()],
        }
    }

    /// Visible value of `name`, or `None` when unbound. A variable bound to
    /// `Variable::Empty` is still bound.
    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.table
            .get(name)
            .and_then(|stack| stack.last())
            .map(|binding| &binding.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    /// Binds `name` in the current frame: replaces when the visible binding
    /// already belongs to this frame, shadows otherwise.
    pub fn set_local(&mut self, name: &str, value: Variable) {
        let current = self.frames.len() - 1;
        let stack = self.table.entry(name.to_string()).or_default();
        match stack.last_mut() {
            Some(top) if top.frame == current => top.value = value,
            _ => {
                stack.push(Binding {
                    frame: current,
                    value,
                });
                self.frames[current].names.push(name.to_string());
            }
        }
    }

    /// Back-compat write path: overwrites an existing binding in place
    /// wherever it was declared, instead of shadowing it, unless the current
    /// frame is loop-tagged (then it behaves like [`Self::set_local`]).
    /// The two write styles interact differently inside loop frames; that
    /// distinction is load-bearing for old configurations and is kept as is.
    pub fn set_legacy(&mut self, name: &str, value: Variable) {
        let current = self.frames.len() - 1;
        if self.frames[current].loop_frame {
            self.set_local(name, value);
            return;
        }
        match self.table.get_mut(name).and_then(|stack| stack.last_mut()) {
            Some(top) => top.value = value,
            None => self.set_local(name, value),
        }
    }

    /// Removes the binding only when it was declared in the current frame;
    /// bindings owned by outer frames are left untouched.
    pub fn remove(&mut self, name: &str) -> Option<Variable> {
        let current = self.frames.len() - 1;
        let stack = self.table.get_mut(name)?;
        if stack.last()?.frame != current {
            return None;
        }
        let binding = stack.pop()?;
        if stack.is_empty() {
            self.table.remove(name);
        }
        let names = &mut self.frames[current].names;
        if let Some(position) = names.iter().rposition(|entry| entry == name) {
            names.remove(position);
        }
        Some(binding.value)
    }

    /// Mutates the visible binding in place, wherever in the frame stack it
    /// lives, without creating a new shadow.
    pub fn replace_existing(&mut self, name: &str, value: Variable) -> Result<(), ExecError> {
        match self.table.get_mut(name).and_then(|stack| stack.last_mut()) {
            Some(top) => {
                top.value = value;
                Ok(())
            }
            None => Err(ExecError::illegal_state(format!(
                "cannot replace unbound variable \"{}\"",
                name
            ))),
        }
    }

    /// Snapshot of all currently visible bindings, one entry per name.
    pub fn iter_visible(&self) -> Vec<(String, Variable)> {
        self.table
            .iter()
            .filter_map(|(name, stack)| {
                stack
                    .last()
                    .map(|binding| (name.clone(), binding.value.clone()))
            })
            .collect()
    }

    /// Runs `body` inside a fresh frame. The frame is popped before this
    /// returns, on success and on failure alike, so no binding introduced or
    /// shadowed by `body` survives — including when `body` fails with a
    /// cancellation.
    pub fn scoped<T>(
        &mut self,
        loop_frame: bool,
        body: impl FnOnce(&mut Self) -> Result<T, ExecError>,
    ) -> Result<T, ExecError> {
        self.push_frame(loop_frame);
        let result = body(self);
        self.pop_frame();
        result
    }

    pub(crate) fn push_frame(&mut self, loop_frame: bool) {
        self.frames.push(Frame {
            names: Vec::new(),
            loop_frame,
        });
    }

    pub(crate) fn pop_frame(&mut self) {
        if self.frames.len() <= 1 {
            return;
        }
        let frame = self.frames.pop().unwrap_or_default();
        for name in frame.names {
            if let Some(stack) = self.table.get_mut(&name) {
                stack.pop();
                if stack.is_empty() {
                    self.table.remove(&name);
                }
            }
        }
    }

    pub fn frame_depth(&self) -> usize {
        self.frames.len()
    }
}
