//! Branch tracking for `OP_IF` / `OP_NOTIF` / `OP_ELSE` / `OP_ENDIF`.

/// One entry per open conditional; execution is live only while every entry
/// is `true`.
///
/// The stack never fails on its own: callers check [`closed`](Self::closed)
/// before [`else_`](Self::else_) or [`close`](Self::close) and treat a
/// violation as a script failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalStack {
    stack: Vec<bool>,
    /// Position of the outermost `false` entry, if any.
    first_false: Option<usize>,
}

impl ConditionalStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, value: bool) {
        if !value && self.first_false.is_none() {
            self.first_false = Some(self.stack.len());
        }
        self.stack.push(value);
    }

    /// Flips the innermost branch.
    pub fn else_(&mut self) {
        let Some(top) = self.stack.last_mut() else {
            return;
        };
        *top = !*top;
        let index = self.stack.len() - 1;
        match self.first_false {
            Some(first) if first == index => self.first_false = None,
            None => self.first_false = Some(index),
            Some(_) => {}
        }
    }

    pub fn close(&mut self) {
        self.stack.pop();
        if self.first_false == Some(self.stack.len()) {
            self.first_false = None;
        }
    }

    pub fn closed(&self) -> bool {
        self.stack.is_empty()
    }

    /// True when no open branch is dead.
    pub fn succeeded(&self) -> bool {
        self.first_false.is_none()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}
