//! Per-evaluation machine state.

use crate::{
    conditional::ConditionalStack,
    error::ScriptError,
    number::{self, MAX_NUM_SIZE},
    Error, VERIFY_CHECKLOCKTIMEVERIFY, VERIFY_CHECKSEQUENCEVERIFY, VERIFY_DERSIG, VERIFY_NONE,
    VERIFY_P2SH,
};

/// Combined main and alternate stack depth limit.
pub const MAX_STACK_SIZE: usize = 1000;
/// Counted operations allowed per script, including multisig key counts.
pub const MAX_OPS_PER_SCRIPT: usize = 201;

pub(crate) const SUPPORTED_FLAGS: u32 = crate::VERIFY_ALL;

/// Wrapper for script verification flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScriptFlags(u32);

impl ScriptFlags {
    pub fn from_bits(bits: u32) -> Result<Self, Error> {
        if bits & !SUPPORTED_FLAGS != 0 {
            return Err(Error::ERR_INVALID_FLAGS);
        }
        Ok(Self(bits))
    }

    pub fn none() -> Self {
        Self(VERIFY_NONE)
    }

    pub fn all() -> Self {
        Self(SUPPORTED_FLAGS)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    /// BIP16 redeem script evaluation.
    pub fn p2sh(self) -> bool {
        self.0 & VERIFY_P2SH != 0
    }

    /// BIP66 strict DER signatures.
    pub fn strict_der(self) -> bool {
        self.0 & VERIFY_DERSIG != 0
    }

    /// BIP65.
    pub fn checklocktimeverify(self) -> bool {
        self.0 & VERIFY_CHECKLOCKTIMEVERIFY != 0
    }

    /// BIP112.
    pub fn checksequenceverify(self) -> bool {
        self.0 & VERIFY_CHECKSEQUENCEVERIFY != 0
    }
}

/// Mutable state for one script run.
///
/// A context is never reused across runs. Only the main stack is carried
/// forward, via [`EvaluationContext::with_stack`].
#[derive(Debug, Clone)]
pub struct EvaluationContext {
    stack: Vec<Vec<u8>>,
    alternate: Vec<Vec<u8>>,
    conditions: ConditionalStack,
    operation_count: usize,
    jump: usize,
    flags: ScriptFlags,
}

impl EvaluationContext {
    pub fn new(flags: ScriptFlags) -> Self {
        Self::with_stack(flags, Vec::new())
    }

    /// Seeds the main stack, top last.
    pub fn with_stack(flags: ScriptFlags, stack: Vec<Vec<u8>>) -> Self {
        Self {
            stack,
            alternate: Vec::new(),
            conditions: ConditionalStack::new(),
            operation_count: 0,
            jump: 0,
            flags,
        }
    }

    pub fn flags(&self) -> ScriptFlags {
        self.flags
    }

    pub fn stack(&self) -> &[Vec<u8>] {
        &self.stack
    }

    pub fn into_stack(self) -> Vec<Vec<u8>> {
        self.stack
    }

    pub fn alternate(&self) -> &[Vec<u8>] {
        &self.alternate
    }

    pub fn conditions(&self) -> &ConditionalStack {
        &self.conditions
    }

    pub fn conditions_mut(&mut self) -> &mut ConditionalStack {
        &mut self.conditions
    }

    /// Index of the first operation after the last executed `OP_CODESEPARATOR`.
    pub fn jump(&self) -> usize {
        self.jump
    }

    pub fn set_jump(&mut self, index: usize) {
        self.jump = index;
    }

    pub fn operation_count(&self) -> usize {
        self.operation_count
    }

    /// Charges `count` operations, failing once the per-script limit is passed.
    pub fn update_op_count(&mut self, count: usize) -> Result<(), ScriptError> {
        self.operation_count = self.operation_count.saturating_add(count);
        if self.operation_count > MAX_OPS_PER_SCRIPT {
            Err(ScriptError::OpCount)
        } else {
            Ok(())
        }
    }

    pub fn is_stack_overflow(&self) -> bool {
        self.stack.len() + self.alternate.len() > MAX_STACK_SIZE
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// True when the main stack is non-empty and its top is truthy.
    pub fn is_stack_true(&self) -> bool {
        self.stack.last().is_some_and(|top| number::cast_to_bool(top))
    }

    pub fn push(&mut self, data: Vec<u8>) {
        self.stack.push(data);
    }

    pub fn push_bool(&mut self, value: bool) {
        self.stack.push(if value { vec![1] } else { Vec::new() });
    }

    pub fn push_number(&mut self, value: i64) {
        self.stack.push(number::encode(value));
    }

    pub fn pop(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.stack.pop().ok_or(ScriptError::InvalidStackOperation)
    }

    /// Pops `count` items, topmost first.
    pub fn pop_many(&mut self, count: usize) -> Result<Vec<Vec<u8>>, ScriptError> {
        if self.stack.len() < count {
            return Err(ScriptError::InvalidStackOperation);
        }
        let split = self.stack.len() - count;
        let mut items = self.stack.split_off(split);
        items.reverse();
        Ok(items)
    }

    pub fn pop_number(&mut self) -> Result<i64, ScriptError> {
        self.pop_number_sized(MAX_NUM_SIZE)
    }

    pub fn pop_number_sized(&mut self, max_len: usize) -> Result<i64, ScriptError> {
        let bytes = self.pop()?;
        number::decode(&bytes, max_len)
    }

    pub fn pop_bool(&mut self) -> Result<bool, ScriptError> {
        Ok(number::cast_to_bool(&self.pop()?))
    }

    /// Item `depth` positions below the top, `0` being the top itself.
    pub fn item(&self, depth: usize) -> Result<&Vec<u8>, ScriptError> {
        self.stack
            .len()
            .checked_sub(depth + 1)
            .map(|index| &self.stack[index])
            .ok_or(ScriptError::InvalidStackOperation)
    }

    /// Removes and returns the item `depth` positions below the top.
    pub fn remove(&mut self, depth: usize) -> Result<Vec<u8>, ScriptError> {
        let index = self
            .stack
            .len()
            .checked_sub(depth + 1)
            .ok_or(ScriptError::InvalidStackOperation)?;
        Ok(self.stack.remove(index))
    }

    /// Swaps the items at two depths.
    pub fn swap(&mut self, left: usize, right: usize) -> Result<(), ScriptError> {
        let len = self.stack.len();
        if left >= len || right >= len {
            return Err(ScriptError::InvalidStackOperation);
        }
        self.stack.swap(len - 1 - left, len - 1 - right);
        Ok(())
    }

    /// Inserts `data` so that it ends up `depth` positions below the top.
    pub fn insert(&mut self, depth: usize, data: Vec<u8>) -> Result<(), ScriptError> {
        let index = self
            .stack
            .len()
            .checked_sub(depth)
            .ok_or(ScriptError::InvalidStackOperation)?;
        self.stack.insert(index, data);
        Ok(())
    }

    /// Reads the top item as a number without popping it.
    pub fn peek_number(&self, max_len: usize) -> Result<i64, ScriptError> {
        number::decode(self.item(0)?, max_len)
    }

    pub fn push_alternate(&mut self, data: Vec<u8>) {
        self.alternate.push(data);
    }

    pub fn pop_alternate(&mut self) -> Result<Vec<u8>, ScriptError> {
        self.alternate
            .pop()
            .ok_or(ScriptError::InvalidAltstackOperation)
    }
}
