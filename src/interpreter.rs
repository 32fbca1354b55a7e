//! Script evaluation and the input/output/redeem verification protocol.

use bitcoin::{
    absolute::LOCK_TIME_THRESHOLD,
    hashes::{hash160, ripemd160, sha1, sha256, sha256d, Hash},
    opcodes::{all, Opcode},
    Sequence, Transaction, TxIn,
};

use crate::{
    context::{EvaluationContext, ScriptFlags},
    error::ScriptError,
    number::{self, MAX_LOCKTIME_NUM_SIZE},
    operation::{self, Operation},
    script::{ParseMode, Script, MAX_SCRIPT_SIZE},
    signature,
};

/// Public keys a single multisig operation may reference.
pub const MAX_PUBKEYS_PER_MULTISIG: usize = 20;

const SEQUENCE_LOCKTIME_DISABLE_FLAG: u32 = 1 << 31;
const SEQUENCE_LOCKTIME_TYPE_FLAG: u32 = 1 << 22;
const SEQUENCE_LOCKTIME_MASK: u32 = 0x0000_ffff;

/// Runs `script` against `context`, reporting only pass or fail.
pub fn evaluate(
    script: &Script,
    context: &mut EvaluationContext,
    tx: &Transaction,
    input_index: usize,
) -> bool {
    match run(script, context, tx, input_index) {
        Ok(()) => true,
        Err(error) => {
            tracing::trace!(input_index, %error, "script evaluation failed");
            false
        }
    }
}

/// Runs `script` against `context`, reporting why it failed.
pub fn run(
    script: &Script,
    context: &mut EvaluationContext,
    tx: &Transaction,
    input_index: usize,
) -> Result<(), ScriptError> {
    Interpreter {
        script,
        context,
        tx,
        input_index,
    }
    .run()
}

/// Verifies that `input_script` satisfies `output_script` for the input at
/// `input_index` of `tx`.
pub fn verify(
    input_script: &Script,
    output_script: &Script,
    tx: &Transaction,
    input_index: usize,
    flags: ScriptFlags,
) -> bool {
    verify_detailed(input_script, output_script, tx, input_index, flags).is_ok()
}

/// [`verify`], reporting the failure reason.
pub fn verify_detailed(
    input_script: &Script,
    output_script: &Script,
    tx: &Transaction,
    input_index: usize,
    flags: ScriptFlags,
) -> Result<(), ScriptError> {
    if input_index >= tx.input.len() {
        tracing::debug!(input_index, inputs = tx.input.len(), "input index out of range");
        return Err(ScriptError::InputIndex);
    }

    let mut input_context = EvaluationContext::new(flags);
    run(input_script, &mut input_context, tx, input_index).map_err(|error| {
        tracing::debug!(input_index, %error, "input script failed");
        error
    })?;

    let mut output_context = EvaluationContext::with_stack(flags, input_context.stack().to_vec());
    run(output_script, &mut output_context, tx, input_index).map_err(|error| {
        tracing::debug!(input_index, %error, "output script failed");
        error
    })?;
    if !output_context.is_stack_true() {
        tracing::debug!(input_index, "output script left a false stack");
        return Err(ScriptError::EvalFalse);
    }

    if !flags.p2sh() || !output_script.is_pay_script_hash_pattern() {
        return Ok(());
    }

    if !input_script.is_relaxed_push_only() {
        tracing::debug!(input_index, "pay-to-script-hash input is not push-only");
        return Err(ScriptError::SigPushOnly);
    }

    let mut stack = input_context.into_stack();
    let redeem_bytes = stack.pop().ok_or(ScriptError::InvalidStackOperation)?;
    let redeem = Script::parse(&redeem_bytes, false, ParseMode::RawDataFallback)
        .map_err(|_| ScriptError::MalformedScript)?;

    let mut redeem_context = EvaluationContext::with_stack(flags, stack);
    run(&redeem, &mut redeem_context, tx, input_index).map_err(|error| {
        tracing::debug!(input_index, %error, "redeem script failed");
        error
    })?;
    if !redeem_context.is_stack_true() {
        tracing::debug!(input_index, "redeem script left a false stack");
        return Err(ScriptError::EvalFalse);
    }

    Ok(())
}

struct Interpreter<'a> {
    script: &'a Script,
    context: &'a mut EvaluationContext,
    tx: &'a Transaction,
    input_index: usize,
}

impl Interpreter<'_> {
    fn run(&mut self) -> Result<(), ScriptError> {
        let script = self.script;
        if script.serialized_size(false) > MAX_SCRIPT_SIZE {
            return Err(ScriptError::ScriptSize);
        }

        for (index, operation) in script.operations().iter().enumerate() {
            self.step(index, operation).map_err(|error| {
                tracing::trace!(index, operation = %operation, %error, "operation failed");
                error
            })?;
        }

        if !self.context.conditions().closed() {
            return Err(ScriptError::UnbalancedConditional);
        }
        Ok(())
    }

    fn step(&mut self, index: usize, operation: &Operation) -> Result<(), ScriptError> {
        if operation.is_oversized() {
            return Err(ScriptError::PushSize);
        }
        if operation.is_counted() {
            self.context.update_op_count(1)?;
        }
        // Disabled opcodes fail even inside an unexecuted branch.
        if operation.is_disabled() {
            return Err(ScriptError::DisabledOpcode);
        }
        if !self.context.conditions().succeeded() && !operation.is_conditional() {
            return Ok(());
        }

        self.execute(index, operation)?;

        if self.context.is_stack_overflow() {
            return Err(ScriptError::StackSize);
        }
        Ok(())
    }

    fn execute(&mut self, index: usize, operation: &Operation) -> Result<(), ScriptError> {
        use all::*;

        if operation.is_raw() {
            return Err(ScriptError::RawData);
        }

        let code = operation.code();
        if code.to_u8() <= OP_PUSHDATA4.to_u8() {
            self.context.push(operation.data().to_vec());
            return Ok(());
        }
        if operation::is_numeric(code) {
            self.context.push_number(numeric_value(code));
            return Ok(());
        }

        let flags = self.context.flags();
        match code {
            OP_NOP | OP_NOP1 | OP_NOP4 | OP_NOP5 | OP_NOP6 | OP_NOP7 | OP_NOP8 | OP_NOP9
            | OP_NOP10 => {}
            OP_CLTV => {
                if flags.checklocktimeverify() {
                    self.op_check_locktime_verify()?;
                }
            }
            OP_CSV => {
                if flags.checksequenceverify() {
                    self.op_check_sequence_verify()?;
                }
            }
            OP_RESERVED | OP_VER | OP_RESERVED1 | OP_RESERVED2 => {
                return Err(ScriptError::BadOpcode)
            }

            OP_IF => self.op_if(false)?,
            OP_NOTIF => self.op_if(true)?,
            OP_ELSE => {
                if self.context.conditions().closed() {
                    return Err(ScriptError::UnbalancedConditional);
                }
                self.context.conditions_mut().else_();
            }
            OP_ENDIF => {
                if self.context.conditions().closed() {
                    return Err(ScriptError::UnbalancedConditional);
                }
                self.context.conditions_mut().close();
            }
            OP_VERIFY => self.op_verify(ScriptError::Verify)?,
            OP_RETURN => return Err(ScriptError::OpReturn),

            OP_TOALTSTACK => {
                let value = self.context.pop()?;
                self.context.push_alternate(value);
            }
            OP_FROMALTSTACK => {
                let value = self.context.pop_alternate()?;
                self.context.push(value);
            }
            OP_2DROP => {
                self.context.pop_many(2)?;
            }
            OP_2DUP => self.copy_items(&[1, 0])?,
            OP_3DUP => self.copy_items(&[2, 1, 0])?,
            OP_2OVER => self.copy_items(&[3, 2])?,
            OP_2ROT => {
                self.require_depth(6)?;
                let first = self.context.remove(5)?;
                let second = self.context.remove(4)?;
                self.context.push(first);
                self.context.push(second);
            }
            OP_2SWAP => {
                self.require_depth(4)?;
                self.context.swap(3, 1)?;
                self.context.swap(2, 0)?;
            }
            OP_IFDUP => {
                let top = self.context.item(0)?;
                if number::cast_to_bool(top) {
                    let top = top.clone();
                    self.context.push(top);
                }
            }
            OP_DEPTH => {
                let depth = self.context.len() as i64;
                self.context.push_number(depth);
            }
            OP_DROP => {
                self.context.pop()?;
            }
            OP_DUP => self.copy_items(&[0])?,
            OP_NIP => {
                self.context.remove(1)?;
            }
            OP_OVER => self.copy_items(&[1])?,
            OP_PICK | OP_ROLL => {
                let depth = self.pop_depth()?;
                let value = if code == OP_PICK {
                    self.context.item(depth)?.clone()
                } else {
                    self.context.remove(depth)?
                };
                self.context.push(value);
            }
            OP_ROT => {
                self.require_depth(3)?;
                self.context.swap(2, 1)?;
                self.context.swap(1, 0)?;
            }
            OP_SWAP => self.context.swap(1, 0)?,
            OP_TUCK => {
                self.require_depth(2)?;
                let top = self.context.item(0)?.clone();
                self.context.insert(2, top)?;
            }

            OP_SIZE => {
                let size = self.context.item(0)?.len() as i64;
                self.context.push_number(size);
            }
            OP_EQUAL | OP_EQUALVERIFY => {
                let right = self.context.pop()?;
                let left = self.context.pop()?;
                self.context.push_bool(left == right);
                if code == OP_EQUALVERIFY {
                    self.op_verify(ScriptError::EqualVerify)?;
                }
            }

            OP_1ADD | OP_1SUB | OP_NEGATE | OP_ABS | OP_NOT | OP_0NOTEQUAL => {
                let value = self.context.pop_number()?;
                let result = match code {
                    OP_1ADD => value + 1,
                    OP_1SUB => value - 1,
                    OP_NEGATE => -value,
                    OP_ABS => value.abs(),
                    OP_NOT => i64::from(value == 0),
                    _ => i64::from(value != 0),
                };
                self.context.push_number(result);
            }
            OP_ADD | OP_SUB | OP_BOOLAND | OP_BOOLOR | OP_NUMEQUAL | OP_NUMEQUALVERIFY
            | OP_NUMNOTEQUAL | OP_LESSTHAN | OP_GREATERTHAN | OP_LESSTHANOREQUAL
            | OP_GREATERTHANOREQUAL | OP_MIN | OP_MAX => {
                let right = self.context.pop_number()?;
                let left = self.context.pop_number()?;
                let result = match code {
                    OP_ADD => left + right,
                    OP_SUB => left - right,
                    OP_BOOLAND => i64::from(left != 0 && right != 0),
                    OP_BOOLOR => i64::from(left != 0 || right != 0),
                    OP_NUMEQUAL | OP_NUMEQUALVERIFY => i64::from(left == right),
                    OP_NUMNOTEQUAL => i64::from(left != right),
                    OP_LESSTHAN => i64::from(left < right),
                    OP_GREATERTHAN => i64::from(left > right),
                    OP_LESSTHANOREQUAL => i64::from(left <= right),
                    OP_GREATERTHANOREQUAL => i64::from(left >= right),
                    OP_MIN => left.min(right),
                    _ => left.max(right),
                };
                self.context.push_number(result);
                if code == OP_NUMEQUALVERIFY {
                    self.op_verify(ScriptError::NumEqualVerify)?;
                }
            }
            OP_WITHIN => {
                let max = self.context.pop_number()?;
                let min = self.context.pop_number()?;
                let value = self.context.pop_number()?;
                self.context.push_bool(min <= value && value < max);
            }

            OP_RIPEMD160 => self.hash_top(|data| ripemd160::Hash::hash(data).to_byte_array().to_vec())?,
            OP_SHA1 => self.hash_top(|data| sha1::Hash::hash(data).to_byte_array().to_vec())?,
            OP_SHA256 => self.hash_top(|data| sha256::Hash::hash(data).to_byte_array().to_vec())?,
            OP_HASH160 => self.hash_top(|data| hash160::Hash::hash(data).to_byte_array().to_vec())?,
            OP_HASH256 => self.hash_top(|data| sha256d::Hash::hash(data).to_byte_array().to_vec())?,

            OP_CODESEPARATOR => self.context.set_jump(index + 1),
            OP_CHECKSIG => {
                let valid = self.op_check_sig()?;
                self.context.push_bool(valid);
            }
            OP_CHECKSIGVERIFY => {
                if !self.op_check_sig()? {
                    return Err(ScriptError::CheckSigVerify);
                }
            }
            OP_CHECKMULTISIG => {
                let valid = self.op_check_multisig()?;
                self.context.push_bool(valid);
            }
            OP_CHECKMULTISIGVERIFY => {
                if !self.op_check_multisig()? {
                    return Err(ScriptError::CheckMultiSigVerify);
                }
            }

            _ => return Err(ScriptError::BadOpcode),
        }

        Ok(())
    }

    fn require_depth(&self, depth: usize) -> Result<(), ScriptError> {
        if self.context.len() < depth {
            Err(ScriptError::InvalidStackOperation)
        } else {
            Ok(())
        }
    }

    /// Pushes copies of the items at `depths`, in order.
    fn copy_items(&mut self, depths: &[usize]) -> Result<(), ScriptError> {
        let copies = depths
            .iter()
            .map(|&depth| self.context.item(depth).cloned())
            .collect::<Result<Vec<_>, _>>()?;
        for copy in copies {
            self.context.push(copy);
        }
        Ok(())
    }

    fn pop_depth(&mut self) -> Result<usize, ScriptError> {
        let depth = self.context.pop_number()?;
        usize::try_from(depth)
            .ok()
            .filter(|&depth| depth < self.context.len())
            .ok_or(ScriptError::InvalidStackOperation)
    }

    fn hash_top(&mut self, hash: impl FnOnce(&[u8]) -> Vec<u8>) -> Result<(), ScriptError> {
        let data = self.context.pop()?;
        self.context.push(hash(&data));
        Ok(())
    }

    fn op_verify(&mut self, error: ScriptError) -> Result<(), ScriptError> {
        if self.context.pop_bool()? {
            Ok(())
        } else {
            Err(error)
        }
    }

    fn op_if(&mut self, negate: bool) -> Result<(), ScriptError> {
        if !self.context.conditions().succeeded() {
            self.context.conditions_mut().open(false);
            return Ok(());
        }

        let value = self
            .context
            .pop_bool()
            .map_err(|_| ScriptError::UnbalancedConditional)?;
        let conditions = self.context.conditions_mut();
        conditions.open(value);
        if negate {
            conditions.else_();
        }
        Ok(())
    }

    /// Script code for signature checks: everything after the last executed
    /// code separator, minus the endorsements being checked.
    fn script_code(&self, endorsements: &[Vec<u8>]) -> Script {
        let mut script_code = self.script.subscript(self.context.jump());
        script_code.purge(endorsements);
        script_code
    }

    fn op_check_sig(&mut self) -> Result<bool, ScriptError> {
        let public_key = self.context.pop()?;
        let endorsement = self.context.pop()?;
        let script_code = self.script_code(std::slice::from_ref(&endorsement));
        signature::check_signature(
            &endorsement,
            &public_key,
            &script_code,
            self.tx,
            self.input_index,
            self.context.flags().strict_der(),
        )
    }

    fn op_check_multisig(&mut self) -> Result<bool, ScriptError> {
        let key_count = usize::try_from(self.context.pop_number()?)
            .ok()
            .filter(|&count| count <= MAX_PUBKEYS_PER_MULTISIG)
            .ok_or(ScriptError::PubkeyCount)?;
        self.context.update_op_count(key_count)?;
        let public_keys = self.context.pop_many(key_count)?;

        let signature_count = usize::try_from(self.context.pop_number()?)
            .ok()
            .filter(|&count| count <= key_count)
            .ok_or(ScriptError::SigCount)?;
        let endorsements = self.context.pop_many(signature_count)?;

        // Intentional: one extra item is consumed and never inspected.
        self.context.pop()?;

        let script_code = self.script_code(&endorsements);
        let strict = self.context.flags().strict_der();
        let mut keys = public_keys.iter();
        for (matched, endorsement) in endorsements.iter().enumerate() {
            loop {
                if keys.len() < endorsements.len() - matched {
                    return Ok(false);
                }
                let Some(public_key) = keys.next() else {
                    return Ok(false);
                };
                if signature::check_signature(
                    endorsement,
                    public_key,
                    &script_code,
                    self.tx,
                    self.input_index,
                    strict,
                )? {
                    break;
                }
            }
        }
        Ok(true)
    }

    fn input(&self) -> Result<&TxIn, ScriptError> {
        self.tx
            .input
            .get(self.input_index)
            .ok_or(ScriptError::UnsatisfiedLockTime)
    }

    fn op_check_locktime_verify(&self) -> Result<(), ScriptError> {
        let locktime = self.context.peek_number(MAX_LOCKTIME_NUM_SIZE)?;
        let locktime = u64::try_from(locktime).map_err(|_| ScriptError::NegativeLockTime)?;

        let tx_lock = u64::from(self.tx.lock_time.to_consensus_u32());
        let threshold = u64::from(LOCK_TIME_THRESHOLD);
        if (tx_lock < threshold) != (locktime < threshold) {
            return Err(ScriptError::UnsatisfiedLockTime);
        }
        if locktime > tx_lock {
            return Err(ScriptError::UnsatisfiedLockTime);
        }
        if self.input()?.sequence == Sequence::MAX {
            return Err(ScriptError::UnsatisfiedLockTime);
        }
        Ok(())
    }

    fn op_check_sequence_verify(&self) -> Result<(), ScriptError> {
        let sequence = self.context.peek_number(MAX_LOCKTIME_NUM_SIZE)?;
        let sequence = u64::try_from(sequence).map_err(|_| ScriptError::NegativeLockTime)?;
        if sequence & u64::from(SEQUENCE_LOCKTIME_DISABLE_FLAG) != 0 {
            return Ok(());
        }

        // The version is compared as unsigned.
        if (self.tx.version.0 as u32) < 2 {
            return Err(ScriptError::UnsatisfiedLockTime);
        }
        let tx_sequence = self.input()?.sequence.to_consensus_u32();
        if tx_sequence & SEQUENCE_LOCKTIME_DISABLE_FLAG != 0 {
            return Err(ScriptError::UnsatisfiedLockTime);
        }

        let mask = SEQUENCE_LOCKTIME_TYPE_FLAG | SEQUENCE_LOCKTIME_MASK;
        let tx_masked = tx_sequence & mask;
        let script_masked = (sequence & u64::from(mask)) as u32;
        let same_type = (tx_masked < SEQUENCE_LOCKTIME_TYPE_FLAG)
            == (script_masked < SEQUENCE_LOCKTIME_TYPE_FLAG);
        if !same_type || script_masked > tx_masked {
            return Err(ScriptError::UnsatisfiedLockTime);
        }
        Ok(())
    }
}

fn numeric_value(code: Opcode) -> i64 {
    if code == all::OP_PUSHNUM_NEG1 {
        -1
    } else {
        i64::from(code.to_u8() - all::OP_RESERVED.to_u8())
    }
}
