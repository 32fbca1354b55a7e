//! Script container: an ordered list of operations.

use core::{fmt, str::FromStr};

use bitcoin::{
    consensus::{self, encode::VarInt},
    hashes::{hash160, Hash},
    opcodes::{all, Opcode},
};

use crate::{
    context::ScriptFlags,
    operation::{MnemonicError, Operation, ParseError},
    signature::is_public_key,
};

/// Largest script the interpreter will run.
pub const MAX_SCRIPT_SIZE: usize = 10_000;
/// Largest payload a null-data output may carry.
pub const MAX_NULL_DATA_SIZE: usize = 80;
/// Sigops charged to a multisig whose key count is not known.
pub const MULTISIG_DEFAULT_SIGOPS: usize = 20;

/// How [`Script::parse`] handles malformed input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Any malformed operation fails the whole parse.
    Strict,
    /// Malformed input becomes a single raw-data operation.
    RawDataFallback,
}

/// Structural template a script matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptPattern {
    NullData,
    PayMultisig,
    PayPublicKey,
    PayKeyHash,
    PayScriptHash,
    SignMultisig,
    SignPublicKey,
    SignKeyHash,
    SignScriptHash,
    NonStandard,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Script {
    operations: Vec<Operation>,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_operations(operations: Vec<Operation>) -> Self {
        Self { operations }
    }

    /// Parses wire bytes, optionally preceded by a compact-size byte count.
    ///
    /// With a prefix, exactly the declared number of bytes is read and any
    /// trailing input is ignored.
    pub fn parse(bytes: &[u8], prefix: bool, mode: ParseMode) -> Result<Self, ParseError> {
        let body = if prefix {
            let (VarInt(declared), used) = consensus::deserialize_partial::<VarInt>(bytes)
                .map_err(|_| ParseError::InvalidLengthPrefix)?;
            let rest = &bytes[used..];
            let declared = usize::try_from(declared).map_err(|_| ParseError::InvalidLengthPrefix)?;
            if declared > rest.len() {
                return Err(ParseError::MalformedPush {
                    expected: declared,
                    available: rest.len(),
                });
            }
            &rest[..declared]
        } else {
            bytes
        };

        match (Self::parse_operations(body), mode) {
            (Ok(operations), _) => Ok(Self { operations }),
            (Err(_), ParseMode::RawDataFallback) => Ok(Self {
                operations: vec![Operation::raw(body.to_vec())],
            }),
            (Err(err), ParseMode::Strict) => Err(err),
        }
    }

    fn parse_operations(mut reader: &[u8]) -> Result<Vec<Operation>, ParseError> {
        let mut operations = Vec::new();
        while !reader.is_empty() {
            operations.push(Operation::parse(&mut reader)?);
        }
        Ok(operations)
    }

    pub fn serialize(&self, prefix: bool) -> Vec<u8> {
        let body_size = self.serialized_size(false);
        let mut out = Vec::with_capacity(self.serialized_size(prefix));
        if prefix {
            out.extend_from_slice(&consensus::serialize(&VarInt(body_size as u64)));
        }
        for operation in &self.operations {
            operation.serialize_into(&mut out);
        }
        out
    }

    pub fn serialized_size(&self, prefix: bool) -> usize {
        let body: usize = self.operations.iter().map(Operation::serialized_size).sum();
        if prefix {
            body + compact_size_len(body as u64)
        } else {
            body
        }
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn is_push_only(&self) -> bool {
        self.operations.iter().all(Operation::is_push)
    }

    /// Push-only test admitting `OP_RESERVED`, used by the P2SH gate.
    pub fn is_relaxed_push_only(&self) -> bool {
        self.operations.iter().all(Operation::is_relaxed_push)
    }

    /// Operations from `index` onward.
    pub fn subscript(&self, index: usize) -> Script {
        let start = index.min(self.operations.len());
        Self::from_operations(self.operations[start..].to_vec())
    }

    pub fn strip_code_separators(&mut self) {
        self.operations
            .retain(|operation| operation.code() != all::OP_CODESEPARATOR || operation.is_raw());
    }

    /// Removes every operation equal to the push of `endorsement`.
    ///
    /// Intentional: the push is built with the size-based opcode, never a
    /// numeric one, and an empty endorsement therefore removes every `OP_0`.
    /// Signature hashes depend on this exact behaviour.
    pub fn find_and_delete(&mut self, endorsement: &[u8]) -> usize {
        let target = Operation::from_data_nominal(endorsement.to_vec());
        let before = self.operations.len();
        self.operations.retain(|operation| *operation != target);
        before - self.operations.len()
    }

    /// Applies [`find_and_delete`](Self::find_and_delete) for each endorsement.
    pub fn purge(&mut self, endorsements: &[Vec<u8>]) {
        for endorsement in endorsements {
            self.find_and_delete(endorsement);
        }
    }

    pub fn pattern(&self) -> ScriptPattern {
        if self.is_null_data_pattern() {
            ScriptPattern::NullData
        } else if self.is_pay_multisig_pattern() {
            ScriptPattern::PayMultisig
        } else if self.is_pay_public_key_pattern() {
            ScriptPattern::PayPublicKey
        } else if self.is_pay_key_hash_pattern() {
            ScriptPattern::PayKeyHash
        } else if self.is_pay_script_hash_pattern() {
            ScriptPattern::PayScriptHash
        } else if self.is_sign_multisig_pattern() {
            ScriptPattern::SignMultisig
        } else if self.is_sign_public_key_pattern() {
            ScriptPattern::SignPublicKey
        } else if self.is_sign_key_hash_pattern() {
            ScriptPattern::SignKeyHash
        } else if self.is_sign_script_hash_pattern() {
            ScriptPattern::SignScriptHash
        } else {
            ScriptPattern::NonStandard
        }
    }

    pub fn is_null_data_pattern(&self) -> bool {
        matches!(
            self.operations.as_slice(),
            [ret, data] if ret.code() == all::OP_RETURN
                && data.is_push()
                && data.data().len() <= MAX_NULL_DATA_SIZE
        )
    }

    pub fn is_pay_multisig_pattern(&self) -> bool {
        let ops = &self.operations;
        let count = ops.len();
        if count < 4 || ops[count - 1].code() != all::OP_CHECKMULTISIG {
            return false;
        }
        let (Some(m), Some(n)) = (positive_value(&ops[0]), positive_value(&ops[count - 2])) else {
            return false;
        };
        if n < m || count != n + 3 {
            return false;
        }
        ops[1..count - 2]
            .iter()
            .all(|op| op.is_push() && is_public_key(op.data()))
    }

    pub fn is_pay_public_key_pattern(&self) -> bool {
        matches!(
            self.operations.as_slice(),
            [key, check] if key.is_push()
                && is_public_key(key.data())
                && check.code() == all::OP_CHECKSIG
        )
    }

    pub fn is_pay_key_hash_pattern(&self) -> bool {
        matches!(
            self.operations.as_slice(),
            [dup, hash, push, equal, check] if dup.code() == all::OP_DUP
                && hash.code() == all::OP_HASH160
                && push.code() == all::OP_PUSHBYTES_20
                && equal.code() == all::OP_EQUALVERIFY
                && check.code() == all::OP_CHECKSIG
        )
    }

    /// `HASH160 <20 bytes> EQUAL` with the literal 20-byte push opcode.
    pub fn is_pay_script_hash_pattern(&self) -> bool {
        matches!(
            self.operations.as_slice(),
            [hash, push, equal] if hash.code() == all::OP_HASH160
                && push.code() == all::OP_PUSHBYTES_20
                && !push.is_raw()
                && equal.code() == all::OP_EQUAL
        )
    }

    pub fn is_sign_multisig_pattern(&self) -> bool {
        self.operations.len() >= 2
            && self.is_push_only()
            && self.operations[0].code() == all::OP_PUSHBYTES_0
    }

    pub fn is_sign_public_key_pattern(&self) -> bool {
        self.operations.len() == 1 && self.is_push_only()
    }

    pub fn is_sign_key_hash_pattern(&self) -> bool {
        self.operations.len() == 2
            && self.is_push_only()
            && is_public_key(self.operations[1].data())
    }

    pub fn is_sign_script_hash_pattern(&self) -> bool {
        if self.operations.len() < 2 || !self.is_push_only() {
            return false;
        }
        let redeem = match self.operations.last() {
            Some(last) if !last.data().is_empty() => last.data(),
            _ => return false,
        };
        let Ok(embedded) = Script::parse(redeem, false, ParseMode::Strict) else {
            return false;
        };
        matches!(
            embedded.pattern(),
            ScriptPattern::PayMultisig
                | ScriptPattern::PayPublicKey
                | ScriptPattern::PayKeyHash
                | ScriptPattern::PayScriptHash
                | ScriptPattern::NullData
        )
    }

    /// Signature operations, counting multisig keys exactly when `accurate`
    /// and the key count is a literal `OP_1`..`OP_16`.
    pub fn sigops(&self, accurate: bool) -> usize {
        let mut total = 0;
        let mut preceding: Option<&Operation> = None;
        for operation in &self.operations {
            match operation.code() {
                all::OP_CHECKSIG | all::OP_CHECKSIGVERIFY => total += 1,
                all::OP_CHECKMULTISIG | all::OP_CHECKMULTISIGVERIFY => {
                    total += match preceding.and_then(positive_value) {
                        Some(keys) if accurate => keys,
                        _ => MULTISIG_DEFAULT_SIGOPS,
                    };
                }
                _ => {}
            }
            preceding = Some(operation);
        }
        total
    }

    /// Sigops of the redeem script this input script reveals, or zero when
    /// `prevout` is not pay-to-script-hash.
    pub fn pay_script_hash_sigops(&self, prevout: &Script) -> usize {
        if !prevout.is_pay_script_hash_pattern() {
            return 0;
        }
        let Some(last) = self.operations.last() else {
            return 0;
        };
        match Script::parse(last.data(), false, ParseMode::Strict) {
            Ok(embedded) => embedded.sigops(true),
            Err(_) => 0,
        }
    }

    pub fn to_null_data_pattern(data: &[u8]) -> Option<Script> {
        if data.len() > MAX_NULL_DATA_SIZE {
            return None;
        }
        Some(Self::from_operations(vec![
            Operation::new(all::OP_RETURN),
            Operation::from_data_nominal(data.to_vec()),
        ]))
    }

    pub fn to_pay_public_key_pattern(point: &[u8]) -> Option<Script> {
        if !is_public_key(point) {
            return None;
        }
        Some(Self::from_operations(vec![
            Operation::from_data_nominal(point.to_vec()),
            Operation::new(all::OP_CHECKSIG),
        ]))
    }

    pub fn to_pay_key_hash_pattern(hash: &hash160::Hash) -> Script {
        Self::from_operations(vec![
            Operation::new(all::OP_DUP),
            Operation::new(all::OP_HASH160),
            Operation::from_data_nominal(hash.to_byte_array().to_vec()),
            Operation::new(all::OP_EQUALVERIFY),
            Operation::new(all::OP_CHECKSIG),
        ])
    }

    pub fn to_pay_script_hash_pattern(hash: &hash160::Hash) -> Script {
        Self::from_operations(vec![
            Operation::new(all::OP_HASH160),
            Operation::from_data_nominal(hash.to_byte_array().to_vec()),
            Operation::new(all::OP_EQUAL),
        ])
    }

    /// `m <points...> n CHECKMULTISIG`, requiring `1 <= m <= n <= 16` and
    /// valid point encodings.
    pub fn to_pay_multisig_pattern(signatures: usize, points: &[Vec<u8>]) -> Option<Script> {
        let keys = points.len();
        if signatures == 0 || signatures > keys || keys > 16 {
            return None;
        }
        if !points.iter().all(|point| is_public_key(point)) {
            return None;
        }

        let mut operations = Vec::with_capacity(keys + 3);
        operations.push(Operation::new(positive_opcode(signatures)));
        operations.extend(
            points
                .iter()
                .map(|point| Operation::from_data_nominal(point.clone())),
        );
        operations.push(Operation::new(positive_opcode(keys)));
        operations.push(Operation::new(all::OP_CHECKMULTISIG));
        Some(Self::from_operations(operations))
    }

    /// Space separated mnemonic form.
    pub fn to_mnemonic(&self, flags: ScriptFlags) -> String {
        self.operations
            .iter()
            .map(|operation| operation.to_mnemonic(flags))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl From<Vec<Operation>> for Script {
    fn from(operations: Vec<Operation>) -> Self {
        Self::from_operations(operations)
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_mnemonic(ScriptFlags::all()))
    }
}

impl FromStr for Script {
    type Err = MnemonicError;

    /// Reads whitespace separated tokens; a bracketed push may itself contain
    /// whitespace, as in `[ 0102 ]`.
    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut operations = Vec::new();
        let mut tokens = text.split_whitespace();
        while let Some(token) = tokens.next() {
            if token.starts_with('[') && !token.ends_with(']') {
                let mut joined = token.to_owned();
                for next in tokens.by_ref() {
                    joined.push_str(next);
                    if next.ends_with(']') {
                        break;
                    }
                }
                operations.push(Operation::from_mnemonic(&joined)?);
            } else {
                operations.push(Operation::from_mnemonic(token)?);
            }
        }
        Ok(Self::from_operations(operations))
    }
}

fn positive_value(operation: &Operation) -> Option<usize> {
    operation
        .is_positive()
        .then(|| usize::from(operation.code().to_u8() - all::OP_PUSHNUM_1.to_u8()) + 1)
}

fn positive_opcode(value: usize) -> Opcode {
    Opcode::from(all::OP_PUSHNUM_1.to_u8() + (value as u8) - 1)
}

fn compact_size_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}
