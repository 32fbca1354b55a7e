//! Evaluation failure reasons.

use thiserror::Error;

/// Why a script failed to evaluate.
///
/// The consensus surface only reports pass/fail; the reason is kept for
/// logging and for the detailed verification APIs.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum ScriptError {
    #[error("script evaluated without error but finished with a false or empty top stack element")]
    EvalFalse,
    #[error("OP_RETURN was encountered")]
    OpReturn,
    #[error("script is larger than the maximum script size")]
    ScriptSize,
    #[error("push value size limit exceeded")]
    PushSize,
    #[error("operation limit exceeded")]
    OpCount,
    #[error("stack size limit exceeded")]
    StackSize,
    #[error("signature count negative or greater than public key count")]
    SigCount,
    #[error("public key count negative or limit exceeded")]
    PubkeyCount,
    #[error("script failed an OP_VERIFY operation")]
    Verify,
    #[error("script failed an OP_EQUALVERIFY operation")]
    EqualVerify,
    #[error("script failed an OP_CHECKSIGVERIFY operation")]
    CheckSigVerify,
    #[error("script failed an OP_CHECKMULTISIGVERIFY operation")]
    CheckMultiSigVerify,
    #[error("script failed an OP_NUMEQUALVERIFY operation")]
    NumEqualVerify,
    #[error("opcode missing or not understood")]
    BadOpcode,
    #[error("attempted to use a disabled opcode")]
    DisabledOpcode,
    #[error("attempted to execute unparseable script data")]
    RawData,
    #[error("operation not valid with the current stack size")]
    InvalidStackOperation,
    #[error("operation not valid with the current altstack size")]
    InvalidAltstackOperation,
    #[error("invalid OP_IF construction")]
    UnbalancedConditional,
    #[error("script number of {size} bytes exceeds the {max} byte operand limit")]
    NumberOverflow { size: usize, max: usize },
    #[error("negative locktime")]
    NegativeLockTime,
    #[error("locktime requirement not satisfied")]
    UnsatisfiedLockTime,
    #[error("non-canonical DER signature")]
    SigDer,
    #[error("only push operators allowed in signatures")]
    SigPushOnly,
    #[error("script could not be parsed")]
    MalformedScript,
    #[error("input index out of range")]
    InputIndex,
}
