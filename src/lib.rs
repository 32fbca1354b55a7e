//! Pure-Rust evaluation and verification of legacy Bitcoin scripts.
//!
//! [`interpreter::verify`] runs an input script, the output script it
//! spends and, under BIP16, the embedded redeem script. The byte-level
//! [`verify`] family decodes a serialized spending transaction first.

pub mod conditional;
pub mod context;
pub mod error;
pub mod interpreter;
pub mod number;
pub mod operation;
pub mod script;
pub mod sighash;
pub mod signature;
mod tx;

pub use context::{EvaluationContext, ScriptFlags};
pub use error::ScriptError;
pub use interpreter::{evaluate, run};
pub use operation::Operation;
pub use script::{ParseMode, Script, ScriptPattern};

use thiserror::Error;

use crate::tx::TransactionContext;

/// Do not enable any verification.
pub const VERIFY_NONE: u32 = 0;
/// Evaluate P2SH (BIP16) subscripts.
pub const VERIFY_P2SH: u32 = 1 << 0;
/// Enforce strict DER (BIP66) compliance.
pub const VERIFY_DERSIG: u32 = 1 << 2;
/// Enable CHECKLOCKTIMEVERIFY (BIP65).
pub const VERIFY_CHECKLOCKTIMEVERIFY: u32 = 1 << 9;
/// Enable CHECKSEQUENCEVERIFY (BIP112).
pub const VERIFY_CHECKSEQUENCEVERIFY: u32 = 1 << 10;

/// Every rule this crate implements.
pub const VERIFY_ALL: u32 =
    VERIFY_P2SH | VERIFY_DERSIG | VERIFY_CHECKLOCKTIMEVERIFY | VERIFY_CHECKSEQUENCEVERIFY;

/// Computes flags for soft fork activation heights on the Bitcoin network.
pub fn height_to_flags(height: u32) -> u32 {
    let mut flag = VERIFY_NONE;

    if height >= 173_805 {
        flag |= VERIFY_P2SH;
    }
    if height >= 363_725 {
        flag |= VERIFY_DERSIG;
    }
    if height >= 388_381 {
        flag |= VERIFY_CHECKLOCKTIMEVERIFY;
    }
    if height >= 419_328 {
        flag |= VERIFY_CHECKSEQUENCEVERIFY;
    }

    flag
}

/// Detailed failure information returned by the diagnostic verification APIs.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ScriptFailure {
    pub error: Error,
    /// Interpreter failure reason, absent when decoding failed first.
    pub script_error: Option<ScriptError>,
}

/// Verifies input `input_index` of the serialized `spending_transaction`
/// against `spent_output`, with every supported rule enabled.
pub fn verify(
    spent_output: &[u8],
    spending_transaction: &[u8],
    input_index: usize,
) -> Result<(), Error> {
    verify_with_flags(spent_output, spending_transaction, input_index, VERIFY_ALL)
}

/// Same as [`verify`] but also reports the interpreter's [`ScriptError`].
pub fn verify_with_details(
    spent_output: &[u8],
    spending_transaction: &[u8],
    input_index: usize,
) -> Result<(), ScriptFailure> {
    perform_verification(spent_output, spending_transaction, input_index, VERIFY_ALL)
}

/// Same as [`verify`] but with explicit script verification flags.
pub fn verify_with_flags(
    spent_output: &[u8],
    spending_transaction: &[u8],
    input_index: usize,
    flags: u32,
) -> Result<(), Error> {
    perform_verification(spent_output, spending_transaction, input_index, flags)
        .map_err(|failure| failure.error)
}

/// Same as [`verify_with_flags`] but also reports the interpreter's [`ScriptError`].
pub fn verify_with_flags_detailed(
    spent_output: &[u8],
    spending_transaction: &[u8],
    input_index: usize,
    flags: u32,
) -> Result<(), ScriptFailure> {
    perform_verification(spent_output, spending_transaction, input_index, flags)
}

fn perform_verification(
    spent_output: &[u8],
    spending_transaction: &[u8],
    input_index: usize,
    flags: u32,
) -> Result<(), ScriptFailure> {
    let decode_failure = |error| ScriptFailure {
        error,
        script_error: None,
    };

    let flags = ScriptFlags::from_bits(flags).map_err(decode_failure)?;
    let tx_ctx = TransactionContext::parse(spending_transaction).map_err(decode_failure)?;
    let input_script = tx_ctx.input_script(input_index).map_err(decode_failure)?;
    let output_script = Script::parse(spent_output, false, ParseMode::RawDataFallback)
        .map_err(|_| decode_failure(Error::ERR_SCRIPT))?;

    interpreter::verify_detailed(&input_script, &output_script, tx_ctx.tx(), input_index, flags)
        .map_err(|script_error| {
            tracing::debug!(input_index, %script_error, "spend rejected");
            ScriptFailure {
                error: Error::ERR_SCRIPT,
                script_error: Some(script_error),
            }
        })
}

/// Errors returned by the byte-level verifier.
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// The scripts were evaluated and rejected the spend.
    #[error("script verification failed")]
    ERR_SCRIPT,
    #[error("an invalid index for txTo")]
    ERR_TX_INDEX,
    #[error("txToLen did not match with the size of txTo")]
    ERR_TX_SIZE_MISMATCH,
    #[error("an error deserializing txTo")]
    ERR_TX_DESERIALIZE,
    #[error("script verification flags are invalid")]
    ERR_INVALID_FLAGS,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::{
        absolute::LockTime,
        blockdata::script::{Builder, PushBytesBuf, ScriptBuf},
        consensus,
        hex::FromHex,
        opcodes::all,
        transaction::Version,
        Amount, OutPoint, Sequence, Transaction, TxIn, TxOut, Witness,
    };

    const P2PKH_SPENT: &str = "76a9144bfbaf6afb76cc5771bc6404810d1cc041a6933988ac";
    const P2PKH_SPEND: &str = "02000000013f7cebd65c27431a90bba7f796914fe8cc2ddfc3f2cbd6f7e5f2fc854534da95000000006b483045022100de1ac3bcdfb0332207c4a91f3832bd2c2915840165f876ab47c5f8996b971c3602201c6c053d750fadde599e6f5c4e1963df0f01fc0d97815e8157e3d59fe09ca30d012103699b464d1d8bc9e47d4fb1cdaa89a1c5783d68363c4dbc4b524ed3d857148617feffffff02836d3c01000000001976a914fc25d6d5c94003bf5b0c7b640a248e2c637fcfb088ac7ada8202000000001976a914fbed3d9b11183209a57999d54d59f67c019e756c88ac6acb0700";

    fn push_data_script(data: &[u8]) -> ScriptBuf {
        Builder::new()
            .push_slice(PushBytesBuf::try_from(data.to_vec()).unwrap())
            .into_script()
    }

    fn single_input_tx(script_sig: ScriptBuf) -> Transaction {
        Transaction {
            version: Version(2),
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::default(),
                script_sig,
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(0),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    #[test]
    fn height_flag_schedule_matches_bitcoin_core() {
        assert_eq!(height_to_flags(0), VERIFY_NONE);
        assert_eq!(height_to_flags(173_804), VERIFY_NONE);
        assert_eq!(height_to_flags(173_805), VERIFY_P2SH);
        assert!(height_to_flags(363_725) & VERIFY_DERSIG != 0);
        assert!(height_to_flags(388_381) & VERIFY_CHECKLOCKTIMEVERIFY != 0);
        assert_eq!(height_to_flags(419_328), VERIFY_ALL);
        assert_eq!(height_to_flags(u32::MAX), VERIFY_ALL);
    }

    #[test]
    fn verify_legacy_p2pkh() {
        let spent = Vec::from_hex(P2PKH_SPENT).unwrap();
        let spending = Vec::from_hex(P2PKH_SPEND).unwrap();

        verify(&spent, &spending, 0).expect("valid spend");
    }

    #[test]
    fn legacy_p2pkh_wrong_key_hash_fails() {
        let spent = Vec::from_hex("76a9144bfbaf6afb76cc5771bc6404810d1cc041a6933a88ac").unwrap();
        let spending = Vec::from_hex(P2PKH_SPEND).unwrap();

        let failure = verify_with_details(&spent, &spending, 0).unwrap_err();
        assert_eq!(failure.error, Error::ERR_SCRIPT);
        assert_eq!(failure.script_error, Some(ScriptError::EqualVerify));
    }

    #[test]
    fn decoding_failures_have_no_script_error() {
        let spent = Vec::from_hex(P2PKH_SPENT).unwrap();
        let spending = Vec::from_hex(P2PKH_SPEND).unwrap();

        let failure = verify_with_details(&spent, &spending, 1).unwrap_err();
        assert_eq!(failure.error, Error::ERR_TX_INDEX);
        assert_eq!(failure.script_error, None);

        assert_eq!(
            verify(&spent, &spending[..spending.len() - 1], 0),
            Err(Error::ERR_TX_DESERIALIZE)
        );
        assert_eq!(
            verify_with_flags(&spent, &spending, 0, 1 << 11),
            Err(Error::ERR_INVALID_FLAGS)
        );
    }

    #[test]
    fn verify_simple_p2sh_redeem_script() {
        let redeem_script = Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script();
        let tx = single_input_tx(push_data_script(redeem_script.as_bytes()));

        let spent_script = ScriptBuf::new_p2sh(&redeem_script.script_hash());
        let tx_bytes = consensus::serialize(&tx);
        verify_with_flags(spent_script.as_bytes(), &tx_bytes, 0, VERIFY_P2SH)
            .expect("p2sh redeem should validate");
    }

    #[test]
    fn p2sh_redeem_script_runs_only_with_flag() {
        let redeem_script = Builder::new().push_opcode(all::OP_PUSHBYTES_0).into_script();
        let tx = single_input_tx(push_data_script(redeem_script.as_bytes()));

        let spent_script = ScriptBuf::new_p2sh(&redeem_script.script_hash());
        let tx_bytes = consensus::serialize(&tx);
        let failure =
            verify_with_flags_detailed(spent_script.as_bytes(), &tx_bytes, 0, VERIFY_P2SH)
                .unwrap_err();
        assert_eq!(failure.script_error, Some(ScriptError::EvalFalse));
        verify_with_flags(spent_script.as_bytes(), &tx_bytes, 0, VERIFY_NONE)
            .expect("hash match alone satisfies the output without BIP16");
    }

    #[test]
    fn unparseable_output_script_fails_when_run() {
        let tx = single_input_tx(Builder::new().push_opcode(all::OP_PUSHNUM_1).into_script());
        let tx_bytes = consensus::serialize(&tx);

        let failure = verify_with_flags_detailed(&[0x4c], &tx_bytes, 0, VERIFY_NONE).unwrap_err();
        assert_eq!(failure.script_error, Some(ScriptError::RawData));
    }
}
