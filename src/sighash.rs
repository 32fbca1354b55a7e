//! Legacy signature hashing.

use bitcoin::{
    consensus,
    hashes::{sha256d, Hash},
    Amount, ScriptBuf, Sequence, Transaction, Witness,
};

use crate::script::Script;

pub const SIGHASH_ALL: u32 = 0x01;
pub const SIGHASH_NONE: u32 = 0x02;
pub const SIGHASH_SINGLE: u32 = 0x03;
pub const SIGHASH_ANYONE_CAN_PAY: u32 = 0x80;
/// Bits of the sighash type that select the output mode.
pub const SIGHASH_MASK: u32 = 0x1f;

/// The little-endian integer one, returned for indexes with nothing to sign.
///
/// Intentional: signing this value instead of failing is a historical bug
/// that consensus preserves.
pub fn one_hash() -> sha256d::Hash {
    let mut bytes = [0u8; 32];
    bytes[0] = 1;
    sha256d::Hash::from_byte_array(bytes)
}

/// Digest an endorsement with `sighash_type` commits to.
///
/// `script_code` is placed in the signed input with its code separators
/// removed. Out of range `input_index`, or `SIGHASH_SINGLE` without a
/// matching output, yields [`one_hash`].
pub fn generate_signature_hash(
    tx: &Transaction,
    input_index: usize,
    script_code: &Script,
    sighash_type: u32,
) -> sha256d::Hash {
    if input_index >= tx.input.len() {
        return one_hash();
    }

    let mut script_code = script_code.clone();
    script_code.strip_code_separators();

    let mut tx_tmp = tx.clone();
    for txin in &mut tx_tmp.input {
        txin.script_sig = ScriptBuf::new();
        txin.witness = Witness::new();
    }
    tx_tmp.input[input_index].script_sig = ScriptBuf::from_bytes(script_code.serialize(false));

    match sighash_type & SIGHASH_MASK {
        SIGHASH_NONE => {
            tx_tmp.output.clear();
            zero_other_sequences(&mut tx_tmp, input_index);
        }
        SIGHASH_SINGLE => {
            if input_index >= tx_tmp.output.len() {
                return one_hash();
            }
            tx_tmp.output.truncate(input_index + 1);
            for txout in tx_tmp.output.iter_mut().take(input_index) {
                txout.value = Amount::from_sat(u64::MAX);
                txout.script_pubkey = ScriptBuf::new();
            }
            zero_other_sequences(&mut tx_tmp, input_index);
        }
        _ => {}
    }

    if sighash_type & SIGHASH_ANYONE_CAN_PAY != 0 {
        let signed = tx_tmp.input.swap_remove(input_index);
        tx_tmp.input = vec![signed];
    }

    let mut encoded = consensus::serialize(&tx_tmp);
    encoded.extend_from_slice(&sighash_type.to_le_bytes());
    sha256d::Hash::hash(&encoded)
}

fn zero_other_sequences(tx: &mut Transaction, input_index: usize) {
    for (index, txin) in tx.input.iter_mut().enumerate() {
        if index != input_index {
            txin.sequence = Sequence::ZERO;
        }
    }
}
