//! Spending transaction decoding for the byte-level verification API.

use bitcoin::{consensus, Transaction};

use crate::{
    script::{ParseMode, Script},
    Error,
};

/// A spending transaction decoded from wire bytes.
#[derive(Debug, Clone)]
pub struct TransactionContext {
    tx: Transaction,
}

impl TransactionContext {
    /// Decodes `tx_bytes`, rejecting input with trailing or missing bytes.
    pub fn parse(tx_bytes: &[u8]) -> Result<Self, Error> {
        let (tx, used): (Transaction, usize) =
            consensus::deserialize_partial(tx_bytes).map_err(|_| Error::ERR_TX_DESERIALIZE)?;
        if used != tx_bytes.len() {
            return Err(Error::ERR_TX_SIZE_MISMATCH);
        }
        Ok(Self { tx })
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    pub fn ensure_input_index(&self, input_index: usize) -> Result<(), Error> {
        if input_index >= self.tx.input.len() {
            Err(Error::ERR_TX_INDEX)
        } else {
            Ok(())
        }
    }

    /// The input script at `input_index`; unparseable bytes become one raw
    /// operation that fails if executed.
    pub fn input_script(&self, input_index: usize) -> Result<Script, Error> {
        self.ensure_input_index(input_index)?;
        let bytes = self.tx.input[input_index].script_sig.as_bytes();
        Script::parse(bytes, false, ParseMode::RawDataFallback).map_err(|_| Error::ERR_SCRIPT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitcoin::hex::FromHex;

    const P2PKH_SPEND: &str = "02000000013f7cebd65c27431a90bba7f796914fe8cc2ddfc3f2cbd6f7e5f2fc854534da95000000006b483045022100de1ac3bcdfb0332207c4a91f3832bd2c2915840165f876ab47c5f8996b971c3602201c6c053d750fadde599e6f5c4e1963df0f01fc0d97815e8157e3d59fe09ca30d012103699b464d1d8bc9e47d4fb1cdaa89a1c5783d68363c4dbc4b524ed3d857148617feffffff02836d3c01000000001976a914fc25d6d5c94003bf5b0c7b640a248e2c637fcfb088ac7ada8202000000001976a914fbed3d9b11183209a57999d54d59f67c019e756c88ac6acb0700";

    #[test]
    fn parses_transaction_and_input_script() {
        let bytes = Vec::from_hex(P2PKH_SPEND).unwrap();
        let ctx = TransactionContext::parse(&bytes).unwrap();
        assert_eq!(ctx.tx().input.len(), 1);
        assert!(ctx.ensure_input_index(0).is_ok());
        assert_eq!(ctx.ensure_input_index(1), Err(Error::ERR_TX_INDEX));

        let script = ctx.input_script(0).unwrap();
        assert_eq!(script.len(), 2);
        assert!(script.is_push_only());
    }

    #[test]
    fn rejects_trailing_and_truncated_bytes() {
        let mut bytes = Vec::from_hex(P2PKH_SPEND).unwrap();
        bytes.push(0x00);
        assert_eq!(
            TransactionContext::parse(&bytes).unwrap_err(),
            Error::ERR_TX_SIZE_MISMATCH
        );
        bytes.truncate(bytes.len() - 10);
        assert_eq!(
            TransactionContext::parse(&bytes).unwrap_err(),
            Error::ERR_TX_DESERIALIZE
        );
    }
}
