//! Endorsement encoding checks and ECDSA sign/verify.

#[cfg(not(feature = "external-secp"))]
use std::sync::OnceLock;

use bitcoin::{
    hashes::Hash,
    secp256k1::{self, ecdsa::Signature as EcdsaSignature, Message, PublicKey, Secp256k1, SecretKey},
    Transaction,
};

use crate::{error::ScriptError, script::Script, sighash::generate_signature_hash};

#[cfg(feature = "external-secp")]
type VerificationContext = Secp256k1<secp256k1::All>;
#[cfg(not(feature = "external-secp"))]
type VerificationContext = Secp256k1<secp256k1::VerifyOnly>;

#[cfg(feature = "external-secp")]
type SigningContext = Secp256k1<secp256k1::All>;
#[cfg(not(feature = "external-secp"))]
type SigningContext = Secp256k1<secp256k1::SignOnly>;

#[cfg(not(feature = "external-secp"))]
static SECP256K1_VERIFY: OnceLock<VerificationContext> = OnceLock::new();
#[cfg(not(feature = "external-secp"))]
static SECP256K1_SIGN: OnceLock<SigningContext> = OnceLock::new();

fn with_secp256k1_verification_ctx<R>(f: impl FnOnce(&VerificationContext) -> R) -> R {
    #[cfg(feature = "external-secp")]
    {
        f(&*bitcoin::secp256k1::global::SECP256K1)
    }
    #[cfg(not(feature = "external-secp"))]
    {
        f(SECP256K1_VERIFY.get_or_init(Secp256k1::verification_only))
    }
}

fn with_secp256k1_signing_ctx<R>(f: impl FnOnce(&SigningContext) -> R) -> R {
    #[cfg(feature = "external-secp")]
    {
        f(&*bitcoin::secp256k1::global::SECP256K1)
    }
    #[cfg(not(feature = "external-secp"))]
    {
        f(SECP256K1_SIGN.get_or_init(Secp256k1::signing_only))
    }
}

/// Compressed or uncompressed point encoding, by prefix and length only.
pub fn is_public_key(data: &[u8]) -> bool {
    match data.len() {
        33 => matches!(data[0], 0x02 | 0x03),
        65 => data[0] == 0x04,
        _ => false,
    }
}

/// BIP66 strict DER check over a full endorsement, sighash byte included.
pub fn is_valid_signature_encoding(sig: &[u8]) -> bool {
    // 0x30 [total] 0x02 [R-len] [R] 0x02 [S-len] [S] [sighash]
    if sig.len() < 9 || sig.len() > 73 {
        return false;
    }
    if sig[0] != 0x30 {
        return false;
    }
    if usize::from(sig[1]) != sig.len() - 3 {
        return false;
    }

    let len_r = usize::from(sig[3]);
    if 5 + len_r >= sig.len() {
        return false;
    }
    let len_s = usize::from(sig[5 + len_r]);
    if len_r + len_s + 7 != sig.len() {
        return false;
    }

    if sig[2] != 0x02 || len_r == 0 {
        return false;
    }
    if sig[4] & 0x80 != 0 {
        return false;
    }
    if len_r > 1 && sig[4] == 0x00 && sig[5] & 0x80 == 0 {
        return false;
    }

    if sig[len_r + 4] != 0x02 || len_s == 0 {
        return false;
    }
    if sig[len_r + 6] & 0x80 != 0 {
        return false;
    }
    if len_s > 1 && sig[len_r + 6] == 0x00 && sig[len_r + 7] & 0x80 == 0 {
        return false;
    }
    true
}

/// Splits an endorsement into its laxly parsed signature and sighash type.
pub fn parse_endorsement(endorsement: &[u8]) -> Option<(EcdsaSignature, u32)> {
    let (&sighash_type, der) = endorsement.split_last()?;
    let signature = EcdsaSignature::from_der_lax(der).ok()?;
    Some((signature, u32::from(sighash_type)))
}

/// Checks `endorsement` by `public_key` over `script_code`.
///
/// An endorsement that is empty or fails to parse, or an unparseable key,
/// is a failed check rather than an error. With `strict`, a non-DER
/// endorsement fails the script.
pub fn check_signature(
    endorsement: &[u8],
    public_key: &[u8],
    script_code: &Script,
    tx: &Transaction,
    input_index: usize,
    strict: bool,
) -> Result<bool, ScriptError> {
    if endorsement.is_empty() {
        return Ok(false);
    }
    if strict && !is_valid_signature_encoding(endorsement) {
        return Err(ScriptError::SigDer);
    }

    let Some((mut signature, sighash_type)) = parse_endorsement(endorsement) else {
        return Ok(false);
    };
    let Ok(public_key) = PublicKey::from_slice(public_key) else {
        return Ok(false);
    };
    signature.normalize_s();

    let sighash = generate_signature_hash(tx, input_index, script_code, sighash_type);
    let message = Message::from_digest(sighash.to_byte_array());
    Ok(with_secp256k1_verification_ctx(|secp| {
        secp.verify_ecdsa(&message, &signature, &public_key).is_ok()
    }))
}

/// Signs `script_code` for `input_index` and appends the sighash byte.
pub fn create_endorsement(
    secret: &SecretKey,
    script_code: &Script,
    tx: &Transaction,
    input_index: usize,
    sighash_type: u8,
) -> Vec<u8> {
    let sighash = generate_signature_hash(tx, input_index, script_code, u32::from(sighash_type));
    let message = Message::from_digest(sighash.to_byte_array());
    let signature = with_secp256k1_signing_ctx(|secp| secp.sign_ecdsa(&message, secret));
    let mut endorsement = signature.serialize_der().to_vec();
    endorsement.push(sighash_type);
    endorsement
}
