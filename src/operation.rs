//! Single script instruction: an opcode plus its push payload.

use core::fmt;

use bitcoin::{
    hex::{DisplayHex, FromHex},
    opcodes::{all, Opcode},
};
use thiserror::Error;

use crate::context::ScriptFlags;

/// Largest payload a single push may carry during evaluation.
pub const MAX_PUSH_DATA_SIZE: usize = 520;

/// Failure to decode one instruction from its wire form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unexpected end of script")]
    UnexpectedEof,
    #[error("{width} byte push length prefix truncated")]
    TruncatedLength { width: usize },
    #[error("push declares {expected} bytes but only {available} remain")]
    MalformedPush { expected: usize, available: usize },
    #[error("payload of {size} bytes does not fit opcode {code:#04x}")]
    PayloadMismatch { code: u8, size: usize },
    #[error("invalid script length prefix")]
    InvalidLengthPrefix,
}

/// Failure to read an instruction from its mnemonic token.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MnemonicError {
    #[error("unknown token `{0}`")]
    UnknownToken(String),
    #[error("invalid hex in `{0}`")]
    InvalidHex(String),
    #[error("opcode `{0}` requires a payload")]
    MissingPayload(String),
    #[error("invalid push `{token}`: {source}")]
    InvalidPush {
        token: String,
        #[source]
        source: ParseError,
    },
}

/// One decoded instruction.
///
/// A raw operation holds bytes that failed to parse; it serializes them
/// verbatim and fails whenever it is executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    code: Opcode,
    data: Vec<u8>,
    raw: bool,
}

impl Operation {
    /// An instruction with no payload. Push opcodes that require a payload
    /// should be built with [`Operation::with_data`].
    pub fn new(code: Opcode) -> Self {
        Self {
            code,
            data: Vec::new(),
            raw: false,
        }
    }

    /// Pairs `code` with `data`, checking that the payload length is one the
    /// opcode can encode.
    pub fn with_data(code: Opcode, data: Vec<u8>) -> Result<Self, ParseError> {
        let byte = code.to_u8();
        let fits = match byte {
            0x00 => data.is_empty(),
            0x01..=0x4b => data.len() == usize::from(byte),
            0x4c => data.len() <= usize::from(u8::MAX),
            0x4d => data.len() <= usize::from(u16::MAX),
            0x4e => u32::try_from(data.len()).is_ok(),
            _ => data.is_empty(),
        };
        if !fits {
            return Err(ParseError::PayloadMismatch {
                code: byte,
                size: data.len(),
            });
        }
        Ok(Self {
            code,
            data,
            raw: false,
        })
    }

    /// Pushes `data` with the shortest encoding, using the numeric opcodes for
    /// single bytes that encode `-1` or `1..=16`.
    ///
    /// `data` must be shorter than 4 GiB, the widest length prefix; use
    /// [`Operation::with_data`] for a checked constructor.
    pub fn from_data(data: Vec<u8>) -> Self {
        let code = minimal_opcode(&data);
        if is_numeric(code) {
            return Self::new(code);
        }
        Self {
            code,
            data,
            raw: false,
        }
    }

    /// Pushes `data` with the smallest push opcode for its length, never a
    /// numeric opcode. The same 4 GiB bound as [`Operation::from_data`] applies.
    pub fn from_data_nominal(data: Vec<u8>) -> Self {
        Self {
            code: opcode_from_size(data.len()),
            data,
            raw: false,
        }
    }

    /// Wraps unparseable bytes.
    pub fn raw(bytes: Vec<u8>) -> Self {
        Self {
            code: all::OP_INVALIDOPCODE,
            data: bytes,
            raw: true,
        }
    }

    /// Reads one instruction from the front of `reader`, advancing it.
    pub fn parse(reader: &mut &[u8]) -> Result<Self, ParseError> {
        let (&byte, rest) = reader.split_first().ok_or(ParseError::UnexpectedEof)?;
        *reader = rest;

        let size = match byte {
            0x01..=0x4b => usize::from(byte),
            0x4c => read_push_length(reader, 1)?,
            0x4d => read_push_length(reader, 2)?,
            0x4e => read_push_length(reader, 4)?,
            _ => 0,
        };
        if size > reader.len() {
            return Err(ParseError::MalformedPush {
                expected: size,
                available: reader.len(),
            });
        }

        let (data, rest) = reader.split_at(size);
        *reader = rest;
        Ok(Self {
            code: Opcode::from(byte),
            data: data.to_vec(),
            raw: false,
        })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_size());
        self.serialize_into(&mut out);
        out
    }

    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        if self.raw {
            out.extend_from_slice(&self.data);
            return;
        }

        out.push(self.code.to_u8());
        // Every constructor picks a prefix width the payload length fits.
        let len = self.data.len();
        match self.code {
            all::OP_PUSHDATA1 => out.extend_from_slice(&prefix_bytes(len, 1)),
            all::OP_PUSHDATA2 => out.extend_from_slice(&prefix_bytes(len, 2)),
            all::OP_PUSHDATA4 => out.extend_from_slice(&prefix_bytes(len, 4)),
            _ => {}
        }
        out.extend_from_slice(&self.data);
    }

    pub fn serialized_size(&self) -> usize {
        if self.raw {
            return self.data.len();
        }
        let prefix = match self.code {
            all::OP_PUSHDATA1 => 1,
            all::OP_PUSHDATA2 => 2,
            all::OP_PUSHDATA4 => 4,
            _ => 0,
        };
        1 + prefix + self.data.len()
    }

    pub fn code(&self) -> Opcode {
        self.code
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn is_raw(&self) -> bool {
        self.raw
    }

    pub fn is_push(&self) -> bool {
        is_push(self.code)
    }

    pub fn is_relaxed_push(&self) -> bool {
        is_relaxed_push(self.code)
    }

    pub fn is_counted(&self) -> bool {
        is_counted(self.code)
    }

    pub fn is_positive(&self) -> bool {
        is_positive(self.code)
    }

    pub fn is_numeric(&self) -> bool {
        is_numeric(self.code)
    }

    pub fn is_disabled(&self) -> bool {
        is_disabled(self.code)
    }

    pub fn is_conditional(&self) -> bool {
        is_conditional(self.code)
    }

    pub fn is_oversized(&self) -> bool {
        self.data.len() > MAX_PUSH_DATA_SIZE
    }

    /// Mnemonic token, naming the lock-time opcodes according to `flags`.
    pub fn to_mnemonic(&self, flags: ScriptFlags) -> String {
        if self.raw {
            return format!("<{}>", self.data.as_hex());
        }
        match self.code {
            all::OP_PUSHDATA1 => format!("[1.{}]", self.data.as_hex()),
            all::OP_PUSHDATA2 => format!("[2.{}]", self.data.as_hex()),
            all::OP_PUSHDATA4 => format!("[4.{}]", self.data.as_hex()),
            code if (0x01..=0x4b).contains(&code.to_u8()) => format!("[{}]", self.data.as_hex()),
            code => opcode_mnemonic(code, flags),
        }
    }

    /// Reads a single mnemonic token.
    ///
    /// `[hex]` is a push using the smallest opcode for its length, `[1.hex]`,
    /// `[2.hex]` and `[4.hex]` force a length prefix width, `<hex>` is raw
    /// data and `0xNN` names any opcode that carries no payload.
    pub fn from_mnemonic(token: &str) -> Result<Self, MnemonicError> {
        if let Some(inner) = token.strip_prefix('[').and_then(|t| t.strip_suffix(']')) {
            return parse_push_token(token, inner);
        }
        if let Some(inner) = token.strip_prefix('<').and_then(|t| t.strip_suffix('>')) {
            let bytes = decode_hex(token, inner)?;
            return Ok(Self::raw(bytes));
        }

        let lower = token.to_ascii_lowercase();
        let code = match lower.strip_prefix("0x") {
            Some(hex) => {
                let bytes = decode_hex(token, hex)?;
                match bytes.as_slice() {
                    [byte] => Opcode::from(*byte),
                    _ => return Err(MnemonicError::InvalidHex(token.to_owned())),
                }
            }
            None => opcode_from_mnemonic(&lower)
                .ok_or_else(|| MnemonicError::UnknownToken(token.to_owned()))?,
        };

        if (0x01..=0x4e).contains(&code.to_u8()) {
            return Err(MnemonicError::MissingPayload(token.to_owned()));
        }
        Ok(Self::new(code))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_mnemonic(ScriptFlags::all()))
    }
}

fn parse_push_token(token: &str, inner: &str) -> Result<Operation, MnemonicError> {
    let (code, hex) = match inner.split_once('.') {
        Some(("1", hex)) => (Some(all::OP_PUSHDATA1), hex),
        Some(("2", hex)) => (Some(all::OP_PUSHDATA2), hex),
        Some(("4", hex)) => (Some(all::OP_PUSHDATA4), hex),
        Some(_) => return Err(MnemonicError::UnknownToken(token.to_owned())),
        None => (None, inner),
    };
    let data = decode_hex(token, hex)?;
    match code {
        Some(code) => Operation::with_data(code, data).map_err(|source| MnemonicError::InvalidPush {
            token: token.to_owned(),
            source,
        }),
        None => Ok(Operation::from_data_nominal(data)),
    }
}

fn decode_hex(token: &str, hex: &str) -> Result<Vec<u8>, MnemonicError> {
    Vec::<u8>::from_hex(hex).map_err(|_| MnemonicError::InvalidHex(token.to_owned()))
}

fn read_push_length(reader: &mut &[u8], width: usize) -> Result<usize, ParseError> {
    if reader.len() < width {
        return Err(ParseError::TruncatedLength { width });
    }
    let (prefix, rest) = reader.split_at(width);
    *reader = rest;
    let mut len = 0usize;
    for (i, &byte) in prefix.iter().enumerate() {
        len |= usize::from(byte) << (8 * i);
    }
    Ok(len)
}

/// Little-endian length prefix of `width` bytes.
fn prefix_bytes(len: usize, width: usize) -> Vec<u8> {
    debug_assert!(
        width >= core::mem::size_of::<usize>() || len >> (8 * width) == 0,
        "{len} byte payload does not fit a {width} byte length prefix"
    );
    len.to_le_bytes()[..width].to_vec()
}

/// Smallest push opcode able to carry `size` bytes.
pub fn opcode_from_size(size: usize) -> Opcode {
    match size {
        0..=0x4b => Opcode::from(size as u8),
        0x4c..=0xff => all::OP_PUSHDATA1,
        0x100..=0xffff => all::OP_PUSHDATA2,
        _ => all::OP_PUSHDATA4,
    }
}

/// Shortest opcode for pushing `data`, preferring numeric opcodes for
/// single-byte script numbers `-1` and `1..=16`.
pub fn minimal_opcode(data: &[u8]) -> Opcode {
    match data {
        [0x81] => all::OP_PUSHNUM_NEG1,
        [value @ 1..=16] => Opcode::from(all::OP_PUSHNUM_1.to_u8() + *value - 1),
        _ => opcode_from_size(data.len()),
    }
}

/// Data pushes and the small number opcodes, excluding `OP_RESERVED`.
pub fn is_push(code: Opcode) -> bool {
    code.to_u8() <= all::OP_PUSHNUM_16.to_u8() && code != all::OP_RESERVED
}

/// Like [`is_push`] but admitting `OP_RESERVED`.
///
/// Intentional: the pay-to-script-hash push-only gate has always let
/// `OP_RESERVED` through and consensus depends on it.
pub fn is_relaxed_push(code: Opcode) -> bool {
    code.to_u8() <= all::OP_PUSHNUM_16.to_u8()
}

/// Opcodes charged against the per-script operation limit.
pub fn is_counted(code: Opcode) -> bool {
    code.to_u8() >= all::OP_NOP.to_u8()
}

/// `OP_1` through `OP_16`.
pub fn is_positive(code: Opcode) -> bool {
    (all::OP_PUSHNUM_1.to_u8()..=all::OP_PUSHNUM_16.to_u8()).contains(&code.to_u8())
}

/// `OP_1NEGATE` and `OP_1` through `OP_16`.
pub fn is_numeric(code: Opcode) -> bool {
    is_positive(code) || code == all::OP_PUSHNUM_NEG1
}

pub fn is_conditional(code: Opcode) -> bool {
    matches!(code, all::OP_IF | all::OP_NOTIF | all::OP_ELSE | all::OP_ENDIF)
}

/// Opcodes that fail a script wherever they appear, executed or not.
pub fn is_disabled(code: Opcode) -> bool {
    use all::*;

    matches!(
        code,
        OP_CAT
            | OP_SUBSTR
            | OP_LEFT
            | OP_RIGHT
            | OP_INVERT
            | OP_AND
            | OP_OR
            | OP_XOR
            | OP_2MUL
            | OP_2DIV
            | OP_MUL
            | OP_DIV
            | OP_MOD
            | OP_LSHIFT
            | OP_RSHIFT
            | OP_VERIF
            | OP_VERNOTIF
    )
}

/// Mnemonic for an opcode without payload; codes with no name render as
/// `0xNN`.
pub fn opcode_mnemonic(code: Opcode, flags: ScriptFlags) -> String {
    let byte = code.to_u8();
    match byte {
        0x01..=0x4b => format!("push_{byte}"),
        0xb1 if !flags.checklocktimeverify() => "nop2".to_owned(),
        0xb2 if !flags.checksequenceverify() => "nop3".to_owned(),
        _ => match mnemonic_name(byte) {
            Some(name) => name.to_owned(),
            None => format!("0x{byte:02x}"),
        },
    }
}

fn opcode_from_mnemonic(token: &str) -> Option<Opcode> {
    match token {
        "nop2" => return Some(all::OP_CLTV),
        "nop3" => return Some(all::OP_CSV),
        _ => {}
    }
    (0u8..=u8::MAX)
        .find(|&byte| mnemonic_name(byte) == Some(token))
        .map(Opcode::from)
}

fn mnemonic_name(byte: u8) -> Option<&'static str> {
    let name = match byte {
        0x00 => "zero",
        0x4c => "pushdata1",
        0x4d => "pushdata2",
        0x4e => "pushdata4",
        0x4f => "-1",
        0x50 => "reserved",
        0x51 => "1",
        0x52 => "2",
        0x53 => "3",
        0x54 => "4",
        0x55 => "5",
        0x56 => "6",
        0x57 => "7",
        0x58 => "8",
        0x59 => "9",
        0x5a => "10",
        0x5b => "11",
        0x5c => "12",
        0x5d => "13",
        0x5e => "14",
        0x5f => "15",
        0x60 => "16",
        0x61 => "nop",
        0x62 => "ver",
        0x63 => "if",
        0x64 => "notif",
        0x65 => "verif",
        0x66 => "vernotif",
        0x67 => "else",
        0x68 => "endif",
        0x69 => "verify",
        0x6a => "return",
        0x6b => "toaltstack",
        0x6c => "fromaltstack",
        0x6d => "2drop",
        0x6e => "2dup",
        0x6f => "3dup",
        0x70 => "2over",
        0x71 => "2rot",
        0x72 => "2swap",
        0x73 => "ifdup",
        0x74 => "depth",
        0x75 => "drop",
        0x76 => "dup",
        0x77 => "nip",
        0x78 => "over",
        0x79 => "pick",
        0x7a => "roll",
        0x7b => "rot",
        0x7c => "swap",
        0x7d => "tuck",
        0x7e => "cat",
        0x7f => "substr",
        0x80 => "left",
        0x81 => "right",
        0x82 => "size",
        0x83 => "invert",
        0x84 => "and",
        0x85 => "or",
        0x86 => "xor",
        0x87 => "equal",
        0x88 => "equalverify",
        0x89 => "reserved1",
        0x8a => "reserved2",
        0x8b => "1add",
        0x8c => "1sub",
        0x8d => "2mul",
        0x8e => "2div",
        0x8f => "negate",
        0x90 => "abs",
        0x91 => "not",
        0x92 => "0notequal",
        0x93 => "add",
        0x94 => "sub",
        0x95 => "mul",
        0x96 => "div",
        0x97 => "mod",
        0x98 => "lshift",
        0x99 => "rshift",
        0x9a => "booland",
        0x9b => "boolor",
        0x9c => "numequal",
        0x9d => "numequalverify",
        0x9e => "numnotequal",
        0x9f => "lessthan",
        0xa0 => "greaterthan",
        0xa1 => "lessthanorequal",
        0xa2 => "greaterthanorequal",
        0xa3 => "min",
        0xa4 => "max",
        0xa5 => "within",
        0xa6 => "ripemd160",
        0xa7 => "sha1",
        0xa8 => "sha256",
        0xa9 => "hash160",
        0xaa => "hash256",
        0xab => "codeseparator",
        0xac => "checksig",
        0xad => "checksigverify",
        0xae => "checkmultisig",
        0xaf => "checkmultisigverify",
        0xb0 => "nop1",
        0xb1 => "checklocktimeverify",
        0xb2 => "checksequenceverify",
        0xb3 => "nop4",
        0xb4 => "nop5",
        0xb5 => "nop6",
        0xb6 => "nop7",
        0xb7 => "nop8",
        0xb8 => "nop9",
        0xb9 => "nop10",
        _ => return None,
    };
    Some(name)
}
