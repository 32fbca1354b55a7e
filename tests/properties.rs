use bitcoin::{
    absolute::LockTime, opcodes::Opcode, transaction::Version, Amount, OutPoint, ScriptBuf,
    Sequence, Transaction, TxIn, TxOut, Witness,
};
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;
use script_machine::{
    context::MAX_STACK_SIZE,
    interpreter, number, operation, EvaluationContext, Operation, ParseMode, Script, ScriptFlags,
};

fn spending_tx() -> Transaction {
    Transaction {
        version: Version(2),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::default(),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ZERO,
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: Amount::from_sat(0),
            script_pubkey: ScriptBuf::new(),
        }],
    }
}

#[test]
fn opcode_classes_are_consistent() {
    for byte in 0u8..=u8::MAX {
        let code = Opcode::from(byte);
        if operation::is_push(code) {
            assert!(operation::is_relaxed_push(code), "{byte:#04x}");
            assert!(!operation::is_counted(code), "{byte:#04x}");
        }
        if operation::is_numeric(code) {
            assert!(operation::is_push(code), "{byte:#04x}");
        }
        if operation::is_positive(code) {
            assert!(operation::is_numeric(code), "{byte:#04x}");
        }
        if operation::is_disabled(code) || operation::is_conditional(code) {
            assert!(operation::is_counted(code), "{byte:#04x}");
            assert!(!operation::is_relaxed_push(code), "{byte:#04x}");
        }
        assert_eq!(
            operation::is_counted(code),
            !operation::is_relaxed_push(code),
            "{byte:#04x}"
        );
    }
}

#[test]
fn opcode_classes_match_reference_ranges() {
    const DISABLED: [u8; 17] = [
        0x65, 0x66, 0x7e, 0x7f, 0x80, 0x81, 0x83, 0x84, 0x85, 0x86, 0x8d, 0x8e, 0x95, 0x96, 0x97,
        0x98, 0x99,
    ];

    for byte in 0u8..=u8::MAX {
        let code = Opcode::from(byte);
        assert_eq!(
            operation::is_push(code),
            matches!(byte, 0x00..=0x4f | 0x51..=0x60),
            "push {byte:#04x}"
        );
        assert_eq!(operation::is_relaxed_push(code), byte <= 0x60, "relaxed push {byte:#04x}");
        assert_eq!(operation::is_counted(code), byte >= 0x61, "counted {byte:#04x}");
        assert_eq!(
            operation::is_positive(code),
            (0x51..=0x60).contains(&byte),
            "positive {byte:#04x}"
        );
        assert_eq!(
            operation::is_numeric(code),
            matches!(byte, 0x4f | 0x51..=0x60),
            "numeric {byte:#04x}"
        );
        assert_eq!(
            operation::is_conditional(code),
            matches!(byte, 0x63 | 0x64 | 0x67 | 0x68),
            "conditional {byte:#04x}"
        );
        assert_eq!(
            operation::is_disabled(code),
            DISABLED.contains(&byte),
            "disabled {byte:#04x}"
        );
    }
}

#[derive(Debug, Clone)]
enum Step {
    Push(Vec<u8>),
    Code(u8),
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        proptest::collection::vec(any::<u8>(), 0..80).prop_map(Step::Push),
        proptest::collection::vec(any::<u8>(), 250..300).prop_map(Step::Push),
        (0x4fu8..=u8::MAX).prop_map(Step::Code),
    ]
}

#[test]
fn payload_free_opcodes_round_trip_through_mnemonics() {
    for byte in (0u8..=u8::MAX).filter(|byte| !(0x01..=0x4e).contains(byte)) {
        let op = Operation::new(Opcode::from(byte));
        for flags in [ScriptFlags::none(), ScriptFlags::all()] {
            let token = op.to_mnemonic(flags);
            assert_eq!(
                Operation::from_mnemonic(&token),
                Ok(op.clone()),
                "{byte:#04x} rendered as `{token}`"
            );
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn wire_bytes_are_preserved(bytes in proptest::collection::vec(any::<u8>(), 0..200)) {
        let script = Script::parse(&bytes, false, ParseMode::RawDataFallback)
            .expect("fallback parse never fails");
        prop_assert_eq!(script.serialize(false), bytes.clone());
        prop_assert_eq!(script.serialized_size(false), bytes.len());

        if let Ok(strict) = Script::parse(&bytes, false, ParseMode::Strict) {
            prop_assert_eq!(&strict, &script);
        } else {
            prop_assert_eq!(script.len(), 1);
            prop_assert!(script.operations()[0].is_raw());
        }
    }

    #[test]
    fn length_prefix_round_trips(bytes in proptest::collection::vec(any::<u8>(), 0..300)) {
        let script = Script::parse(&bytes, false, ParseMode::RawDataFallback)
            .expect("fallback parse never fails");
        let prefixed = script.serialize(true);
        prop_assert_eq!(prefixed.len(), script.serialized_size(true));
        let reparsed = Script::parse(&prefixed, true, ParseMode::RawDataFallback)
            .expect("prefixed parse");
        prop_assert_eq!(reparsed.serialize(false), bytes);
    }

    #[test]
    fn chooser_uses_the_literal_size_opcode(data in proptest::collection::vec(any::<u8>(), 0..=75)) {
        prop_assume!(!matches!(data.as_slice(), [0x81] | [1..=16]));
        let op = Operation::from_data(data.clone());
        prop_assert_eq!(usize::from(op.code().to_u8()), data.len());
        prop_assert_eq!(op.data(), data.as_slice());
    }

    #[test]
    fn minimal_scripts_survive_strict_parse(steps in proptest::collection::vec(step(), 0..16)) {
        let script = Script::from_operations(
            steps
                .into_iter()
                .map(|step| match step {
                    Step::Push(data) => Operation::from_data(data),
                    Step::Code(byte) => Operation::new(Opcode::from(byte)),
                })
                .collect(),
        );
        let bytes = script.serialize(false);
        let reparsed = Script::parse(&bytes, false, ParseMode::Strict)
            .expect("minimal pushes always parse");
        prop_assert_eq!(reparsed, script);
    }

    #[test]
    fn numbers_within_operand_width_round_trip(value in -0x7fff_ffffi64..=0x7fff_ffff) {
        let encoded = number::encode(value);
        prop_assert!(encoded.len() <= number::MAX_NUM_SIZE);
        prop_assert_eq!(number::decode(&encoded, number::MAX_NUM_SIZE), Ok(value));
        prop_assert_eq!(number::cast_to_bool(&encoded), value != 0);
    }

    #[test]
    fn find_and_delete_removes_every_match(
        payloads in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..4), 0..12),
        target in proptest::collection::vec(any::<u8>(), 0..4),
    ) {
        let mut script = Script::from_operations(
            payloads.into_iter().map(Operation::from_data_nominal).collect(),
        );
        let before = script.len();
        let removed = script.find_and_delete(&target);
        let needle = Operation::from_data_nominal(target);

        prop_assert_eq!(script.len() + removed, before);
        prop_assert!(script.operations().iter().all(|op| *op != needle));
    }

    #[test]
    fn evaluation_never_panics(
        stack in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..6), 0..6),
        bytes in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let script = Script::parse(&bytes, false, ParseMode::RawDataFallback)
            .expect("fallback parse never fails");
        let tx = spending_tx();
        let mut context = EvaluationContext::with_stack(ScriptFlags::all(), stack);
        let _ = interpreter::evaluate(&script, &mut context, &tx, 0);
        // No single operation grows the stacks by more than three items.
        prop_assert!(context.len() + context.alternate().len() <= MAX_STACK_SIZE + 3);
    }
}
