mod builder;
mod builtin;
mod decoder;
mod op;
mod record;

pub use builder::{BuildError, Label, PcodeBuilder};
pub use builtin::{BUILTINS, BuiltinSpec, FIRST_EVAL_GLOBAL, GlobalVar, lookup_builtin};
pub use decoder::PcodeDecoder;
pub use op::{Op, OperandKind};
pub use record::{
    CALL_ARGC_MASK, CALL_KEEP_WRITEBACK, CALL_SELF_WRITEBACK, CodeSpace, DecodeError,
    FIRST_IMPORT_UNIT, FilePos, IMMEDIATE_FALSE, IMMEDIATE_OMEGA, IMMEDIATE_TRUE, LITERAL_UNIT,
    Operand, PcodeRecord, RECORD_SIZE, SELF_UNIT, encode_all,
};

#[cfg(test)]
mod tests {
    use super::*;

    fn t(offset: i32) -> Operand {
        Operand::spec(SELF_UNIT, offset)
    }

    #[test]
    fn record_is_28_bytes() {
        let r = PcodeRecord::new(Op::Add, FilePos::new(3, 7), [t(1), t(2), t(3)]);
        assert_eq!(r.encode().len(), 28);
        assert_eq!(RECORD_SIZE, 28);
    }

    #[test]
    fn record_round_trip_keeps_position() {
        let r = PcodeRecord::new(
            Op::Call,
            FilePos::new(120, 4),
            [t(9), Operand::spec(2, 5), Operand::literal(3 | CALL_KEEP_WRITEBACK)],
        );
        let bytes = r.encode();
        let back = PcodeRecord::decode(&bytes, 0).unwrap();
        assert_eq!(back, r);
        assert_eq!(back.operands[2].offset & CALL_ARGC_MASK, 3);
    }

    #[test]
    fn decoder_rejects_partial_records() {
        let r = PcodeRecord::new(Op::Stop, FilePos::default(), [Operand::NONE; 3]);
        let mut bytes = r.encode().to_vec();
        bytes.pop();
        assert_eq!(
            PcodeDecoder::new(&bytes).err(),
            Some(DecodeError::Truncated(27))
        );
    }

    #[test]
    fn decoder_reports_unknown_opcode() {
        let mut bytes = PcodeRecord::new(Op::Stop, FilePos::default(), [Operand::NONE; 3])
            .encode()
            .to_vec();
        bytes[0] = 0xFF;
        bytes[1] = 0xFF;
        let err = PcodeDecoder::decode_all(&bytes).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownOpcode { index: 0, opcode: 0xFFFF }));
    }

    #[test]
    fn labels_encode_code_space() {
        assert_eq!(Operand::label(CodeSpace::Body, 4).offset, 4);
        assert_eq!(Operand::label(CodeSpace::Init, 0).offset, -1);
        assert_eq!(
            Operand::label(CodeSpace::Init, 6).decode_label(),
            (CodeSpace::Init, 6)
        );
    }

    #[test]
    fn forward_and_backward_jumps_are_patched() {
        let mut b = PcodeBuilder::new();
        let top = b.new_label();
        let out = b.new_label();
        b.bind(top).unwrap();
        b.emit_jump(Op::GoFalse, &[t(1)], out).unwrap();
        b.emit(Op::Add, &[t(2), t(2), t(3)]);
        b.go(top).unwrap();
        b.bind(out).unwrap();
        b.emit(Op::Stop, &[]);

        let (init, body) = b.finish().unwrap();
        assert!(init.is_empty());
        assert_eq!(body[0].operands[0], t(1));
        assert_eq!(body[0].label_target(), Some((CodeSpace::Body, 3)));
        assert_eq!(body[2].label_target(), Some((CodeSpace::Body, 0)));
    }

    #[test]
    fn init_labels_are_negative() {
        let mut b = PcodeBuilder::new();
        b.set_space(CodeSpace::Init);
        let l = b.new_label();
        b.emit(Op::Noop, &[]);
        b.bind(l).unwrap();
        b.go(l).unwrap();
        let (init, _) = b.finish().unwrap();
        assert_eq!(init[1].operands[0].offset, -2);
    }

    #[test]
    fn unbound_label_is_an_error() {
        let mut b = PcodeBuilder::new();
        let l = b.new_label();
        b.go(l).unwrap();
        assert_eq!(b.finish().err(), Some(BuildError::Unbound(0)));
    }

    #[test]
    fn encode_all_then_decode() {
        let mut b = PcodeBuilder::new();
        b.set_pos(FilePos::new(1, 1));
        b.emit(Op::Assign, &[t(0), Operand::boolean(true)]);
        b.set_pos(FilePos::new(2, 1));
        b.emit(Op::Stop, &[]);
        let (_, body) = b.finish().unwrap();
        let decoded = PcodeDecoder::decode_all(&encode_all(&body)).unwrap();
        assert_eq!(decoded, body);
        assert_eq!(decoded[1].pos.line, 2);
    }

    #[test]
    fn disassembly_names_immediates() {
        let r = PcodeRecord::new(
            Op::Assign,
            FilePos::new(5, 2),
            [t(4), Operand::omega(), Operand::NONE],
        );
        let text = r.to_string();
        assert!(text.starts_with("assign"));
        assert!(text.contains("om"));
        assert!(text.ends_with("; 5:2"));
    }
}
