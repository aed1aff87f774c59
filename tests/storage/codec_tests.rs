// ==============================================
// VARIABLE-BYTE CODEC TESTS (integration)
// ==============================================

use crate::assert_ok;
use crate::common::builders::CollectionBuilder;
use arbor::common::exception::CodecError;
use arbor::storage::codec::{VariableByteInput, VariableByteOutput};
use arbor::storage::record::CollectionRecord;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, PartialEq)]
enum Value {
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    I64(i64),
    Byte(u8),
    Str(String),
}

impl Value {
    fn random(rng: &mut StdRng) -> Self {
        match rng.gen_range(0..7) {
            0 => Value::U16(rng.gen()),
            1 => Value::U32(rng.gen()),
            // skew towards small values so single-byte varints show up too
            2 => Value::U64(rng.gen::<u64>() >> rng.gen_range(0..64u32)),
            3 => Value::I32(rng.gen()),
            4 => Value::I64(rng.gen::<i64>() >> rng.gen_range(0..63u32)),
            5 => Value::Byte(rng.gen()),
            _ => {
                let len = rng.gen_range(0..24);
                Value::Str(
                    (0..len)
                        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
                        .collect(),
                )
            }
        }
    }

    fn write(&self, out: &mut VariableByteOutput) {
        match self {
            Value::U16(v) => out.write_u16(*v),
            Value::U32(v) => out.write_u32(*v),
            Value::U64(v) => out.write_u64(*v),
            Value::I32(v) => out.write_i32(*v),
            Value::I64(v) => out.write_i64(*v),
            Value::Byte(v) => out.write_byte(*v),
            Value::Str(v) => out.write_string(v),
        }
    }

    /// Reads a value of the same kind as `self`.
    fn read_like(&self, input: &mut VariableByteInput) -> Result<Value, CodecError> {
        Ok(match self {
            Value::U16(_) => Value::U16(input.read_u16()?),
            Value::U32(_) => Value::U32(input.read_u32()?),
            Value::U64(_) => Value::U64(input.read_u64()?),
            Value::I32(_) => Value::I32(input.read_i32()?),
            Value::I64(_) => Value::I64(input.read_i64()?),
            Value::Byte(_) => Value::Byte(input.read_byte()?),
            Value::Str(_) => Value::Str(input.read_string()?),
        })
    }

    /// Copies the encoded value without decoding it.
    fn copy(
        &self,
        input: &mut VariableByteInput,
        out: &mut VariableByteOutput,
    ) -> Result<(), CodecError> {
        match self {
            Value::Byte(_) => input.copy_raw_to(out, 1),
            Value::Str(_) => input.copy_strings_to(out, 1),
            _ => input.copy_to(out, 1),
        }
    }
}

mod primitives {
    use super::*;

    #[test]
    fn test_known_encodings() {
        let mut out = VariableByteOutput::new();
        for value in [0u64, 127, 128, 16_384, u64::from(u32::MAX)] {
            out.write_u64(value);
        }
        out.write_string("abc");

        let expected: &[u8] = &[
            0x00, // 0
            0x7F, // 127
            0x80, 0x01, // 128
            0x80, 0x80, 0x01, // 16384
            0xFF, 0xFF, 0xFF, 0xFF, 0x0F, // 2^32 - 1
            0x03, b'a', b'b', b'c',
        ];
        assert_eq!(out.as_slice(), expected);

        let mut input = VariableByteInput::new(out.into_bytes());
        assert_eq!(input.read_u64().unwrap(), 0);
        assert_eq!(input.read_u64().unwrap(), 127);
        assert_eq!(input.read_u64().unwrap(), 128);
        assert_eq!(input.read_u64().unwrap(), 16_384);
        assert_eq!(input.read_u32().unwrap(), u32::MAX);
        assert_eq!(input.read_string().unwrap(), "abc");
        assert_eq!(input.read_u64(), Err(CodecError::EndOfData));
    }

    #[test]
    fn test_truncated_value_differs_from_clean_end() {
        let mut input = VariableByteInput::new(Bytes::from_static(&[0x80, 0x80]));
        assert!(matches!(input.read_u64(), Err(CodecError::Truncated { .. })));

        let mut input = VariableByteInput::new(Bytes::from_static(&[0x05, b'a', b'b']));
        assert!(matches!(
            input.read_string(),
            Err(CodecError::Truncated {
                needed: 5,
                available: 2
            })
        ));

        let mut input = VariableByteInput::new(Bytes::new());
        assert_eq!(input.read_string(), Err(CodecError::EndOfData));
    }

    #[test]
    fn test_narrow_read_rejects_wide_value() {
        let mut out = VariableByteOutput::new();
        out.write_u64(u64::from(u16::MAX) + 1);
        let mut input = VariableByteInput::from(out);
        assert_eq!(
            input.read_u16(),
            Err(CodecError::VarIntOverflow { width: 16 })
        );
        assert_eq!(input.position(), 0);
        assert_eq!(input.read_u32().unwrap(), u32::from(u16::MAX) + 1);
    }

    #[test]
    fn test_skip_moves_past_values_without_decoding() {
        let mut out = VariableByteOutput::new();
        out.write_u64(1 << 40);
        out.write_string("skipped");
        out.write_u16(9);
        let mut input = VariableByteInput::from(out);

        assert_ok!(input.skip(1));
        assert_ok!(input.skip_strings(1));
        assert_eq!(input.read_u16().unwrap(), 9);
        assert!(!input.has_remaining());
        assert_eq!(input.skip(1), Err(CodecError::EndOfData));
    }
}

mod randomized {
    use super::*;

    #[test]
    fn test_mixed_values_round_trip_and_copy() {
        let mut rng = StdRng::seed_from_u64(0xC0DEC);
        for round in 0..200 {
            let count = rng.gen_range(1..64);
            let values: Vec<Value> = (0..count).map(|_| Value::random(&mut rng)).collect();

            let mut out = VariableByteOutput::new();
            for value in &values {
                value.write(&mut out);
            }
            let encoded = out.into_bytes();

            let mut input = VariableByteInput::new(encoded.clone());
            for value in &values {
                assert_eq!(&value.read_like(&mut input).unwrap(), value, "round {}", round);
            }
            assert!(!input.has_remaining());

            let mut source = VariableByteInput::new(encoded.clone());
            let mut copied = VariableByteOutput::new();
            for value in &values {
                value.copy(&mut source, &mut copied).unwrap();
            }
            assert_eq!(copied.as_slice(), encoded.as_ref(), "round {}", round);

            let mut reread = VariableByteInput::from(copied);
            for value in &values {
                assert_eq!(&value.read_like(&mut reread).unwrap(), value);
            }
        }
    }
}

mod records {
    use super::*;

    #[test]
    fn test_count_prefixed_children_survive_round_trip() {
        let record = CollectionBuilder::new(12)
            .named("/db/system")
            .child("config")
            .child("security")
            .entry(40, "users.xml")
            .permissions(0o700)
            .record();
        let decoded = assert_ok!(CollectionRecord::from_bytes(record.to_bytes()));
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_declared_count_longer_than_data_is_truncated() {
        let record = CollectionBuilder::new(1)
            .entry(2, "a.xml")
            .entry(3, "b.xml")
            .record();
        let bytes = record.to_bytes();
        // drop the last entry's final byte
        let cut = bytes.slice(..bytes.len() - 1);
        assert!(matches!(
            CollectionRecord::from_bytes(cut),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_copy_record_streams_several_records() {
        let first = CollectionBuilder::new(1).child("a").entry(5, "x.xml").record();
        let second = CollectionBuilder::new(2).named("/db/other").record();
        let mut out = VariableByteOutput::new();
        first.encode(&mut out);
        second.encode(&mut out);
        let stream = out.into_bytes();

        let mut input = VariableByteInput::new(stream.clone());
        let mut copy = VariableByteOutput::new();
        assert_ok!(CollectionRecord::copy_record(&mut input, &mut copy));
        assert_ok!(CollectionRecord::copy_record(&mut input, &mut copy));
        assert_eq!(copy.as_slice(), stream.as_ref());
        assert_eq!(
            CollectionRecord::copy_record(&mut input, &mut copy),
            Err(CodecError::EndOfData)
        );

        let mut reread = VariableByteInput::from(copy);
        assert_eq!(CollectionRecord::decode(&mut reread).unwrap(), first);
        assert_eq!(CollectionRecord::decode(&mut reread).unwrap(), second);
    }

    #[test]
    fn test_legacy_record_upgrades_to_counted_form() {
        let record = CollectionBuilder::new(8)
            .entry(80, "old.xml")
            .entry(81, "older.xml")
            .record();
        let mut out = VariableByteOutput::new();
        record.encode_legacy(&mut out);
        let legacy = out.into_bytes();

        // The counted decoder reads the first entry id as the entry count.
        assert!(CollectionRecord::from_bytes(legacy.clone()).is_err());

        let upgraded = assert_ok!(CollectionRecord::upgrade_legacy(legacy));
        assert_eq!(assert_ok!(CollectionRecord::from_bytes(upgraded)), record);
    }
}
