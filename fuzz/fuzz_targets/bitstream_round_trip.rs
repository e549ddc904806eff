#![no_main]

use {
    arbitrary::Arbitrary,
    libfuzzer_sys::fuzz_target,
    reliable_channel::bitstream::{BitReader, BitWriter},
};

/// One bit-stream operation, replayed identically against a [`BitWriter`] and
/// then a [`BitReader`] over its output; every variant must read back exactly
/// what it wrote.
#[derive(Debug, Arbitrary)]
enum Op {
    Bits { value: u32, bits: u8 },
    IntRange { offset: u32, min: u16, span: u16 },
    Align,
    Check(u32),
    Bytes(Vec<u8>),
}

fuzz_target!(|ops: Vec<Op>| {
    let mut writer = BitWriter::new();
    let mut expected = Vec::new();

    for op in &ops {
        match op {
            Op::Bits { value, bits } => {
                let bits = 1 + (*bits as u32 % 32);
                let value = if bits == 32 { *value } else { value & ((1 << bits) - 1) };
                writer.bits(value, bits);
                expected.push(Expect::Bits(value, bits));
            }
            Op::IntRange { offset, min, span } => {
                let min = u32::from(*min);
                let max = min + u32::from(*span);
                let value = min + (*offset % (max - min + 1));
                writer.int_range(value, min, max);
                expected.push(Expect::IntRange(value, min, max));
            }
            Op::Align => {
                writer.align();
                expected.push(Expect::Align);
            }
            Op::Check(magic) => {
                writer.check(*magic);
                expected.push(Expect::Check(*magic));
            }
            Op::Bytes(data) => {
                writer.align();
                writer.bytes(data);
                expected.push(Expect::Align);
                expected.push(Expect::Bytes(data.clone()));
            }
        }
    }
    if writer.is_overflow() {
        return;
    }

    let bytes = writer.finish();
    let mut reader = BitReader::new(&bytes);
    for exp in expected {
        match exp {
            Expect::Bits(value, bits) => assert_eq!(value, reader.bits(bits)),
            Expect::IntRange(value, min, max) => assert_eq!(value, reader.int_range(min, max)),
            Expect::Align => reader.align(),
            Expect::Check(magic) => assert_eq!(Ok(()), reader.check(magic)),
            Expect::Bytes(data) => assert_eq!(data, reader.read_bytes(data.len())),
        }
    }
    assert!(!reader.is_overflow());
});

enum Expect {
    Bits(u32, u32),
    IntRange(u32, u32, u32),
    Align,
    Check(u32),
    Bytes(Vec<u8>),
}
