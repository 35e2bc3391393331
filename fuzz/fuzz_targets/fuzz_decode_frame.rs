#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;
use pgtwixt::protocol::{decode_frame, Frame};

#[derive(Debug)]
struct ChunkedInput {
    untyped: bool,
    data: Vec<u8>,
    split_points: Vec<u8>,
}

impl<'a> Arbitrary<'a> for ChunkedInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        Ok(Self {
            untyped: u.arbitrary()?,
            data: u.arbitrary()?,
            split_points: u.arbitrary()?,
        })
    }
}

/// Decode everything in `buf`, stopping at the first error.
fn drain(buf: &mut BytesMut, untyped: bool, out: &mut Vec<Frame>) -> bool {
    loop {
        match decode_frame(buf, untyped) {
            Ok(Some(frame)) => out.push(frame),
            Ok(None) => return true,
            Err(_) => return false,
        }
    }
}

fuzz_target!(|input: ChunkedInput| {
    let mut whole = BytesMut::from(&input.data[..]);
    let mut expected = Vec::new();
    let whole_ok = drain(&mut whole, input.untyped, &mut expected);

    let mut splits: Vec<usize> = input
        .split_points
        .iter()
        .map(|&b| (b as usize) % (input.data.len() + 1))
        .collect();
    splits.push(0);
    splits.push(input.data.len());
    splits.sort_unstable();
    splits.dedup();

    // Arrival in pieces must yield the same frames as arrival in one read.
    let mut buf = BytesMut::new();
    let mut actual = Vec::new();
    let mut chunked_ok = true;
    for window in splits.windows(2) {
        buf.extend_from_slice(&input.data[window[0]..window[1]]);
        if !drain(&mut buf, input.untyped, &mut actual) {
            chunked_ok = false;
            break;
        }
    }

    assert_eq!(whole_ok, chunked_ok);
    assert_eq!(expected, actual);
    for frame in &expected {
        let mut encoded = BytesMut::new();
        frame.encode(&mut encoded);
        assert_eq!(encoded.len(), frame.len());
    }
});
