#![no_main]

use {arbitrary::Arbitrary, libfuzzer_sys::fuzz_target, reliable_channel::frag::FragmentReceiver};

#[derive(Debug, Arbitrary)]
struct Fragment {
    fragment_id: u32,
    block_size: u32,
    data: Vec<u8>,
}

#[derive(Debug, Arbitrary)]
struct Input {
    fragment_size: u16,
    block_size: u32,
    num_fragments: u16,
    fragments: Vec<Fragment>,
}

fuzz_target!(|input: Input| {
    let fragment_size = usize::from(input.fragment_size.max(1));
    let num_fragments = u32::from(input.num_fragments.max(1));
    if u64::from(input.block_size) > 64 * 1024 * 1024 {
        return;
    }

    let mut recv = FragmentReceiver::new(fragment_size, input.block_size, num_fragments);
    for fragment in &input.fragments {
        // never panics regardless of how malformed the declared fields are;
        // errors for mismatched block_size/fragment_id are the expected
        // rejection path, not a bug.
        let _ = recv.insert(fragment.block_size, fragment.fragment_id, &fragment.data);
    }

    if recv.is_complete() {
        let block = recv.into_block();
        assert_eq!(input.block_size as usize, block.len());
    }
});
