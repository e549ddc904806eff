#![no_main]

use {
    arbitrary::Arbitrary, libfuzzer_sys::fuzz_target,
    reliable_channel::sliding_window::SlotWindow,
};

#[derive(Debug, Arbitrary)]
enum Op {
    Insert { sequence: u16, value: u16 },
    Clear { sequence: u16 },
    Find { sequence: u16 },
}

fuzz_target!(|ops: Vec<Op>| {
    let mut window: SlotWindow<u16> = SlotWindow::new(64);

    for op in ops {
        match op {
            Op::Insert { sequence, value } => {
                if let Some(written) = window.insert_at(sequence, value) {
                    assert_eq!(value, *written);
                    assert_eq!(Some(&value), window.find(sequence));
                }
            }
            Op::Clear { sequence } => {
                let before = window.find(sequence).copied();
                let cleared = window.clear(sequence);
                assert_eq!(before, cleared);
                assert!(window.find(sequence).is_none());
            }
            Op::Find { sequence } => {
                let _ = window.find(sequence);
            }
        }
    }

    assert_eq!(window.len(), window.iter().count());
    assert!(window.len() <= window.capacity());
});
