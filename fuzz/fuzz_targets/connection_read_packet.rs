#![no_main]

use {
    libfuzzer_sys::fuzz_target,
    reliable_channel::{
        block::BlockMessage,
        channel::ChannelStructure,
        connection::Connection,
        message::{MessageFactory, BLOCK_MESSAGE_TYPE},
        reliable::{ReliableChannel, ReliableChannelConfig},
    },
    std::sync::Arc,
};

/// Arbitrary bytes must never panic `Connection::read_packet`, only ever
/// return a transient error or succeed; this is the one inbound surface an
/// untrusted peer fully controls.
fuzz_target!(|packet: &[u8]| {
    let mut factory = MessageFactory::new();
    factory.register(BLOCK_MESSAGE_TYPE, || Box::new(BlockMessage::default()));
    let factory = Arc::new(factory);

    let structure = ChannelStructure::new(vec![ReliableChannelConfig::default()]);
    let mut connection = Connection::new(&structure, 64, |config| {
        ReliableChannel::new(config.clone(), factory.clone()).unwrap()
    });

    let _ = connection.read_packet(packet);
});
