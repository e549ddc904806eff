#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![doc = concat!(
    "Reliable-ordered messaging over an unreliable, unordered, duplicating ",
    "transport.\n\n",
    "A [`Connection`](connection::Connection) multiplexes one or more ",
    "[`ReliableChannel`](reliable::ReliableChannel)s behind a single packet ",
    "sequence space: each channel runs its own sliding-window send/receive ",
    "queues, acks, small-message packing, and large-block fragmentation, ",
    "while the connection owns the shared packet header and ack bitfield. ",
    "[`DataBlockSender`](data_block::DataBlockSender)/",
    "[`DataBlockReceiver`](data_block::DataBlockReceiver) offer the same ",
    "fragmentation algorithm outside the channel/message machinery, for ",
    "one-shot bulk transfers a caller wants to drive by hand.\n\n",
    "Nothing here owns a socket: [`Transport`](transport::Transport) is the ",
    "whole contract this crate asks an external collaborator to provide, so ",
    "tests can drive every scenario below through an in-memory lossy double.",
)]

pub mod ack;
pub mod bitstream;
pub mod block;
pub mod channel;
pub mod connection;
pub mod counters;
pub mod data_block;
pub mod error;
pub mod frag;
pub mod limit;
pub mod message;
pub mod reliable;
pub mod seq;
pub mod sliding_window;
pub mod transport;

pub use connection::Connection;
pub use reliable::ReliableChannel;
pub use transport::Transport;
