use crate::{codec, Packet};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_serde::formats::SymmetricalMessagePack;
use tokio_util::codec::{FramedRead, FramedWrite};

pub type Reader = Box<dyn AsyncRead + Send + Unpin>;
pub type Writer = Box<dyn AsyncWrite + Send + Unpin>;

/// Inbound half of a connection, yielding one `Packet` per frame.
pub type PacketStream = tokio_serde::SymmetricallyFramed<
    FramedRead<Reader, tokio_util::codec::LengthDelimitedCodec>,
    Packet,
    SymmetricalMessagePack<Packet>,
>;

/// Outbound half of a connection, accepting one `Packet` per frame.
pub type PacketSink = tokio_serde::SymmetricallyFramed<
    FramedWrite<Writer, tokio_util::codec::LengthDelimitedCodec>,
    Packet,
    SymmetricalMessagePack<Packet>,
>;

pub fn new_packet_stream(reader: Reader) -> PacketStream {
    PacketStream::new(
        FramedRead::new(reader, codec::length_delimited()),
        SymmetricalMessagePack::<Packet>::default(),
    )
}

pub fn new_packet_sink(writer: Writer) -> PacketSink {
    PacketSink::new(
        FramedWrite::new(writer, codec::length_delimited()),
        SymmetricalMessagePack::<Packet>::default(),
    )
}

/// Split a transport into independently framed read and write halves.
pub fn split_connection<T>(connection: T) -> (PacketStream, PacketSink)
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    let (reader, writer) = tokio::io::split(connection);
    (
        new_packet_stream(Box::new(reader)),
        new_packet_sink(Box::new(writer)),
    )
}
