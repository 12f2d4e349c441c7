//! Blocking protocol client used by the behaviour suites.

use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use analysis_protocol::{
    CodecError, CorrelationToken, Envelope, FrameReader, Handshake, Message, encode_line,
};

const READ_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) struct TestClient {
    writer: TcpStream,
    reader: FrameReader<TcpStream>,
}

impl TestClient {
    pub(crate) fn connect(addr: SocketAddr) -> Self {
        let writer = TcpStream::connect(addr).expect("connect to server");
        writer
            .set_read_timeout(Some(READ_TIMEOUT))
            .expect("set read timeout");
        let reader = FrameReader::new(writer.try_clone().expect("clone stream"));
        Self { writer, reader }
    }

    pub(crate) fn send(&mut self, token: i64, message: Message) {
        let line = encode_line(&Envelope::new(CorrelationToken(token), message))
            .expect("encode request");
        self.writer.write_all(&line).expect("write request");
        self.writer.flush().expect("flush request");
    }

    /// Next envelope, or `None` once the server closed the connection.
    pub(crate) fn try_receive(&mut self) -> Result<Option<Envelope>, CodecError> {
        self.reader.next_envelope()
    }

    pub(crate) fn receive(&mut self) -> Envelope {
        self.try_receive()
            .expect("read reply")
            .expect("server closed the connection")
    }

    /// Next envelope that is not an analysis progress message.
    pub(crate) fn receive_outcome(&mut self) -> Envelope {
        loop {
            let envelope = self.receive();
            if !matches!(envelope.message, Message::AnalysisProgress(_)) {
                return envelope;
            }
        }
    }

    /// Performs the handshake and returns whether it was accepted.
    pub(crate) fn handshake(&mut self, alias: &str) -> bool {
        self.send(0, Message::Handshake(Handshake::new(alias)));
        match self.receive().message {
            Message::Handshake(reply) => reply.succeeded,
            other => panic!("expected handshake reply, got {}", other.kind()),
        }
    }

    pub(crate) fn disconnect(self) {
        drop(self.writer.shutdown(std::net::Shutdown::Both));
    }
}
