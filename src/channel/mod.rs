//! Per-connection glue between a test script, the transport and the Bolt protocol.
//!
//! A [`Channel`] owns one client connection for its whole life. It first runs
//! the preamble and version handshake (see [`handshake`]), then offers the
//! script interpreter a replayable view of the client's messages:
//!
//! - [`Channel::peek`] decodes the next message and keeps it in a single
//!   slot buffer, [`Channel::consume`] hands it out and clears the slot.
//! - [`Channel::try_auto_consume`] skips protocol chatter the script did not
//!   author by answering it with the protocol's automatic response.
//! - [`Channel::assert_no_input`] fails the test if the client sent anything.
//!
//! Every protocol event is reported to the channel's log sink, in the order
//! it happens on the wire.
mod handshake;
mod offer;

use std::fmt;

use log::{debug, info};

use crate::{
    bolt::{BoltProtocol, Message, ServerLine},
    error::StubError,
    packstream::PackStream,
    transport::Wire,
    util::hex_repr,
};

use offer::HandshakeCodec;

pub use handshake::{
    HandshakeConfig, HandshakeMode, HandshakeStep, MAGIC, ManifestVersion, check_offer,
    select_offer,
};

/// Receives one formatted line per protocol event.
pub type LogSink = Box<dyn FnMut(fmt::Arguments<'_>) + Send>;

pub struct Channel<W: Wire> {
    wire: W,
    protocol: BoltProtocol,
    stream: PackStream,
    codec: HandshakeCodec,
    handshake_mode: HandshakeMode,
    handshake_delay: Option<std::time::Duration>,
    handshake_step: Option<HandshakeStep>,
    buffered: Option<Message>,
    log_sink: Option<LogSink>,
}

impl<W: Wire> Channel<W> {
    pub fn new(wire: W, protocol: BoltProtocol, handshake: HandshakeConfig) -> Self {
        Self {
            wire,
            protocol,
            stream: PackStream::default(),
            codec: HandshakeCodec::new(),
            handshake_mode: handshake.mode,
            handshake_delay: handshake.delay,
            handshake_step: None,
            buffered: None,
            log_sink: None,
        }
    }

    /// Routes protocol events to `sink` instead of the `log` facade.
    pub fn with_log_sink(mut self, sink: LogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    pub fn protocol(&self) -> &BoltProtocol {
        &self.protocol
    }

    fn log(&mut self, args: fmt::Arguments<'_>) {
        match self.log_sink.as_mut() {
            Some(sink) => sink(args),
            None => info!("{args}"),
        }
    }

    fn read_message(&mut self) -> Result<Message, StubError> {
        let structure = self.stream.read_message(&mut self.wire)?;
        Ok(self.protocol.translate_structure(structure)?)
    }

    /// Returns the next client message, from the buffer if a previous
    /// [`Channel::peek`] filled it.
    ///
    /// `line_no` is the script line that expects the message; it only shows
    /// up in the log.
    pub fn consume(&mut self, line_no: Option<usize>) -> Result<Message, StubError> {
        let msg = match self.buffered.take() {
            Some(msg) => msg,
            None => self.read_message()?,
        };
        match line_no {
            Some(line_no) => self.log(format_args!("({line_no:4}) C: {msg}")),
            None => self.log(format_args!("C: {msg}")),
        }
        Ok(msg)
    }

    /// Returns the next client message without consuming it.
    pub fn peek(&mut self) -> Result<&Message, StubError> {
        let msg = match self.buffered.take() {
            Some(msg) => msg,
            None => self.read_message()?,
        };
        let msg: &Message = self.buffered.insert(msg);
        Ok(msg)
    }

    pub fn send_server_line(&mut self, line: &ServerLine) -> Result<(), StubError> {
        self.log(format_args!("S: {line}"));
        let structure = self.protocol.translate_server_line(line)?;
        self.stream.write_message(&mut self.wire, &structure)?;
        self.stream.drain(&mut self.wire)?;
        Ok(())
    }

    /// Sends bytes verbatim, bypassing the codec.
    pub fn send_raw(&mut self, bytes: &[u8]) -> Result<(), StubError> {
        self.log(format_args!("S: <RAW> {}", hex_repr(bytes)));
        self.wire.write(bytes)?;
        self.wire.send()?;
        Ok(())
    }

    pub fn auto_respond(&mut self, msg: &Message) -> Result<(), StubError> {
        let response = self.protocol.auto_response(msg);
        let name = match self.protocol.server_message_name(response.tag) {
            Some(name) => name.to_string(),
            None => format!("0x{:02X}", response.tag),
        };
        let fields = response
            .fields
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        self.log(format_args!("(AUTO) S: {name} {}", fields.join(" ")));
        self.stream.write_message(&mut self.wire, &response)?;
        self.stream.drain(&mut self.wire)?;
        Ok(())
    }

    /// Consumes and auto-responds to the next message if its name is in
    /// `allowed`. Otherwise the message stays buffered and `false` is returned.
    pub fn try_auto_consume(&mut self, allowed: &[&str]) -> Result<bool, StubError> {
        let name = self.peek()?.name;
        if !allowed.contains(&name) {
            return Ok(false);
        }
        let Some(msg) = self.buffered.take() else {
            return Ok(false);
        };
        self.log(format_args!("C: {msg}"));
        self.auto_respond(&msg)?;
        Ok(true)
    }

    /// Fails, and closes the connection, if the client has sent anything
    /// that has not been read yet.
    pub fn assert_no_input(&mut self) -> Result<(), StubError> {
        if !self.wire.has_pending_input()? {
            return Ok(());
        }

        let received = match self.peek() {
            Ok(msg) => msg.to_string(),
            Err(e) => format!("some data (encountered error while trying to peek): {e}"),
        };
        if let Err(e) = self.wire.close() {
            debug!("failed to close connection: {e}");
        }
        Err(StubError::Script(format!(
            "Expected the driver to not send anything, but received: {received}"
        )))
    }

    pub fn close(&mut self) -> Result<(), StubError> {
        self.wire.close()?;
        Ok(())
    }
}
