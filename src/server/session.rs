use log::debug;

use crate::{channel::Channel, error::StubError, transport::Wire};

/// Client messages [`auto_session`] answers without a script.
pub const AUTO_MESSAGES: &[&str] = &[
    "HELLO",
    "INIT",
    "LOGON",
    "LOGOFF",
    "RESET",
    "TELEMETRY",
    "ACK_FAILURE",
];

/// Session that answers housekeeping messages and nothing else.
///
/// Ends cleanly on `GOODBYE` or when the client hangs up between messages.
/// Any other message is a script fault since no script expects it.
pub fn auto_session<W: Wire>(channel: &mut Channel<W>) -> Result<(), StubError> {
    loop {
        match channel.try_auto_consume(AUTO_MESSAGES) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) if e.is_end_of_stream() => {
                debug!("client hung up");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }

    let msg = channel.consume(None)?;
    if msg.name != "GOODBYE" {
        return Err(StubError::Script(format!(
            "no script line expects client message {msg}"
        )));
    }
    channel.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        channel::tests::channel,
        packstream::{Structure, Value, pack_structure},
    };

    fn framed(tag: u8) -> Vec<u8> {
        let mut data = Vec::new();
        pack_structure(&Structure::new(tag, vec![Value::Map(vec![])]), &mut data).unwrap();
        let mut out = (data.len() as u16).to_be_bytes().to_vec();
        out.extend(data);
        out.extend([0, 0]);
        out
    }

    #[test]
    fn answers_housekeeping_until_goodbye() {
        let mut input = framed(0x01);
        input.extend(framed(0x6A));
        input.extend(framed(0x0F));
        input.extend(framed(0x02));
        let mut channel = channel(&input, (5, 1));

        auto_session(&mut channel).unwrap();
    }

    #[test]
    fn client_hang_up_ends_session() {
        let mut channel = channel(&framed(0x01), (5, 1));

        auto_session(&mut channel).unwrap();
    }

    #[test]
    #[should_panic(expected = "no script line expects client message RUN")]
    fn unscripted_message() {
        let mut channel = channel(&framed(0x10), (5, 1));

        auto_session(&mut channel).unwrap();
    }
}
