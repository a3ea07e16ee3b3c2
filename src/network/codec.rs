//! CRLF line framing with the RFC length cap.

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

/// IRC line limit excluding tags; oversize lines are truncated rather
/// than fatal, matching common ircd behaviour.
const MAX_LINE: usize = 512;

/// Splits on `\n`, trims a trailing `\r`, caps line length.
#[derive(Debug, Default)]
pub struct LineCodec {
    /// Set while discarding the remainder of an oversize line.
    discarding: bool,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, std::io::Error> {
        loop {
            let Some(newline) = buf.iter().position(|&b| b == b'\n') else {
                if self.discarding {
                    buf.clear();
                    return Ok(None);
                }
                if buf.len() > MAX_LINE {
                    // Deliver the capped prefix; skip until the newline.
                    let mut line = buf.split_to(MAX_LINE);
                    trim_line(&mut line);
                    self.discarding = true;
                    return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
                }
                return Ok(None);
            };

            let mut line = buf.split_to(newline);
            buf.advance(1);
            if self.discarding {
                self.discarding = false;
                continue;
            }
            line.truncate(MAX_LINE);
            trim_line(&mut line);
            return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
        }
    }
}

fn trim_line(line: &mut BytesMut) {
    while line.last().copied() == Some(b'\r') {
        line.truncate(line.len() - 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut LineCodec, input: &[u8]) -> Vec<String> {
        let mut buf = BytesMut::from(input);
        let mut out = Vec::new();
        while let Ok(Some(line)) = codec.decode(&mut buf) {
            out.push(line);
        }
        out
    }

    #[test]
    fn splits_crlf_and_bare_lf() {
        let mut codec = LineCodec::new();
        let lines = decode_all(&mut codec, b"NICK alice\r\nUSER a 0 * :A\nPING x\r\n");
        assert_eq!(lines, vec!["NICK alice", "USER a 0 * :A", "PING x"]);
    }

    #[test]
    fn partial_line_waits_for_more() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"PRIVMSG #a :hel"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b"lo\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("PRIVMSG #a :hello".into()));
    }

    #[test]
    fn oversize_line_is_capped() {
        let mut codec = LineCodec::new();
        let mut input = vec![b'a'; 600];
        input.extend_from_slice(b"\r\nPING y\r\n");
        let lines = decode_all(&mut codec, &input);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), MAX_LINE);
        assert_eq!(lines[1], "PING y");
    }
}
