//! Bytes-to-frame framing: splits a TCP byte stream on `\n` (tolerating a
//! preceding `\r` from telnet-style clients) and enforces the maximum frame
//! size.
//!
//! This is deliberately a hand-rolled [`Decoder`]/[`Encoder`] pair rather
//! than `tokio_util::codec::LinesCodec` -- the oversize wire message needs
//! the actual received byte count, which `LinesCodecError` doesn't carry.
//! Verb parsing (frame -> [`chat_core::Command`]) is a separate, pure step
//! one layer up in `handler.rs`.

use bytes::{Buf, BufMut, BytesMut};
use chat_core::ProtocolError;
use tokio_util::codec::{Decoder, Encoder};

/// Either a framing-level I/O failure or an oversize frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Newline-delimited frame codec bounded by `max_frame_size` bytes.
pub struct LineCodec {
    max_frame_size: usize,
}

impl LineCodec {
    #[must_use]
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<String>, CodecError> {
        let Some(newline_pos) = src.iter().position(|b| *b == b'\n') else {
            if src.len() >= self.max_frame_size {
                let actual = src.len();
                src.clear();
                return Err(ProtocolError::Oversize { max: self.max_frame_size, actual }.into());
            }
            return Ok(None);
        };

        if newline_pos >= self.max_frame_size {
            let actual = newline_pos;
            src.advance(newline_pos + 1);
            return Err(ProtocolError::Oversize { max: self.max_frame_size, actual }.into());
        }

        let mut line = src.split_to(newline_pos + 1);
        line.truncate(newline_pos);
        if line.last() == Some(&b'\r') {
            line.truncate(line.len() - 1);
        }

        Ok(Some(String::from_utf8_lossy(&line).into_owned()))
    }
}

impl Encoder<String> for LineCodec {
    type Error = CodecError;

    fn encode(&mut self, item: String, dst: &mut BytesMut) -> Result<(), CodecError> {
        dst.reserve(item.len() + 1);
        dst.extend_from_slice(item.as_bytes());
        dst.put_u8(b'\n');
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_single_buffered_line() {
        let mut codec = LineCodec::new(1024);
        let mut buf = BytesMut::from("CONNECT:Bob\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("CONNECT:Bob".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn strips_trailing_carriage_return_for_telnet_clients() {
        let mut codec = LineCodec::new(1024);
        let mut buf = BytesMut::from("LIST_USERS\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("LIST_USERS".to_string()));
    }

    #[test]
    fn waits_for_more_bytes_when_no_newline_yet() {
        let mut codec = LineCodec::new(1024);
        let mut buf = BytesMut::from("partial");
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
        buf.extend_from_slice(b" line\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("partial line".to_string()));
    }

    #[test]
    fn decodes_two_lines_delivered_in_one_read() {
        let mut codec = LineCodec::new(1024);
        let mut buf = BytesMut::from("LIST_USERS\nLIST_GROUPS\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("LIST_USERS".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("LIST_GROUPS".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn rejects_oversize_line_once_newline_arrives() {
        let mut codec = LineCodec::new(4);
        let mut buf = BytesMut::from("hello world\n");
        let err = codec.decode(&mut buf).unwrap_err();
        match err {
            CodecError::Protocol(ProtocolError::Oversize { max, actual }) => {
                assert_eq!(max, 4);
                assert_eq!(actual, 11);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // The oversize frame, including its newline, was discarded.
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn rejects_unbounded_growth_before_a_newline_ever_arrives() {
        let mut codec = LineCodec::new(4);
        let mut buf = BytesMut::from("nonewlinehere");
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, CodecError::Protocol(ProtocolError::Oversize { .. })));
        assert!(buf.is_empty());
    }

    #[test]
    fn accepts_frame_one_byte_under_the_limit_rejects_frame_at_the_limit() {
        let mut codec = LineCodec::new(10);

        let mut under = BytesMut::from(&b"123456789\n"[..]);
        assert_eq!(codec.decode(&mut under).unwrap(), Some("123456789".to_string()));

        let mut at_limit = BytesMut::from(&b"1234567890\n"[..]);
        match codec.decode(&mut at_limit) {
            Err(CodecError::Protocol(ProtocolError::Oversize { max, actual })) => {
                assert_eq!(max, 10);
                assert_eq!(actual, 10);
            }
            other => panic!("expected an oversize rejection, got: {other:?}"),
        }
    }

    #[test]
    fn encodes_appends_single_trailing_newline() {
        let mut codec = LineCodec::new(1024);
        let mut buf = BytesMut::new();
        codec.encode("hello".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"hello\n");
    }
}
