//! Domain names in presentation and wire form.

use std::fmt;

use super::ProtoError;

/// Longest presentation form accepted (without the trailing dot).
const MAX_PRESENTATION_LEN: usize = 253;

/// Longest encoded name, including length bytes and the root label.
const MAX_WIRE_LEN: usize = 255;

/// A fully qualified domain name.
///
/// Stored in presentation form with a trailing dot (the root name is `.`).
/// Case is preserved as received; callers that need case-insensitive matching
/// use [`Name::normalized`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Name(String);

impl Name {
    /// The root name.
    pub fn root() -> Self {
        Self(".".to_string())
    }

    /// Parses a name from presentation form, accepting both `example.com`
    /// and `example.com.`. Labels must be 1-63 bytes, the whole name at most
    /// 253 bytes before the trailing dot.
    pub fn parse(input: &str) -> Result<Self, ProtoError> {
        if input == "." {
            return Ok(Self::root());
        }
        let trimmed = input.strip_suffix('.').unwrap_or(input);
        if trimmed.is_empty() {
            return Err(ProtoError::InvalidName(input.to_string()));
        }
        if trimmed.len() > MAX_PRESENTATION_LEN {
            return Err(ProtoError::NameTooLong);
        }
        for label in trimmed.split('.') {
            if label.is_empty() || label.len() > 63 {
                return Err(ProtoError::InvalidName(input.to_string()));
            }
        }
        Ok(Self(format!("{trimmed}.")))
    }

    /// The presentation form, always with a trailing dot.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "."
    }

    /// Lowercased form without the trailing dot, the shape used as a lookup
    /// key into the local record tables.
    pub fn normalized(&self) -> String {
        self.0.trim_end_matches('.').to_ascii_lowercase()
    }

    /// Decodes a name starting at `offset` within `msg`, following
    /// compression pointers. Returns the name and the number of bytes the
    /// name occupies at `offset` itself.
    pub(crate) fn from_wire(msg: &[u8], offset: usize) -> Result<(Self, usize), ProtoError> {
        let mut text = String::new();
        let mut wire_len = 1usize;
        let mut pos = offset;
        let mut consumed = 0usize;
        let mut jumped = false;

        loop {
            let len_byte = *msg.get(pos).ok_or(ProtoError::UnexpectedEof(pos))?;

            if len_byte & 0xC0 == 0xC0 {
                let low = *msg.get(pos + 1).ok_or(ProtoError::UnexpectedEof(pos + 1))?;
                let target = usize::from(len_byte & 0x3F) << 8 | usize::from(low);
                // Pointers may only point backwards, which also rules out loops.
                if target >= pos {
                    return Err(ProtoError::BadPointer(pos));
                }
                if !jumped {
                    consumed = pos + 2 - offset;
                    jumped = true;
                }
                pos = target;
                continue;
            }
            if len_byte & 0xC0 != 0 {
                return Err(ProtoError::ReservedLabelType(pos));
            }

            let len = usize::from(len_byte);
            if len == 0 {
                if !jumped {
                    consumed = pos + 1 - offset;
                }
                break;
            }

            wire_len += len + 1;
            if wire_len > MAX_WIRE_LEN {
                return Err(ProtoError::NameTooLong);
            }

            let end = pos + 1 + len;
            let label = msg
                .get(pos + 1..end)
                .ok_or(ProtoError::UnexpectedEof(end))?;
            let label = std::str::from_utf8(label).map_err(|_| ProtoError::InvalidLabel(pos))?;
            if label.contains('.') {
                return Err(ProtoError::InvalidLabel(pos));
            }
            text.push_str(label);
            text.push('.');
            pos = end;
        }

        if text.is_empty() {
            text.push('.');
        }
        Ok((Self(text), consumed))
    }

    /// Appends the uncompressed wire encoding to `buf`.
    pub(crate) fn to_wire(&self, buf: &mut Vec<u8>) {
        if !self.is_root() {
            for label in self.0.trim_end_matches('.').split('.') {
                debug_assert!(!label.is_empty() && label.len() <= 63);
                buf.push(label.len() as u8);
                buf.extend_from_slice(label.as_bytes());
            }
        }
        buf.push(0);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_appends_trailing_dot() {
        let name = Name::parse("Example.COM").unwrap();
        assert_eq!(name.as_str(), "Example.COM.");
        assert_eq!(name.normalized(), "example.com");
    }

    #[test]
    fn parse_accepts_fqdn() {
        let name = Name::parse("example.com.").unwrap();
        assert_eq!(name.as_str(), "example.com.");
    }

    #[test]
    fn parse_rejects_empty_and_bad_labels() {
        assert!(Name::parse("").is_err());
        assert!(Name::parse("a..b").is_err());
        assert!(Name::parse(&"x".repeat(64)).is_err());
        assert!(Name::parse(&format!("{}.com", "x".repeat(250))).is_err());
    }

    #[test]
    fn root_round_trip() {
        let mut buf = Vec::new();
        Name::root().to_wire(&mut buf);
        assert_eq!(buf, vec![0]);

        let (name, used) = Name::from_wire(&buf, 0).unwrap();
        assert!(name.is_root());
        assert_eq!(used, 1);
    }

    #[test]
    fn wire_round_trip() {
        let mut buf = Vec::new();
        Name::parse("mail.example.com").unwrap().to_wire(&mut buf);

        let (name, used) = Name::from_wire(&buf, 0).unwrap();
        assert_eq!(name.as_str(), "mail.example.com.");
        assert_eq!(used, buf.len());
    }

    #[test]
    fn decodes_compression_pointer() {
        // "example.com" at offset 0, then "mail" + pointer to offset 0.
        let mut msg = Vec::new();
        Name::parse("example.com").unwrap().to_wire(&mut msg);
        let second = msg.len();
        msg.push(4);
        msg.extend_from_slice(b"mail");
        msg.extend_from_slice(&[0xC0, 0x00]);

        let (name, used) = Name::from_wire(&msg, second).unwrap();
        assert_eq!(name.as_str(), "mail.example.com.");
        assert_eq!(used, 7);
    }

    #[test]
    fn rejects_forward_pointer() {
        let msg = [0xC0, 0x04, 0, 0];
        assert!(Name::from_wire(&msg, 0).is_err());
    }

    #[test]
    fn rejects_truncated_label() {
        let msg = [5, b'a', b'b'];
        assert!(Name::from_wire(&msg, 0).is_err());
    }
}
