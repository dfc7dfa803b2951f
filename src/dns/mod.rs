//! DNS wire format support.
//!
//! A compact RFC 1035 codec: message header and sections, domain names with
//! compression-pointer decoding, and typed RDATA for the record types this
//! server answers. Anything else is carried verbatim as opaque bytes.

mod message;
mod name;
mod rdata;

pub use message::{flags, Header, Message, Question, Record};
pub use name::Name;
pub use rdata::RData;

use std::fmt;

use thiserror::Error;

/// Largest UDP payload we send or accept.
pub const MAX_PACKET_SIZE: usize = 65535;

/// Wire format decoding error.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("message truncated at offset {0}")]
    UnexpectedEof(usize),
    #[error("invalid compression pointer at offset {0}")]
    BadPointer(usize),
    #[error("reserved label type at offset {0}")]
    ReservedLabelType(usize),
    #[error("invalid label at offset {0}")]
    InvalidLabel(usize),
    #[error("invalid domain name {0:?}")]
    InvalidName(String),
    #[error("domain name too long")]
    NameTooLong,
    #[error("record data for {0} has wrong length")]
    RdataLength(RecordType),
}

/// DNS record type.
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    NAPTR,
    CERT,
    DS,
    SSHFP,
    DNSKEY,
    TLSA,
    SMIMEA,
    SVCB,
    HTTPS,
    URI,
    CAA,
    Unknown(u16),
}

impl RecordType {
    pub const fn value(self) -> u16 {
        match self {
            Self::A => 1,
            Self::NS => 2,
            Self::CNAME => 5,
            Self::SOA => 6,
            Self::PTR => 12,
            Self::MX => 15,
            Self::TXT => 16,
            Self::AAAA => 28,
            Self::SRV => 33,
            Self::NAPTR => 35,
            Self::CERT => 37,
            Self::DS => 43,
            Self::SSHFP => 44,
            Self::DNSKEY => 48,
            Self::TLSA => 52,
            Self::SMIMEA => 53,
            Self::SVCB => 64,
            Self::HTTPS => 65,
            Self::URI => 256,
            Self::CAA => 257,
            Self::Unknown(v) => v,
        }
    }

    pub fn from_value(value: u16) -> Self {
        match value {
            1 => Self::A,
            2 => Self::NS,
            5 => Self::CNAME,
            6 => Self::SOA,
            12 => Self::PTR,
            15 => Self::MX,
            16 => Self::TXT,
            28 => Self::AAAA,
            33 => Self::SRV,
            35 => Self::NAPTR,
            37 => Self::CERT,
            43 => Self::DS,
            44 => Self::SSHFP,
            48 => Self::DNSKEY,
            52 => Self::TLSA,
            53 => Self::SMIMEA,
            64 => Self::SVCB,
            65 => Self::HTTPS,
            256 => Self::URI,
            257 => Self::CAA,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = match self {
            Self::A => "A",
            Self::NS => "NS",
            Self::CNAME => "CNAME",
            Self::SOA => "SOA",
            Self::PTR => "PTR",
            Self::MX => "MX",
            Self::TXT => "TXT",
            Self::AAAA => "AAAA",
            Self::SRV => "SRV",
            Self::NAPTR => "NAPTR",
            Self::CERT => "CERT",
            Self::DS => "DS",
            Self::SSHFP => "SSHFP",
            Self::DNSKEY => "DNSKEY",
            Self::TLSA => "TLSA",
            Self::SMIMEA => "SMIMEA",
            Self::SVCB => "SVCB",
            Self::HTTPS => "HTTPS",
            Self::URI => "URI",
            Self::CAA => "CAA",
            Self::Unknown(v) => return write!(f, "TYPE{v}"),
        };
        f.write_str(mnemonic)
    }
}

/// DNS record class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordClass {
    IN,
    CH,
    HS,
    Unknown(u16),
}

impl RecordClass {
    pub const fn value(self) -> u16 {
        match self {
            Self::IN => 1,
            Self::CH => 3,
            Self::HS => 4,
            Self::Unknown(v) => v,
        }
    }

    pub fn from_value(value: u16) -> Self {
        match value {
            1 => Self::IN,
            3 => Self::CH,
            4 => Self::HS,
            other => Self::Unknown(other),
        }
    }
}

impl fmt::Display for RecordClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IN => f.write_str("IN"),
            Self::CH => f.write_str("CH"),
            Self::HS => f.write_str("HS"),
            Self::Unknown(v) => write!(f, "CLASS{v}"),
        }
    }
}

/// DNS response code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rcode {
    NoError,
    FormErr,
    ServFail,
    NxDomain,
    NotImp,
    Refused,
    Other(u8),
}

impl Rcode {
    pub const fn value(self) -> u8 {
        match self {
            Self::NoError => 0,
            Self::FormErr => 1,
            Self::ServFail => 2,
            Self::NxDomain => 3,
            Self::NotImp => 4,
            Self::Refused => 5,
            Self::Other(v) => v,
        }
    }

    pub fn from_value(value: u8) -> Self {
        match value {
            0 => Self::NoError,
            1 => Self::FormErr,
            2 => Self::ServFail,
            3 => Self::NxDomain,
            4 => Self::NotImp,
            5 => Self::Refused,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for Rcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoError => f.write_str("NOERROR"),
            Self::FormErr => f.write_str("FORMERR"),
            Self::ServFail => f.write_str("SERVFAIL"),
            Self::NxDomain => f.write_str("NXDOMAIN"),
            Self::NotImp => f.write_str("NOTIMP"),
            Self::Refused => f.write_str("REFUSED"),
            Self::Other(v) => write!(f, "RCODE{v}"),
        }
    }
}

/// Bounds-checked reader over a wire format buffer.
pub(crate) struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub(crate) fn with_position(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8, ProtoError> {
        let value = *self
            .data
            .get(self.pos)
            .ok_or(ProtoError::UnexpectedEof(self.pos))?;
        self.pos += 1;
        Ok(value)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16, ProtoError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32, ProtoError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub(crate) fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], ProtoError> {
        let end = self
            .pos
            .checked_add(len)
            .ok_or(ProtoError::UnexpectedEof(self.pos))?;
        let slice = self
            .data
            .get(self.pos..end)
            .ok_or(ProtoError::UnexpectedEof(end))?;
        self.pos = end;
        Ok(slice)
    }

    pub(crate) fn advance(&mut self, len: usize) -> Result<(), ProtoError> {
        self.read_bytes(len).map(|_| ())
    }
}
