//! Typed record data.
//!
//! Record types whose RDATA may carry compressed names are decoded into
//! structured form so re-encoding a parsed message is always legal (names are
//! written back uncompressed). Types this server does not interpret are kept
//! as raw bytes; RFC 3597 forbids compression inside them.

use std::net::{Ipv4Addr, Ipv6Addr};

use super::{Cursor, Name, ProtoError, RecordType};

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    AAAA(Ipv6Addr),
    NS(Name),
    CNAME(Name),
    PTR(Name),
    MX {
        preference: u16,
        exchange: Name,
    },
    /// One or more character-strings.
    TXT(Vec<Vec<u8>>),
    SOA {
        mname: Name,
        rname: Name,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
    },
    SRV {
        priority: u16,
        weight: u16,
        port: u16,
        target: Name,
    },
    SVCB {
        priority: u16,
        target: Name,
        params: Vec<u8>,
    },
    HTTPS {
        priority: u16,
        target: Name,
        params: Vec<u8>,
    },
    CAA {
        flag: u8,
        tag: Vec<u8>,
        value: Vec<u8>,
    },
    DS {
        key_tag: u16,
        algorithm: u8,
        digest_type: u8,
        digest: Vec<u8>,
    },
    DNSKEY {
        flags: u16,
        protocol: u8,
        algorithm: u8,
        public_key: Vec<u8>,
    },
    URI {
        priority: u16,
        weight: u16,
        target: Vec<u8>,
    },
    NAPTR {
        order: u16,
        preference: u16,
        flags: Vec<u8>,
        services: Vec<u8>,
        regexp: Vec<u8>,
        replacement: Name,
    },
    SSHFP {
        algorithm: u8,
        fingerprint_type: u8,
        fingerprint: Vec<u8>,
    },
    TLSA {
        usage: u8,
        selector: u8,
        matching_type: u8,
        certificate: Vec<u8>,
    },
    SMIMEA {
        usage: u8,
        selector: u8,
        matching_type: u8,
        certificate: Vec<u8>,
    },
    CERT {
        cert_type: u16,
        key_tag: u16,
        algorithm: u8,
        certificate: Vec<u8>,
    },
    /// Verbatim RDATA of a type this server does not interpret.
    Unknown(Vec<u8>),
}

impl RData {
    /// Decodes the RDATA of a record of type `rtype` occupying
    /// `msg[start..start + rdlen]`. The full message prefix is kept in view
    /// so compression pointers inside the RDATA resolve.
    pub(crate) fn parse(
        rtype: RecordType,
        msg: &[u8],
        start: usize,
        rdlen: usize,
    ) -> Result<Self, ProtoError> {
        let end = start
            .checked_add(rdlen)
            .ok_or(ProtoError::UnexpectedEof(start))?;
        if end > msg.len() {
            return Err(ProtoError::UnexpectedEof(end));
        }
        let view = &msg[..end];
        let mut cur = Cursor::with_position(view, start);

        let rdata = match rtype {
            RecordType::A => {
                let bytes = cur.read_bytes(4)?;
                Self::A(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
            }
            RecordType::AAAA => {
                let bytes = cur.read_bytes(16)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                Self::AAAA(Ipv6Addr::from(octets))
            }
            RecordType::NS => Self::NS(read_name(view, &mut cur)?),
            RecordType::CNAME => Self::CNAME(read_name(view, &mut cur)?),
            RecordType::PTR => Self::PTR(read_name(view, &mut cur)?),
            RecordType::MX => Self::MX {
                preference: cur.read_u16()?,
                exchange: read_name(view, &mut cur)?,
            },
            RecordType::TXT => {
                let mut strings = Vec::new();
                while cur.position() < end {
                    strings.push(read_char_string(&mut cur)?);
                }
                Self::TXT(strings)
            }
            RecordType::SOA => Self::SOA {
                mname: read_name(view, &mut cur)?,
                rname: read_name(view, &mut cur)?,
                serial: cur.read_u32()?,
                refresh: cur.read_u32()?,
                retry: cur.read_u32()?,
                expire: cur.read_u32()?,
                minimum: cur.read_u32()?,
            },
            RecordType::SRV => Self::SRV {
                priority: cur.read_u16()?,
                weight: cur.read_u16()?,
                port: cur.read_u16()?,
                target: read_name(view, &mut cur)?,
            },
            RecordType::SVCB => {
                let (priority, target, params) = read_svc(view, &mut cur, end)?;
                Self::SVCB {
                    priority,
                    target,
                    params,
                }
            }
            RecordType::HTTPS => {
                let (priority, target, params) = read_svc(view, &mut cur, end)?;
                Self::HTTPS {
                    priority,
                    target,
                    params,
                }
            }
            RecordType::CAA => {
                let flag = cur.read_u8()?;
                let tag = read_char_string(&mut cur)?;
                let value = read_rest(&mut cur, end)?;
                Self::CAA { flag, tag, value }
            }
            RecordType::DS => Self::DS {
                key_tag: cur.read_u16()?,
                algorithm: cur.read_u8()?,
                digest_type: cur.read_u8()?,
                digest: read_rest(&mut cur, end)?,
            },
            RecordType::DNSKEY => Self::DNSKEY {
                flags: cur.read_u16()?,
                protocol: cur.read_u8()?,
                algorithm: cur.read_u8()?,
                public_key: read_rest(&mut cur, end)?,
            },
            RecordType::URI => Self::URI {
                priority: cur.read_u16()?,
                weight: cur.read_u16()?,
                target: read_rest(&mut cur, end)?,
            },
            RecordType::NAPTR => Self::NAPTR {
                order: cur.read_u16()?,
                preference: cur.read_u16()?,
                flags: read_char_string(&mut cur)?,
                services: read_char_string(&mut cur)?,
                regexp: read_char_string(&mut cur)?,
                replacement: read_name(view, &mut cur)?,
            },
            RecordType::SSHFP => Self::SSHFP {
                algorithm: cur.read_u8()?,
                fingerprint_type: cur.read_u8()?,
                fingerprint: read_rest(&mut cur, end)?,
            },
            RecordType::TLSA => {
                let (usage, selector, matching_type, certificate) = read_tlsa(&mut cur, end)?;
                Self::TLSA {
                    usage,
                    selector,
                    matching_type,
                    certificate,
                }
            }
            RecordType::SMIMEA => {
                let (usage, selector, matching_type, certificate) = read_tlsa(&mut cur, end)?;
                Self::SMIMEA {
                    usage,
                    selector,
                    matching_type,
                    certificate,
                }
            }
            RecordType::CERT => Self::CERT {
                cert_type: cur.read_u16()?,
                key_tag: cur.read_u16()?,
                algorithm: cur.read_u8()?,
                certificate: read_rest(&mut cur, end)?,
            },
            RecordType::Unknown(_) => Self::Unknown(read_rest(&mut cur, end)?),
        };

        if cur.position() != end {
            return Err(ProtoError::RdataLength(rtype));
        }
        Ok(rdata)
    }

    /// Appends the RDATA wire encoding (without the length prefix) to `buf`.
    pub(crate) fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Self::A(addr) => buf.extend_from_slice(&addr.octets()),
            Self::AAAA(addr) => buf.extend_from_slice(&addr.octets()),
            Self::NS(name) | Self::CNAME(name) | Self::PTR(name) => name.to_wire(buf),
            Self::MX {
                preference,
                exchange,
            } => {
                buf.extend_from_slice(&preference.to_be_bytes());
                exchange.to_wire(buf);
            }
            Self::TXT(strings) => {
                for s in strings {
                    write_char_string(buf, s);
                }
            }
            Self::SOA {
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
            } => {
                mname.to_wire(buf);
                rname.to_wire(buf);
                for v in [serial, refresh, retry, expire, minimum] {
                    buf.extend_from_slice(&v.to_be_bytes());
                }
            }
            Self::SRV {
                priority,
                weight,
                port,
                target,
            } => {
                buf.extend_from_slice(&priority.to_be_bytes());
                buf.extend_from_slice(&weight.to_be_bytes());
                buf.extend_from_slice(&port.to_be_bytes());
                target.to_wire(buf);
            }
            Self::SVCB {
                priority,
                target,
                params,
            }
            | Self::HTTPS {
                priority,
                target,
                params,
            } => {
                buf.extend_from_slice(&priority.to_be_bytes());
                target.to_wire(buf);
                buf.extend_from_slice(params);
            }
            Self::CAA { flag, tag, value } => {
                buf.push(*flag);
                write_char_string(buf, tag);
                buf.extend_from_slice(value);
            }
            Self::DS {
                key_tag,
                algorithm,
                digest_type,
                digest,
            } => {
                buf.extend_from_slice(&key_tag.to_be_bytes());
                buf.push(*algorithm);
                buf.push(*digest_type);
                buf.extend_from_slice(digest);
            }
            Self::DNSKEY {
                flags,
                protocol,
                algorithm,
                public_key,
            } => {
                buf.extend_from_slice(&flags.to_be_bytes());
                buf.push(*protocol);
                buf.push(*algorithm);
                buf.extend_from_slice(public_key);
            }
            Self::URI {
                priority,
                weight,
                target,
            } => {
                buf.extend_from_slice(&priority.to_be_bytes());
                buf.extend_from_slice(&weight.to_be_bytes());
                buf.extend_from_slice(target);
            }
            Self::NAPTR {
                order,
                preference,
                flags,
                services,
                regexp,
                replacement,
            } => {
                buf.extend_from_slice(&order.to_be_bytes());
                buf.extend_from_slice(&preference.to_be_bytes());
                write_char_string(buf, flags);
                write_char_string(buf, services);
                write_char_string(buf, regexp);
                replacement.to_wire(buf);
            }
            Self::SSHFP {
                algorithm,
                fingerprint_type,
                fingerprint,
            } => {
                buf.push(*algorithm);
                buf.push(*fingerprint_type);
                buf.extend_from_slice(fingerprint);
            }
            Self::TLSA {
                usage,
                selector,
                matching_type,
                certificate,
            }
            | Self::SMIMEA {
                usage,
                selector,
                matching_type,
                certificate,
            } => {
                buf.push(*usage);
                buf.push(*selector);
                buf.push(*matching_type);
                buf.extend_from_slice(certificate);
            }
            Self::CERT {
                cert_type,
                key_tag,
                algorithm,
                certificate,
            } => {
                buf.extend_from_slice(&cert_type.to_be_bytes());
                buf.extend_from_slice(&key_tag.to_be_bytes());
                buf.push(*algorithm);
                buf.extend_from_slice(certificate);
            }
            Self::Unknown(bytes) => buf.extend_from_slice(bytes),
        }
    }
}

fn read_name(view: &[u8], cur: &mut Cursor<'_>) -> Result<Name, ProtoError> {
    let (name, used) = Name::from_wire(view, cur.position())?;
    cur.advance(used)?;
    Ok(name)
}

fn read_char_string(cur: &mut Cursor<'_>) -> Result<Vec<u8>, ProtoError> {
    let len = usize::from(cur.read_u8()?);
    Ok(cur.read_bytes(len)?.to_vec())
}

fn write_char_string(buf: &mut Vec<u8>, bytes: &[u8]) {
    debug_assert!(bytes.len() <= 255);
    buf.push(bytes.len() as u8);
    buf.extend_from_slice(bytes);
}

fn read_rest(cur: &mut Cursor<'_>, end: usize) -> Result<Vec<u8>, ProtoError> {
    let len = end.saturating_sub(cur.position());
    Ok(cur.read_bytes(len)?.to_vec())
}

fn read_svc(
    view: &[u8],
    cur: &mut Cursor<'_>,
    end: usize,
) -> Result<(u16, Name, Vec<u8>), ProtoError> {
    let priority = cur.read_u16()?;
    let target = read_name(view, cur)?;
    let params = read_rest(cur, end)?;
    Ok((priority, target, params))
}

fn read_tlsa(cur: &mut Cursor<'_>, end: usize) -> Result<(u8, u8, u8, Vec<u8>), ProtoError> {
    let usage = cur.read_u8()?;
    let selector = cur.read_u8()?;
    let matching_type = cur.read_u8()?;
    let certificate = read_rest(cur, end)?;
    Ok((usage, selector, matching_type, certificate))
}
