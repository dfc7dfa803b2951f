//! DNS messages: header, questions, resource records.

use super::{Cursor, Name, ProtoError, RData, Rcode, RecordClass, RecordType};

/// Header flag masks.
pub mod flags {
    pub const QR: u16 = 0x8000;
    pub const AA: u16 = 0x0400;
    pub const TC: u16 = 0x0200;
    pub const RD: u16 = 0x0100;
    pub const RA: u16 = 0x0080;
}

/// Message header. Section counts are derived from the section vectors at
/// encoding time; the flags word is kept raw so unmodeled bits (AD, CD, Z)
/// survive a parse/encode round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Header {
    pub id: u16,
    pub flags: u16,
}

impl Header {
    pub fn is_response(&self) -> bool {
        self.flags & flags::QR != 0
    }

    pub fn set_response(&mut self, on: bool) {
        self.set_flag(flags::QR, on);
    }

    pub fn authoritative(&self) -> bool {
        self.flags & flags::AA != 0
    }

    pub fn set_authoritative(&mut self, on: bool) {
        self.set_flag(flags::AA, on);
    }

    pub fn truncated(&self) -> bool {
        self.flags & flags::TC != 0
    }

    pub fn recursion_desired(&self) -> bool {
        self.flags & flags::RD != 0
    }

    pub fn set_recursion_desired(&mut self, on: bool) {
        self.set_flag(flags::RD, on);
    }

    pub fn recursion_available(&self) -> bool {
        self.flags & flags::RA != 0
    }

    pub fn set_recursion_available(&mut self, on: bool) {
        self.set_flag(flags::RA, on);
    }

    pub fn opcode(&self) -> u8 {
        ((self.flags >> 11) & 0x0F) as u8
    }

    pub fn set_opcode(&mut self, opcode: u8) {
        self.flags = (self.flags & !(0x0F << 11)) | (u16::from(opcode & 0x0F) << 11);
    }

    pub fn rcode(&self) -> Rcode {
        Rcode::from_value((self.flags & 0x000F) as u8)
    }

    pub fn set_rcode(&mut self, rcode: Rcode) {
        self.flags = (self.flags & !0x000F) | u16::from(rcode.value() & 0x0F);
    }

    fn set_flag(&mut self, mask: u16, on: bool) {
        if on {
            self.flags |= mask;
        } else {
            self.flags &= !mask;
        }
    }
}

/// A question section entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: Name,
    pub rtype: RecordType,
    pub class: RecordClass,
}

impl Question {
    pub fn new(name: Name, rtype: RecordType) -> Self {
        Self {
            name,
            rtype,
            class: RecordClass::IN,
        }
    }

    fn parse(msg: &[u8], cur: &mut Cursor<'_>) -> Result<Self, ProtoError> {
        let (name, used) = Name::from_wire(msg, cur.position())?;
        cur.advance(used)?;
        Ok(Self {
            name,
            rtype: RecordType::from_value(cur.read_u16()?),
            class: RecordClass::from_value(cur.read_u16()?),
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        self.name.to_wire(buf);
        buf.extend_from_slice(&self.rtype.value().to_be_bytes());
        buf.extend_from_slice(&self.class.value().to_be_bytes());
    }
}

/// A resource record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: Name,
    pub rtype: RecordType,
    pub class: RecordClass,
    pub ttl: u32,
    pub rdata: RData,
}

impl Record {
    fn parse(msg: &[u8], cur: &mut Cursor<'_>) -> Result<Self, ProtoError> {
        let (name, used) = Name::from_wire(msg, cur.position())?;
        cur.advance(used)?;
        let rtype = RecordType::from_value(cur.read_u16()?);
        let class = RecordClass::from_value(cur.read_u16()?);
        let ttl = cur.read_u32()?;
        let rdlen = usize::from(cur.read_u16()?);
        let rdata = RData::parse(rtype, msg, cur.position(), rdlen)?;
        cur.advance(rdlen)?;
        Ok(Self {
            name,
            rtype,
            class,
            ttl,
            rdata,
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        self.name.to_wire(buf);
        buf.extend_from_slice(&self.rtype.value().to_be_bytes());
        buf.extend_from_slice(&self.class.value().to_be_bytes());
        buf.extend_from_slice(&self.ttl.to_be_bytes());
        let len_at = buf.len();
        buf.extend_from_slice(&[0, 0]);
        self.rdata.encode(buf);
        let rdlen = (buf.len() - len_at - 2) as u16;
        buf[len_at..len_at + 2].copy_from_slice(&rdlen.to_be_bytes());
    }
}

/// A DNS message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub additionals: Vec<Record>,
}

impl Message {
    /// A recursion-desired query carrying a single question.
    pub fn query(id: u16, question: Question) -> Self {
        let mut header = Header { id, flags: 0 };
        header.set_recursion_desired(true);
        Self {
            header,
            questions: vec![question],
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
        }
    }

    /// An empty response skeleton for `request`: id, opcode and RD echoed,
    /// question section copied, QR set, NOERROR.
    pub fn reply_to(request: &Message) -> Self {
        let mut header = Header {
            id: request.header.id,
            flags: 0,
        };
        header.set_response(true);
        header.set_opcode(request.header.opcode());
        header.set_recursion_desired(request.header.recursion_desired());
        Self {
            header,
            questions: request.questions.clone(),
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
        }
    }

    pub fn id(&self) -> u16 {
        self.header.id
    }

    pub fn set_id(&mut self, id: u16) {
        self.header.id = id;
    }

    pub fn rcode(&self) -> Rcode {
        self.header.rcode()
    }

    pub fn set_rcode(&mut self, rcode: Rcode) {
        self.header.set_rcode(rcode);
    }

    /// Decodes a message from wire format.
    pub fn from_wire(data: &[u8]) -> Result<Self, ProtoError> {
        let mut cur = Cursor::new(data);
        let id = cur.read_u16()?;
        let raw_flags = cur.read_u16()?;
        let qdcount = cur.read_u16()?;
        let ancount = cur.read_u16()?;
        let nscount = cur.read_u16()?;
        let arcount = cur.read_u16()?;

        let mut questions = Vec::new();
        for _ in 0..qdcount {
            questions.push(Question::parse(data, &mut cur)?);
        }
        let mut answers = Vec::new();
        for _ in 0..ancount {
            answers.push(Record::parse(data, &mut cur)?);
        }
        let mut authorities = Vec::new();
        for _ in 0..nscount {
            authorities.push(Record::parse(data, &mut cur)?);
        }
        let mut additionals = Vec::new();
        for _ in 0..arcount {
            additionals.push(Record::parse(data, &mut cur)?);
        }

        Ok(Self {
            header: Header {
                id,
                flags: raw_flags,
            },
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    /// Encodes to wire format. Names are written uncompressed.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(512);
        buf.extend_from_slice(&self.header.id.to_be_bytes());
        buf.extend_from_slice(&self.header.flags.to_be_bytes());
        buf.extend_from_slice(&(self.questions.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(self.answers.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(self.authorities.len() as u16).to_be_bytes());
        buf.extend_from_slice(&(self.additionals.len() as u16).to_be_bytes());
        for q in &self.questions {
            q.encode(&mut buf);
        }
        for section in [&self.answers, &self.authorities, &self.additionals] {
            for record in section {
                record.encode(&mut buf);
            }
        }
        buf
    }
}
