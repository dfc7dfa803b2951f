//! Authoritative answers from statically configured records.
//!
//! The record table is built once at startup from the configuration and is
//! read-only afterwards. Lookup keys are lowercased domains as written in the
//! configuration; wildcard entries (`*.suffix`, or the bare `*.`) live in the
//! same per-type tables as exact entries.

use std::net::{Ipv4Addr, Ipv6Addr};

use data_encoding::{BASE64, HEXLOWER_PERMISSIVE};
use rustc_hash::FxHashMap;

use crate::config::{ConfigError, RecordsConfig};
use crate::dns::{Header, Message, Name, Question, RData, Record, RecordClass, RecordType};

/// TTL of every locally served answer.
const LOCAL_TTL: u32 = 300;

/// The local resolution seam the request handler consumes.
pub trait LocalAuthority: Send + Sync {
    /// Answers `question` from static records, or reports a miss.
    fn resolve(&self, question: &Question) -> Option<Message>;
}

#[derive(Debug, Clone)]
struct MxRecord {
    preference: u16,
    exchange: Name,
}

#[derive(Debug, Clone)]
struct SvcRecord {
    priority: u16,
    target: Name,
}

#[derive(Debug, Clone)]
struct CaaRecord {
    flag: u8,
    tag: String,
    value: String,
}

#[derive(Debug, Clone)]
struct SrvRecord {
    priority: u16,
    weight: u16,
    port: u16,
    target: Name,
}

#[derive(Debug, Clone)]
struct DsRecord {
    key_tag: u16,
    algorithm: u8,
    digest_type: u8,
    digest: Vec<u8>,
}

#[derive(Debug, Clone)]
struct DnskeyRecord {
    flags: u16,
    protocol: u8,
    algorithm: u8,
    public_key: Vec<u8>,
}

#[derive(Debug, Clone)]
struct UriRecord {
    priority: u16,
    weight: u16,
    target: String,
}

#[derive(Debug, Clone)]
struct NaptrRecord {
    order: u16,
    preference: u16,
    flags: String,
    service: String,
    regexp: String,
    replacement: Name,
}

#[derive(Debug, Clone)]
struct SshfpRecord {
    algorithm: u8,
    fingerprint_type: u8,
    fingerprint: Vec<u8>,
}

#[derive(Debug, Clone)]
struct TlsaRecord {
    usage: u8,
    selector: u8,
    matching_type: u8,
    certificate: Vec<u8>,
}

#[derive(Debug, Clone)]
struct CertRecord {
    cert_type: u16,
    key_tag: u16,
    algorithm: u8,
    certificate: Vec<u8>,
}

/// Validated, typed record tables, one map per record type.
#[derive(Debug, Default)]
pub struct RecordTable {
    a: FxHashMap<String, Ipv4Addr>,
    aaaa: FxHashMap<String, Ipv6Addr>,
    cname: FxHashMap<String, Name>,
    mx: FxHashMap<String, MxRecord>,
    txt: FxHashMap<String, String>,
    https: FxHashMap<String, SvcRecord>,
    svcb: FxHashMap<String, SvcRecord>,
    caa: FxHashMap<String, CaaRecord>,
    srv: FxHashMap<String, SrvRecord>,
    ds: FxHashMap<String, DsRecord>,
    dnskey: FxHashMap<String, DnskeyRecord>,
    uri: FxHashMap<String, UriRecord>,
    naptr: FxHashMap<String, NaptrRecord>,
    sshfp: FxHashMap<String, SshfpRecord>,
    tlsa: FxHashMap<String, TlsaRecord>,
    smimea: FxHashMap<String, TlsaRecord>,
    cert: FxHashMap<String, CertRecord>,
}

impl RecordTable {
    /// Builds the table from raw configuration, validating every entry.
    pub fn from_config(records: &RecordsConfig) -> Result<Self, ConfigError> {
        let mut table = Self::default();

        for (domain, ip) in &records.a {
            let key = record_key("A", domain)?;
            let addr = ip
                .parse::<Ipv4Addr>()
                .map_err(|_| invalid("A", domain, format!("{ip:?} is not an IPv4 address")))?;
            table.a.insert(key, addr);
        }

        for (domain, ip) in &records.aaaa {
            let key = record_key("AAAA", domain)?;
            let addr = ip
                .parse::<Ipv6Addr>()
                .map_err(|_| invalid("AAAA", domain, format!("{ip:?} is not an IPv6 address")))?;
            table.aaaa.insert(key, addr);
        }

        for (domain, target) in &records.cname {
            let key = record_key("CNAME", domain)?;
            let target = parse_target("CNAME", domain, target)?;
            table.cname.insert(key, target);
        }

        for (domain, mx) in &records.mx {
            let key = record_key("MX", domain)?;
            let exchange = parse_target("MX", domain, &mx.target)?;
            table.mx.insert(
                key,
                MxRecord {
                    preference: mx.priority,
                    exchange,
                },
            );
        }

        for (domain, text) in &records.txt {
            let key = record_key("TXT", domain)?;
            if text.len() > 255 {
                return Err(invalid("TXT", domain, "value exceeds 255 bytes"));
            }
            table.txt.insert(key, text.clone());
        }

        for (domain, svc) in &records.https {
            let key = record_key("HTTPS", domain)?;
            let target = parse_target("HTTPS", domain, &svc.target)?;
            table.https.insert(
                key,
                SvcRecord {
                    priority: svc.priority,
                    target,
                },
            );
        }

        for (domain, svc) in &records.svcb {
            let key = record_key("SVCB", domain)?;
            let target = parse_target("SVCB", domain, &svc.target)?;
            table.svcb.insert(
                key,
                SvcRecord {
                    priority: svc.priority,
                    target,
                },
            );
        }

        for (domain, caa) in &records.caa {
            let key = record_key("CAA", domain)?;
            if caa.tag.is_empty() || caa.tag.len() > 255 {
                return Err(invalid("CAA", domain, "tag must be 1-255 bytes"));
            }
            table.caa.insert(
                key,
                CaaRecord {
                    flag: caa.flag,
                    tag: caa.tag.clone(),
                    value: caa.value.clone(),
                },
            );
        }

        for (domain, srv) in &records.srv {
            let key = record_key("SRV", domain)?;
            let target = parse_target("SRV", domain, &srv.target)?;
            table.srv.insert(
                key,
                SrvRecord {
                    priority: srv.priority,
                    weight: srv.weight,
                    port: srv.port,
                    target,
                },
            );
        }

        for (domain, ds) in &records.ds {
            let key = record_key("DS", domain)?;
            table.ds.insert(
                key,
                DsRecord {
                    key_tag: ds.keytag,
                    algorithm: ds.algorithm,
                    digest_type: ds.digest_type,
                    digest: decode_hex("DS", domain, "digest", &ds.digest)?,
                },
            );
        }

        for (domain, dnskey) in &records.dnskey {
            let key = record_key("DNSKEY", domain)?;
            table.dnskey.insert(
                key,
                DnskeyRecord {
                    flags: dnskey.flags,
                    protocol: dnskey.protocol,
                    algorithm: dnskey.algorithm,
                    public_key: decode_base64("DNSKEY", domain, "public_key", &dnskey.public_key)?,
                },
            );
        }

        for (domain, uri) in &records.uri {
            let key = record_key("URI", domain)?;
            if uri.target.is_empty() {
                return Err(invalid("URI", domain, "target must not be empty"));
            }
            table.uri.insert(
                key,
                UriRecord {
                    priority: uri.priority,
                    weight: uri.weight,
                    target: uri.target.clone(),
                },
            );
        }

        for (domain, naptr) in &records.naptr {
            let key = record_key("NAPTR", domain)?;
            for (field, value) in [
                ("flags", &naptr.flags),
                ("service", &naptr.service),
                ("regexp", &naptr.regexp),
            ] {
                if value.len() > 255 {
                    return Err(invalid("NAPTR", domain, format!("{field} exceeds 255 bytes")));
                }
            }
            let replacement = if naptr.replacement.is_empty() {
                Name::root()
            } else {
                parse_target("NAPTR", domain, &naptr.replacement)?
            };
            table.naptr.insert(
                key,
                NaptrRecord {
                    order: naptr.order,
                    preference: naptr.preference,
                    flags: naptr.flags.clone(),
                    service: naptr.service.clone(),
                    regexp: naptr.regexp.clone(),
                    replacement,
                },
            );
        }

        for (domain, sshfp) in &records.sshfp {
            let key = record_key("SSHFP", domain)?;
            table.sshfp.insert(
                key,
                SshfpRecord {
                    algorithm: sshfp.algorithm,
                    fingerprint_type: sshfp.fingerprint_type,
                    fingerprint: decode_hex("SSHFP", domain, "fingerprint", &sshfp.fingerprint)?,
                },
            );
        }

        for (domain, tlsa) in &records.tlsa {
            let key = record_key("TLSA", domain)?;
            let record = tlsa_record("TLSA", domain, tlsa)?;
            table.tlsa.insert(key, record);
        }

        for (domain, smimea) in &records.smimea {
            let key = record_key("SMIMEA", domain)?;
            let record = tlsa_record("SMIMEA", domain, smimea)?;
            table.smimea.insert(key, record);
        }

        for (domain, cert) in &records.cert {
            let key = record_key("CERT", domain)?;
            table.cert.insert(
                key,
                CertRecord {
                    cert_type: cert.cert_type,
                    key_tag: cert.keytag,
                    algorithm: cert.algorithm,
                    certificate: decode_base64("CERT", domain, "certificate", &cert.certificate)?,
                },
            );
        }

        Ok(table)
    }

    fn lookup(&self, rtype: RecordType, key: &str) -> Option<RData> {
        match rtype {
            RecordType::A => self.a.get(key).map(|addr| RData::A(*addr)),
            RecordType::AAAA => self.aaaa.get(key).map(|addr| RData::AAAA(*addr)),
            RecordType::CNAME => self.cname.get(key).map(|t| RData::CNAME(t.clone())),
            RecordType::MX => self.mx.get(key).map(|mx| RData::MX {
                preference: mx.preference,
                exchange: mx.exchange.clone(),
            }),
            RecordType::TXT => self
                .txt
                .get(key)
                .map(|s| RData::TXT(vec![s.clone().into_bytes()])),
            RecordType::HTTPS => self.https.get(key).map(|svc| RData::HTTPS {
                priority: svc.priority,
                target: svc.target.clone(),
                params: Vec::new(),
            }),
            RecordType::SVCB => self.svcb.get(key).map(|svc| RData::SVCB {
                priority: svc.priority,
                target: svc.target.clone(),
                params: Vec::new(),
            }),
            RecordType::CAA => self.caa.get(key).map(|caa| RData::CAA {
                flag: caa.flag,
                tag: caa.tag.clone().into_bytes(),
                value: caa.value.clone().into_bytes(),
            }),
            RecordType::SRV => self.srv.get(key).map(|srv| RData::SRV {
                priority: srv.priority,
                weight: srv.weight,
                port: srv.port,
                target: srv.target.clone(),
            }),
            RecordType::DS => self.ds.get(key).map(|ds| RData::DS {
                key_tag: ds.key_tag,
                algorithm: ds.algorithm,
                digest_type: ds.digest_type,
                digest: ds.digest.clone(),
            }),
            RecordType::DNSKEY => self.dnskey.get(key).map(|k| RData::DNSKEY {
                flags: k.flags,
                protocol: k.protocol,
                algorithm: k.algorithm,
                public_key: k.public_key.clone(),
            }),
            RecordType::URI => self.uri.get(key).map(|uri| RData::URI {
                priority: uri.priority,
                weight: uri.weight,
                target: uri.target.clone().into_bytes(),
            }),
            RecordType::NAPTR => self.naptr.get(key).map(|n| RData::NAPTR {
                order: n.order,
                preference: n.preference,
                flags: n.flags.clone().into_bytes(),
                services: n.service.clone().into_bytes(),
                regexp: n.regexp.clone().into_bytes(),
                replacement: n.replacement.clone(),
            }),
            RecordType::SSHFP => self.sshfp.get(key).map(|s| RData::SSHFP {
                algorithm: s.algorithm,
                fingerprint_type: s.fingerprint_type,
                fingerprint: s.fingerprint.clone(),
            }),
            RecordType::TLSA => self.tlsa.get(key).map(|t| RData::TLSA {
                usage: t.usage,
                selector: t.selector,
                matching_type: t.matching_type,
                certificate: t.certificate.clone(),
            }),
            RecordType::SMIMEA => self.smimea.get(key).map(|t| RData::SMIMEA {
                usage: t.usage,
                selector: t.selector,
                matching_type: t.matching_type,
                certificate: t.certificate.clone(),
            }),
            RecordType::CERT => self.cert.get(key).map(|c| RData::CERT {
                cert_type: c.cert_type,
                key_tag: c.key_tag,
                algorithm: c.algorithm,
                certificate: c.certificate.clone(),
            }),
            _ => None,
        }
    }
}

/// Resolver over a static [`RecordTable`].
pub struct LocalResolver {
    records: RecordTable,
}

impl LocalResolver {
    pub fn new(records: RecordTable) -> Self {
        Self { records }
    }
}

impl LocalAuthority for LocalResolver {
    fn resolve(&self, question: &Question) -> Option<Message> {
        let domain = question.name.normalized();

        let rdata = self.records.lookup(question.rtype, &domain).or_else(|| {
            if !wildcard_supported(question.rtype) {
                return None;
            }
            wildcard_candidates(&domain)
                .into_iter()
                .find_map(|candidate| self.records.lookup(question.rtype, &candidate))
        })?;

        Some(build_reply(question, rdata))
    }
}

/// Wildcard fallback only applies to the basic record types.
fn wildcard_supported(rtype: RecordType) -> bool {
    matches!(
        rtype,
        RecordType::A | RecordType::AAAA | RecordType::CNAME | RecordType::MX | RecordType::TXT
    )
}

/// Candidate wildcard keys for `domain`, dropping one leading label at a
/// time: `a.b.c` yields `*.b.c`, `*.c` and finally the bare `*.`.
fn wildcard_candidates(domain: &str) -> Vec<String> {
    let labels: Vec<&str> = domain.split('.').collect();
    (0..labels.len())
        .map(|i| format!("*.{}", labels[i + 1..].join(".")))
        .collect()
}

/// An authoritative single-answer reply. The owner name is the question name
/// verbatim, so wildcard answers already carry the queried name. The id is
/// left at zero for the handler to overwrite.
fn build_reply(question: &Question, rdata: RData) -> Message {
    let mut header = Header::default();
    header.set_response(true);
    header.set_authoritative(true);
    Message {
        header,
        questions: vec![question.clone()],
        answers: vec![Record {
            name: question.name.clone(),
            rtype: question.rtype,
            class: RecordClass::IN,
            ttl: LOCAL_TTL,
            rdata,
        }],
        authorities: Vec::new(),
        additionals: Vec::new(),
    }
}

fn invalid(rtype: &'static str, domain: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidRecord {
        rtype,
        domain: domain.to_string(),
        reason: reason.into(),
    }
}

/// Lookup key for a configured domain: lowercased, otherwise as written.
fn record_key(rtype: &'static str, domain: &str) -> Result<String, ConfigError> {
    if !is_valid_domain(domain) {
        return Err(invalid(rtype, domain, "invalid domain name"));
    }
    Ok(domain.to_ascii_lowercase())
}

fn is_valid_domain(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }
    let trimmed = domain.strip_suffix('.').unwrap_or(domain);
    if trimmed.is_empty() {
        return false;
    }
    trimmed
        .split('.')
        .all(|label| !label.is_empty() && label.len() <= 63)
}

/// Target names are canonicalized to fully qualified form; a missing trailing
/// dot is appended.
fn parse_target(rtype: &'static str, domain: &str, target: &str) -> Result<Name, ConfigError> {
    Name::parse(target).map_err(|_| invalid(rtype, domain, format!("invalid target {target:?}")))
}

fn decode_hex(
    rtype: &'static str,
    domain: &str,
    field: &str,
    value: &str,
) -> Result<Vec<u8>, ConfigError> {
    HEXLOWER_PERMISSIVE
        .decode(value.as_bytes())
        .map_err(|_| invalid(rtype, domain, format!("{field} is not valid hex")))
}

fn decode_base64(
    rtype: &'static str,
    domain: &str,
    field: &str,
    value: &str,
) -> Result<Vec<u8>, ConfigError> {
    BASE64
        .decode(value.as_bytes())
        .map_err(|_| invalid(rtype, domain, format!("{field} is not valid base64")))
}

fn tlsa_record(
    rtype: &'static str,
    domain: &str,
    value: &crate::config::TlsaValue,
) -> Result<TlsaRecord, ConfigError> {
    Ok(TlsaRecord {
        usage: value.usage,
        selector: value.selector,
        matching_type: value.matching_type,
        certificate: decode_hex(rtype, domain, "certificate", &value.certificate)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MxValue, TlsaValue};
    use crate::dns::Rcode;

    fn resolver(records: RecordsConfig) -> LocalResolver {
        LocalResolver::new(RecordTable::from_config(&records).unwrap())
    }

    fn question(name: &str, rtype: RecordType) -> Question {
        Question::new(Name::parse(name).unwrap(), rtype)
    }

    #[test]
    fn exact_a_match() {
        let mut records = RecordsConfig::default();
        records.a.insert("local.test".into(), "10.0.0.1".into());
        let resolver = resolver(records);

        let msg = resolver.resolve(&question("local.test", RecordType::A)).unwrap();
        assert_eq!(msg.rcode(), Rcode::NoError);
        assert!(msg.header.authoritative());
        assert!(!msg.header.recursion_available());
        assert_eq!(msg.answers.len(), 1);

        let answer = &msg.answers[0];
        assert_eq!(answer.name.as_str(), "local.test.");
        assert_eq!(answer.class, RecordClass::IN);
        assert_eq!(answer.ttl, 300);
        assert_eq!(answer.rdata, RData::A("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let mut records = RecordsConfig::default();
        records.a.insert("MyHost.Test".into(), "10.0.0.2".into());
        let resolver = resolver(records);

        let msg = resolver.resolve(&question("myhost.TEST", RecordType::A)).unwrap();
        assert_eq!(msg.answers[0].name.as_str(), "myhost.TEST.");
    }

    #[test]
    fn miss_reports_none() {
        let resolver = resolver(RecordsConfig::default());
        assert!(resolver.resolve(&question("nope.test", RecordType::A)).is_none());
    }

    #[test]
    fn type_tables_are_independent() {
        let mut records = RecordsConfig::default();
        records.a.insert("local.test".into(), "10.0.0.1".into());
        let resolver = resolver(records);
        assert!(resolver.resolve(&question("local.test", RecordType::TXT)).is_none());
    }

    #[test]
    fn wildcard_matches_and_rewrites_owner() {
        let mut records = RecordsConfig::default();
        records.a.insert("*.example".into(), "192.0.2.7".into());
        let resolver = resolver(records);

        let msg = resolver.resolve(&question("foo.example", RecordType::A)).unwrap();
        assert_eq!(msg.answers[0].name.as_str(), "foo.example.");
        assert_eq!(msg.answers[0].rdata, RData::A("192.0.2.7".parse().unwrap()));

        let msg = resolver
            .resolve(&question("deep.foo.example", RecordType::A))
            .unwrap();
        assert_eq!(msg.answers[0].name.as_str(), "deep.foo.example.");
        assert_eq!(msg.answers[0].rdata, RData::A("192.0.2.7".parse().unwrap()));
    }

    #[test]
    fn exact_match_wins_over_wildcard() {
        let mut records = RecordsConfig::default();
        records.a.insert("*.example".into(), "192.0.2.7".into());
        records.a.insert("foo.example".into(), "10.9.9.9".into());
        let resolver = resolver(records);

        let msg = resolver.resolve(&question("foo.example", RecordType::A)).unwrap();
        assert_eq!(msg.answers[0].rdata, RData::A("10.9.9.9".parse().unwrap()));
    }

    #[test]
    fn bare_wildcard_matches_everything() {
        let mut records = RecordsConfig::default();
        records.txt.insert("*.".into(), "fallback".into());
        let resolver = resolver(records);

        let msg = resolver.resolve(&question("anything.at.all", RecordType::TXT)).unwrap();
        assert_eq!(msg.answers[0].rdata, RData::TXT(vec![b"fallback".to_vec()]));
    }

    #[test]
    fn wildcard_skipped_for_non_basic_types() {
        let mut records = RecordsConfig::default();
        records.caa.insert(
            "*.example".into(),
            crate::config::CaaValue {
                flag: 0,
                tag: "issue".into(),
                value: "ca.test".into(),
            },
        );
        let resolver = resolver(records);
        assert!(resolver.resolve(&question("foo.example", RecordType::CAA)).is_none());
    }

    #[test]
    fn cname_target_gets_trailing_dot() {
        let mut records = RecordsConfig::default();
        records
            .cname
            .insert("www.test".into(), "canonical.test".into());
        let resolver = resolver(records);

        let msg = resolver.resolve(&question("www.test", RecordType::CNAME)).unwrap();
        assert_eq!(
            msg.answers[0].rdata,
            RData::CNAME(Name::parse("canonical.test.").unwrap())
        );
    }

    #[test]
    fn mx_answer_carries_priority_and_target() {
        let mut records = RecordsConfig::default();
        records.mx.insert(
            "test".into(),
            MxValue {
                priority: 10,
                target: "mail.test".into(),
            },
        );
        let resolver = resolver(records);

        let msg = resolver.resolve(&question("test", RecordType::MX)).unwrap();
        assert_eq!(
            msg.answers[0].rdata,
            RData::MX {
                preference: 10,
                exchange: Name::parse("mail.test").unwrap(),
            }
        );
    }

    #[test]
    fn tlsa_certificate_is_hex_decoded() {
        let mut records = RecordsConfig::default();
        records.tlsa.insert(
            "_443._tcp.test".into(),
            TlsaValue {
                usage: 3,
                selector: 1,
                matching_type: 1,
                certificate: "DEADbeef".into(),
            },
        );
        let resolver = resolver(records);

        let msg = resolver
            .resolve(&question("_443._tcp.test", RecordType::TLSA))
            .unwrap();
        assert_eq!(
            msg.answers[0].rdata,
            RData::TLSA {
                usage: 3,
                selector: 1,
                matching_type: 1,
                certificate: vec![0xDE, 0xAD, 0xBE, 0xEF],
            }
        );
    }

    #[test]
    fn invalid_a_address_rejected() {
        let mut records = RecordsConfig::default();
        records.a.insert("local.test".into(), "not-an-ip".into());
        assert!(RecordTable::from_config(&records).is_err());
    }

    #[test]
    fn ipv4_string_is_not_an_aaaa_value() {
        let mut records = RecordsConfig::default();
        records.aaaa.insert("local.test".into(), "10.0.0.1".into());
        assert!(RecordTable::from_config(&records).is_err());
    }

    #[test]
    fn invalid_cname_target_rejected() {
        let mut records = RecordsConfig::default();
        records.cname.insert("www.test".into(), "bad..target".into());
        assert!(RecordTable::from_config(&records).is_err());
    }

    #[test]
    fn invalid_domain_key_rejected() {
        let mut records = RecordsConfig::default();
        records
            .a
            .insert(format!("{}.test", "x".repeat(64)), "10.0.0.1".into());
        assert!(RecordTable::from_config(&records).is_err());
    }

    #[test]
    fn oversized_txt_rejected() {
        let mut records = RecordsConfig::default();
        records.txt.insert("test".into(), "x".repeat(256));
        assert!(RecordTable::from_config(&records).is_err());
    }

    #[test]
    fn bad_hex_digest_rejected() {
        let mut records = RecordsConfig::default();
        records.ds.insert(
            "test".into(),
            crate::config::DsValue {
                keytag: 1,
                algorithm: 8,
                digest_type: 2,
                digest: "zzzz".into(),
            },
        );
        assert!(RecordTable::from_config(&records).is_err());
    }
}
