//! The request pipeline: cache, then local records, then upstream.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, Instant};
use tracing::{debug, error};

use crate::cache::{cache_key, ResponseCache};
use crate::dns::{Message, Rcode, RecordType};
use crate::local::LocalAuthority;
use crate::stats::Stats;
use crate::upstream::Forwarder;

/// Wall-clock budget for one request, upstream resolution included.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Default TTL for responses with an empty answer section.
const EMPTY_ANSWER_TTL: Duration = Duration::from_secs(300);

/// Bounds applied to the minimum answer TTL before caching.
const MIN_CACHE_TTL: u32 = 60;
const MAX_CACHE_TTL: u32 = 3600;

/// Resolves queries through the cache, the local records and the upstream
/// forwarder, in that order.
pub struct QueryHandler {
    cache: Arc<dyn ResponseCache>,
    local: Arc<dyn LocalAuthority>,
    upstream: Arc<dyn Forwarder>,
    stats: Arc<Stats>,
}

impl QueryHandler {
    pub fn new(
        cache: Arc<dyn ResponseCache>,
        local: Arc<dyn LocalAuthority>,
        upstream: Arc<dyn Forwarder>,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            cache,
            local,
            upstream,
            stats,
        }
    }

    /// Produces the response for `query`.
    ///
    /// Only the first question is resolved; no common stub sends more than
    /// one, and any extra questions are echoed back unanswered. Cached and
    /// resolved responses keep the flags of whichever tier produced them,
    /// with only the id rewritten to match the client.
    pub async fn handle(&self, query: &Message) -> Message {
        let deadline = Instant::now() + REQUEST_TIMEOUT;

        let mut reply = Message::reply_to(query);
        reply.header.set_recursion_available(true);

        let Some(question) = query.questions.first() else {
            self.stats.record_rejected();
            reply.set_rcode(Rcode::FormErr);
            return reply;
        };

        if !is_supported(question.rtype) {
            debug!(question = %question.name, qtype = %question.rtype, "unsupported query type");
            self.stats.record_rejected();
            reply.set_rcode(Rcode::NotImp);
            return reply;
        }

        let key = cache_key(question);

        if let Some(mut cached) = self.cache.get(&key) {
            debug!(question = %question.name, qtype = %question.rtype, "cache hit");
            self.stats.record_cache_hit();
            cached.set_id(query.id());
            return cached;
        }

        if let Some(mut local) = self.local.resolve(question) {
            debug!(question = %question.name, qtype = %question.rtype, "local record resolved");
            self.stats.record_local_hit();
            local.set_id(query.id());
            let ttl = response_ttl(&local);
            if !ttl.is_zero() {
                self.cache.set(&key, &local, ttl);
            }
            return local;
        }

        debug!(question = %question.name, qtype = %question.rtype, "forwarding to upstream");
        let remaining = deadline.saturating_duration_since(Instant::now());
        match timeout(remaining, self.upstream.resolve(question)).await {
            Ok(Ok(mut response)) => {
                self.stats.record_forwarded();
                response.set_id(query.id());
                let ttl = response_ttl(&response);
                if !ttl.is_zero() {
                    self.cache.set(&key, &response, ttl);
                }
                response
            }
            Ok(Err(error)) => {
                error!(question = %question.name, qtype = %question.rtype, error = %error, "upstream resolution failed");
                self.stats.record_failure();
                reply.set_rcode(Rcode::ServFail);
                reply
            }
            Err(_) => {
                error!(question = %question.name, qtype = %question.rtype, "request deadline exceeded");
                self.stats.record_failure();
                reply.set_rcode(Rcode::ServFail);
                reply
            }
        }
    }
}

/// The query types this server answers.
pub fn is_supported(rtype: RecordType) -> bool {
    matches!(
        rtype,
        RecordType::A
            | RecordType::AAAA
            | RecordType::CNAME
            | RecordType::MX
            | RecordType::TXT
            | RecordType::NS
            | RecordType::SOA
            | RecordType::PTR
            | RecordType::HTTPS
            | RecordType::CAA
            | RecordType::SRV
            | RecordType::SVCB
            | RecordType::DS
            | RecordType::DNSKEY
            | RecordType::URI
            | RecordType::NAPTR
            | RecordType::SSHFP
            | RecordType::TLSA
            | RecordType::SMIMEA
            | RecordType::CERT
    )
}

/// The TTL a response is cached under: the minimum answer TTL bounded to
/// [60, 3600] seconds, or 300 seconds when there are no answers (NXDOMAIN
/// and other negative responses).
pub fn response_ttl(response: &Message) -> Duration {
    if response.answers.is_empty() {
        return EMPTY_ANSWER_TTL;
    }
    let min = response
        .answers
        .iter()
        .map(|record| record.ttl)
        .fold(MAX_CACHE_TTL, u32::min);
    Duration::from_secs(u64::from(min.max(MIN_CACHE_TTL)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Header, Name, Question, RData, Record, RecordClass};
    use crate::upstream::ResolveError;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeCache {
        entries: Mutex<HashMap<String, (Message, Duration)>>,
    }

    impl ResponseCache for FakeCache {
        fn get(&self, key: &str) -> Option<Message> {
            self.entries.lock().get(key).map(|(msg, _)| msg.clone())
        }

        fn set(&self, key: &str, response: &Message, ttl: Duration) {
            self.entries
                .lock()
                .insert(key.to_string(), (response.clone(), ttl));
        }

        fn delete(&self, key: &str) {
            self.entries.lock().remove(key);
        }

        fn clear(&self) {
            self.entries.lock().clear();
        }

        fn len(&self) -> usize {
            self.entries.lock().len()
        }
    }

    impl FakeCache {
        fn ttl_of(&self, key: &str) -> Option<Duration> {
            self.entries.lock().get(key).map(|(_, ttl)| *ttl)
        }
    }

    struct NoLocal;

    impl LocalAuthority for NoLocal {
        fn resolve(&self, _question: &Question) -> Option<Message> {
            None
        }
    }

    struct FixedLocal(Message);

    impl LocalAuthority for FixedLocal {
        fn resolve(&self, _question: &Question) -> Option<Message> {
            Some(self.0.clone())
        }
    }

    struct FakeUpstream {
        response: Option<Message>,
        calls: AtomicUsize,
    }

    impl FakeUpstream {
        fn answering(response: Message) -> Self {
            Self {
                response: Some(response),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                response: None,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Forwarder for FakeUpstream {
        async fn resolve(&self, _question: &Question) -> Result<Message, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.response.clone().ok_or(ResolveError::AllServersFailed)
        }
    }

    fn handler(
        cache: Arc<FakeCache>,
        local: Arc<dyn LocalAuthority>,
        upstream: Arc<FakeUpstream>,
    ) -> QueryHandler {
        QueryHandler::new(cache, local, upstream, Arc::new(Stats::new()))
    }

    fn query(id: u16, name: &str, rtype: RecordType) -> Message {
        Message::query(id, Question::new(Name::parse(name).unwrap(), rtype))
    }

    fn answer(name: &str, ttl: u32) -> Message {
        let q = query(0, name, RecordType::A);
        let mut msg = Message::reply_to(&q);
        msg.answers.push(Record {
            name: Name::parse(name).unwrap(),
            rtype: RecordType::A,
            class: RecordClass::IN,
            ttl,
            rdata: RData::A("192.0.2.1".parse().unwrap()),
        });
        msg
    }

    #[tokio::test]
    async fn formerr_on_zero_questions() {
        let upstream = Arc::new(FakeUpstream::failing());
        let handler = handler(Arc::new(FakeCache::default()), Arc::new(NoLocal), upstream.clone());

        let empty = Message {
            header: Header { id: 9, flags: 0 },
            questions: Vec::new(),
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
        };
        let reply = handler.handle(&empty).await;

        assert_eq!(reply.rcode(), Rcode::FormErr);
        assert_eq!(reply.id(), 9);
        assert!(reply.header.is_response());
        assert!(reply.header.recursion_available());
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn notimp_on_unsupported_type() {
        let upstream = Arc::new(FakeUpstream::failing());
        let handler = handler(Arc::new(FakeCache::default()), Arc::new(NoLocal), upstream.clone());

        let q = query(7, "example.com", RecordType::Unknown(250));
        let reply = handler.handle(&q).await;

        assert_eq!(reply.rcode(), Rcode::NotImp);
        assert_eq!(reply.questions, q.questions);
        assert!(reply.answers.is_empty());
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cache_hit_skips_resolvers_and_rewrites_id() {
        let cache = Arc::new(FakeCache::default());
        let upstream = Arc::new(FakeUpstream::failing());
        let handler = handler(cache.clone(), Arc::new(NoLocal), upstream.clone());

        let mut cached = answer("hit.test", 120);
        cached.set_id(1);
        cache.set("hit.test.:A:IN", &cached, Duration::from_secs(60));

        let reply = handler.handle(&query(42, "hit.test", RecordType::A)).await;

        assert_eq!(reply.id(), 42);
        assert_eq!(reply.answers, cached.answers);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn local_hit_is_cached_and_id_rewritten() {
        let cache = Arc::new(FakeCache::default());
        let upstream = Arc::new(FakeUpstream::failing());
        let mut local = answer("local.test", 300);
        local.header.set_authoritative(true);
        let handler = handler(cache.clone(), Arc::new(FixedLocal(local)), upstream.clone());

        let reply = handler.handle(&query(5, "local.test", RecordType::A)).await;

        assert_eq!(reply.id(), 5);
        assert!(reply.header.authoritative());
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache.ttl_of("local.test.:A:IN"),
            Some(Duration::from_secs(300))
        );
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn upstream_answer_is_cached_with_clamped_ttl() {
        let cache = Arc::new(FakeCache::default());
        let upstream = Arc::new(FakeUpstream::answering(answer("up.test", 5)));
        let handler = handler(cache.clone(), Arc::new(NoLocal), upstream.clone());

        let reply = handler.handle(&query(3, "up.test", RecordType::A)).await;

        assert_eq!(reply.id(), 3);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.ttl_of("up.test.:A:IN"), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn upstream_failure_yields_servfail_and_no_cache_entry() {
        let cache = Arc::new(FakeCache::default());
        let upstream = Arc::new(FakeUpstream::failing());
        let handler = handler(cache.clone(), Arc::new(NoLocal), upstream.clone());

        let reply = handler.handle(&query(8, "down.test", RecordType::A)).await;

        assert_eq!(reply.rcode(), Rcode::ServFail);
        assert!(reply.answers.is_empty());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn nxdomain_is_propagated_and_cached() {
        let cache = Arc::new(FakeCache::default());
        let mut nxdomain = Message::reply_to(&query(0, "gone.test", RecordType::A));
        nxdomain.set_rcode(Rcode::NxDomain);
        let upstream = Arc::new(FakeUpstream::answering(nxdomain));
        let handler = handler(cache.clone(), Arc::new(NoLocal), upstream);

        let reply = handler.handle(&query(2, "gone.test", RecordType::A)).await;

        assert_eq!(reply.rcode(), Rcode::NxDomain);
        assert_eq!(
            cache.ttl_of("gone.test.:A:IN"),
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn supported_set_matches_served_types() {
        for rtype in [
            RecordType::A,
            RecordType::AAAA,
            RecordType::CNAME,
            RecordType::MX,
            RecordType::TXT,
            RecordType::NS,
            RecordType::SOA,
            RecordType::PTR,
            RecordType::HTTPS,
            RecordType::CAA,
            RecordType::SRV,
            RecordType::SVCB,
            RecordType::DS,
            RecordType::DNSKEY,
            RecordType::URI,
            RecordType::NAPTR,
            RecordType::SSHFP,
            RecordType::TLSA,
            RecordType::SMIMEA,
            RecordType::CERT,
        ] {
            assert!(is_supported(rtype), "{rtype} should be supported");
        }
        assert!(!is_supported(RecordType::Unknown(250)));
        assert!(!is_supported(RecordType::Unknown(255)));
    }

    #[test]
    fn ttl_rules() {
        let empty = Message::reply_to(&query(0, "x.test", RecordType::A));
        assert_eq!(response_ttl(&empty), Duration::from_secs(300));

        assert_eq!(response_ttl(&answer("x.test", 120)), Duration::from_secs(120));
        assert_eq!(response_ttl(&answer("x.test", 5)), Duration::from_secs(60));
        assert_eq!(response_ttl(&answer("x.test", 0)), Duration::from_secs(60));
        assert_eq!(
            response_ttl(&answer("x.test", 86400)),
            Duration::from_secs(3600)
        );

        let mut multi = answer("x.test", 500);
        multi.answers.push(Record {
            name: Name::parse("x.test").unwrap(),
            rtype: RecordType::A,
            class: RecordClass::IN,
            ttl: 90,
            rdata: RData::A("192.0.2.2".parse().unwrap()),
        });
        assert_eq!(response_ttl(&multi), Duration::from_secs(90));
    }
}
