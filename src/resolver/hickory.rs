//! Lookups backed by [`hickory_resolver`].

use super::DnsLookup;
use crate::record::SrvTarget;
use async_trait::async_trait;
use hickory_resolver::{
    config::{LookupIpStrategy, NameServerConfig, ResolverConfig, ResolverOpts},
    name_server::{ConnectionProvider, TokioConnectionProvider},
    proto::xfer::Protocol,
    ResolveError, Resolver, TokioResolver,
};
use std::{
    net::{IpAddr, SocketAddr},
    time::Duration,
};

/// Unwraps a lookup, treating "no records" answers as an empty result.
fn records_or_empty<T>(result: Result<Vec<T>, ResolveError>) -> Result<Vec<T>, ResolveError> {
    match result {
        Err(e) if e.is_no_records_found() => Ok(Vec::new()),
        other => other,
    }
}

#[async_trait]
impl<P> DnsLookup for Resolver<P>
where
    P: ConnectionProvider,
{
    type Error = ResolveError;

    async fn lookup_ips(&self, host: &str) -> Result<Vec<IpAddr>, Self::Error> {
        records_or_empty(self.lookup_ip(host).await.map(|lookup| lookup.iter().collect()))
    }

    async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvTarget>, Self::Error> {
        records_or_empty(self.srv_lookup(name).await.map(|lookup| {
            lookup
                .iter()
                .map(|srv| SrvTarget {
                    priority: srv.priority(),
                    weight: srv.weight(),
                    port: srv.port(),
                    target: srv.target().to_utf8(),
                })
                .collect()
        }))
    }

    async fn lookup_txt(&self, name: &str) -> Result<Vec<Vec<Vec<u8>>>, Self::Error> {
        records_or_empty(self.txt_lookup(name).await.map(|lookup| {
            lookup
                .iter()
                .map(|txt| txt.txt_data().iter().map(|s| s.to_vec()).collect())
                .collect()
        }))
    }
}

/// Builds a resolver that sends every query to `server`, over UDP first and
/// TCP when answers are truncated.
///
/// Search domains are disabled and names are treated as fully qualified, so
/// lookups hit exactly the names a test asks for. Address lookups always ask
/// for both A and AAAA records.
pub fn resolver_for(server: SocketAddr) -> TokioResolver {
    let mut config = ResolverConfig::new();
    config.add_name_server(NameServerConfig::new(server, Protocol::Udp));
    config.add_name_server(NameServerConfig::new(server, Protocol::Tcp));

    let mut opts = ResolverOpts::default();
    opts.ndots = 0;
    opts.ip_strategy = LookupIpStrategy::Ipv4AndIpv6;
    opts.cache_size = 0;
    opts.attempts = 2;
    opts.timeout = Duration::from_secs(2);

    Resolver::builder_with_config(config, TokioConnectionProvider::default())
        .with_options(opts)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        records::{RecordKind, RecordSpec, RecordsConfig, TestGroup},
        server::DnsServer,
        zone::Zone,
    };

    fn zone() -> Zone {
        let mut group = TestGroup::default();
        group.records.insert(
            String::from("srv-ipv6-single-target"),
            vec![RecordSpec::new(RecordKind::Aaaa, "2607:f8b0:400a:801::1001", 2100)],
        );
        group.records.insert(
            String::from("_grpclb._tcp.srv-ipv6-single-target"),
            vec![RecordSpec::new(RecordKind::Srv, "0 0 1234 srv-ipv6-single-target", 2100)],
        );
        group.records.insert(
            String::from("ipv4-ipv6-dual-stack"),
            vec![
                RecordSpec::new(RecordKind::A, "1.2.3.4", 2100),
                RecordSpec::new(RecordKind::Aaaa, "2607:f8b0:400a:801::1001", 2100),
            ],
        );
        group.records.insert(
            String::from("_grpc_config.srv-ipv6-single-target"),
            vec![RecordSpec::new(RecordKind::Txt, "z".repeat(600), 2100)],
        );
        Zone::from_config(&RecordsConfig {
            common_zone_name: String::from("resolver-tests.grpctestingexp."),
            test_groups: vec![group],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn looks_up_every_record_type() {
        let server = DnsServer::spawn(zone(), "127.0.0.1:0".parse().unwrap()).unwrap();
        let resolver = resolver_for(server.local_addr());

        let ips = resolver
            .lookup_ips("srv-ipv6-single-target.resolver-tests.grpctestingexp.")
            .await
            .unwrap();
        assert_eq!(ips, vec!["2607:f8b0:400a:801::1001".parse::<IpAddr>().unwrap()]);

        let srv = resolver
            .lookup_srv("_grpclb._tcp.srv-ipv6-single-target.resolver-tests.grpctestingexp.")
            .await
            .unwrap();
        assert_eq!(srv.len(), 1);
        assert_eq!(srv[0].port, 1234);
        assert_eq!(
            srv[0].target,
            "srv-ipv6-single-target.resolver-tests.grpctestingexp."
        );

        // Too large for UDP, so this goes through the TCP fallback
        let txt = resolver
            .lookup_txt("_grpc_config.srv-ipv6-single-target.resolver-tests.grpctestingexp.")
            .await
            .unwrap();
        assert_eq!(txt.len(), 1);
        assert_eq!(txt[0].concat(), "z".repeat(600).into_bytes());
    }

    #[tokio::test]
    async fn missing_records_are_empty() {
        let server = DnsServer::spawn(zone(), "127.0.0.1:0".parse().unwrap()).unwrap();
        let resolver = resolver_for(server.local_addr());

        let srv = resolver
            .lookup_srv("_grpclb._tcp.nowhere.resolver-tests.grpctestingexp.")
            .await
            .unwrap();
        assert!(srv.is_empty());
        let txt = resolver
            .lookup_txt("srv-ipv6-single-target.resolver-tests.grpctestingexp.")
            .await
            .unwrap();
        assert!(txt.is_empty());
    }

    #[tokio::test]
    async fn dual_stack_hosts_resolve_to_both_families() {
        use crate::resolver::{resolve_target, ResolveOptions, ResolvedAddress};

        let server = DnsServer::spawn(zone(), "127.0.0.1:0".parse().unwrap()).unwrap();
        let resolver = resolver_for(server.local_addr());

        let mut ips = resolver
            .lookup_ips("ipv4-ipv6-dual-stack.resolver-tests.grpctestingexp.")
            .await
            .unwrap();
        ips.sort();
        assert_eq!(
            ips,
            vec![
                "1.2.3.4".parse::<IpAddr>().unwrap(),
                "2607:f8b0:400a:801::1001".parse::<IpAddr>().unwrap(),
            ]
        );

        let resolution = resolve_target(
            &resolver,
            "ipv4-ipv6-dual-stack.resolver-tests.grpctestingexp.",
            &ResolveOptions::default(),
        )
        .await
        .unwrap();
        let mut addresses = resolution.addresses;
        addresses.sort();
        assert_eq!(
            addresses,
            vec![
                ResolvedAddress {
                    addr: "1.2.3.4:443".parse().unwrap(),
                    is_balancer: false,
                },
                ResolvedAddress {
                    addr: "[2607:f8b0:400a:801::1001]:443".parse().unwrap(),
                    is_balancer: false,
                },
            ]
        );
    }
}
