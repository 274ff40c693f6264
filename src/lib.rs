#![deny(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

/*!
Test tooling for the DNS resolvers of RPC clients.

# Introduction

An RPC client resolving `srv-ipv4-single-target.grpctestingexp.` does more
than an address lookup. It also looks up

`_grpclb._tcp.srv-ipv4-single-target.grpctestingexp. SRV`

to find load balancers, and

`_grpc_config.srv-ipv4-single-target.grpctestingexp. TXT`

to find a service config, a JSON list of choices from which it picks one
based on its language, hostname and a random percentage.

`resolver-testbed` makes such resolvers testable without a real DNS zone:

- a [records config](records) describes a synthetic zone together with the
  names to resolve and what each should resolve to,
- a [`DnsServer`](server::DnsServer) serves that zone authoritatively over
  UDP and TCP on a local port,
- the [runner] starts a server, waits for it to answer a
  [health check](probe), and runs a resolver client once per test case,
- the built-in [resolver] and [expectations](expect) act as such a client.

```
use resolver_testbed::{records::RecordsConfig, runner::{run, RunnerConfig}};

let records = RecordsConfig::from_yaml_str(r#"
resolver_tests_common_zone_name: resolver-tests.grpctestingexp.
resolver_component_tests:
- record_to_resolve: ipv4-single-target
  expected_addrs:
  - {address: '1.2.3.4:443', is_balancer: false}
  expected_chosen_service_config: null
  expected_lb_policy: null
  records:
    ipv4-single-target:
    - {TTL: '2100', data: 1.2.3.4, type: A}
"#)?;
let report = run(&RunnerConfig::new(records))?;
assert_eq!(report.failures(), 0);
# Ok::<(), Box<dyn std::error::Error>>(())
```

The same records config also produces the [build data](gen) consumed by
other test harnesses and the records uploaded to a real zone, and the
[`interop`] module plans the grpclb fallback interop tests run in
containers.
*/

pub mod expect;
pub mod gen;
pub mod interop;
pub mod latency;
pub mod probe;
pub mod records;
pub mod resolver;
pub mod runner;
pub mod sanity;
pub mod server;
pub mod service_config;
pub mod zone;

mod record;
pub use record::{SrvRecord, SrvTarget};
