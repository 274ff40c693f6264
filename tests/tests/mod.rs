use crate::harness::TestConfig;

pub mod helpers;

/// Records to use for all tests unless otherwise specified.
static DEFAULT_RECORDS: &str = r#"
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
- record_to_resolve: ipv6-multi-target
  expected_addrs:
  - {address: '[2607:f8b0:400a:801::1001]:443', is_balancer: false}
  - {address: '[2607:f8b0:400a:801::1002]:443', is_balancer: false}
  expected_chosen_service_config: null
  expected_lb_policy: null
  records:
    ipv6-multi-target:
    - {TTL: '2100', data: '2607:f8b0:400a:801::1001', type: AAAA}
    - {TTL: '2100', data: '2607:f8b0:400a:801::1002', type: AAAA}
- record_to_resolve: srv-ipv4-single-target
  expected_addrs:
  - {address: '5.6.7.8:1234', is_balancer: true}
  expected_chosen_service_config: null
  expected_lb_policy: null
  records:
    _grpclb._tcp.srv-ipv4-single-target:
    - {TTL: '2100', data: 0 0 1234 balancer-for-srv-ipv4-single-target, type: SRV}
    balancer-for-srv-ipv4-single-target:
    - {TTL: '2100', data: 5.6.7.8, type: A}
- record_to_resolve: ipv4-config-with-round-robin
  expected_addrs:
  - {address: '1.2.3.5:443', is_balancer: false}
  expected_chosen_service_config: '{"loadBalancingPolicy":"round_robin"}'
  expected_lb_policy: round_robin
  records:
    ipv4-config-with-round-robin:
    - {TTL: '2100', data: 1.2.3.5, type: A}
    _grpc_config.ipv4-config-with-round-robin:
    - {TTL: '2100', data: 'grpc_config=[{"serviceConfig":{"loadBalancingPolicy":"round_robin"}}]', type: TXT}
"#;

/// Configuration to use for all tests unless otherwise specified.
static DEFAULT_TEST_CONFIG: TestConfig = TestConfig::new(DEFAULT_RECORDS);

mod test_check_subcommand;
mod test_query_subcommand;
mod test_run_client_subcommand;
mod test_runner_external;
mod test_runner_in_process;
mod test_sanity_check_subcommand;

pub use test_check_subcommand::TEST_CHECK_SUBCOMMAND;
pub use test_query_subcommand::TEST_QUERY_SUBCOMMAND;
pub use test_run_client_subcommand::TEST_RUN_CLIENT_SUBCOMMAND;
pub use test_runner_external::TEST_RUNNER_EXTERNAL;
pub use test_runner_in_process::TEST_RUNNER_IN_PROCESS;
pub use test_sanity_check_subcommand::TEST_SANITY_CHECK_SUBCOMMAND;
