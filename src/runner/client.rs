//! The resolver component test client: resolve one target against one DNS
//! server and compare the result with expectations.

use crate::{
    expect::{Expectations, Mismatches, ParseExpectationError},
    gen::TestCase,
    resolver::{hickory::resolver_for, resolve_target, Resolution, ResolveOptions, ResolveTargetError},
};
use hickory_resolver::ResolveError;
use std::{net::SocketAddr, time::Duration};

/// Errors produced by a resolver check.
#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    /// The expectations couldn't be parsed.
    #[error(transparent)]
    Expectations(#[from] ParseExpectationError),
    /// Resolution failed outright.
    #[error(transparent)]
    Resolve(#[from] ResolveTargetError<ResolveError>),
    /// Resolution succeeded with the wrong result.
    #[error("resolution of {target} did not match expectations: {mismatches}")]
    Mismatch {
        /// Name that was resolved.
        target: String,
        /// What differed.
        mismatches: Mismatches,
    },
    /// The async runtime couldn't be started.
    #[error("starting runtime: {0}")]
    Runtime(#[from] std::io::Error),
    /// Resolution didn't finish in time.
    #[error("resolution of {0} timed out")]
    Timeout(String),
}

/// Resolves `case.target_name` through the DNS server at `server` and checks
/// the outcome against the case's expectations.
pub async fn check_case(
    server: SocketAddr,
    case: &TestCase,
    options: &ResolveOptions,
    timeout: Duration,
) -> Result<Resolution, CheckError> {
    let expectations = Expectations::from_flags(
        &case.expected_addrs,
        &case.expected_chosen_service_config,
        &case.expected_lb_policy,
    )?;
    let resolver = resolver_for(server);
    let resolution = tokio::time::timeout(
        timeout,
        resolve_target(&resolver, &case.target_name, options),
    )
    .await
    .map_err(|_| CheckError::Timeout(case.target_name.clone()))??;

    #[cfg(feature = "log")]
    tracing::debug!(name = %case.target_name, ?resolution, "resolved");
    expectations
        .check(&resolution)
        .map_err(|mismatches| CheckError::Mismatch {
            target: case.target_name.clone(),
            mismatches,
        })?;
    Ok(resolution)
}

/// Runs [`check_case`] on a fresh single-threaded runtime.
pub fn check_case_blocking(
    server: SocketAddr,
    case: &TestCase,
    options: &ResolveOptions,
    timeout: Duration,
) -> Result<Resolution, CheckError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(check_case(server, case, options, timeout))
}
