//! rusty-transcode: workspace root.
//!
//! Runtime code lives in the member crates (`crates/tc-protocol`,
//! `crates/tc-test-utils`, `services/dispatcher`); this package exists to
//! host the cross-service integration suites under `tests/integration/`.
