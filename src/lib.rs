/// MySQL Audit Relay - a transparent TCP relay that audits MySQL client commands
///
/// This is the root crate that provides workspace-level documentation.
/// Actual implementation is in the subcrates:
/// - `audit-relay-core`: Buffer pool, command table, escaping and query events
/// - `audit-relay-proxy`: Relay engine, audit sinks and the `audit-relay` binary

/// Returns the version of the package.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
