/// Application-boundary error type. `bitswap-core` and `bitswap-testutil`
/// report typed, library-local errors via `thiserror`; this binary just
/// needs to print a failure and exit, so it collapses everything into
/// `anyhow::Error` at the edge.
pub type Error = anyhow::Error;
