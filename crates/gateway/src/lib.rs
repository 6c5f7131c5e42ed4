//! Gateway: HTTP surface over the connection core.
//!
//! Lifecycle:
//! 1. Load config, open the session store
//! 2. Build the connection manager, dispatcher and router
//! 3. Bind, print the banner, request the first initialization
//! 4. Serve until ctrl-c, then shut the connection down
//!
//! All connection logic lives in `relay-channel`; handlers here only
//! translate between HTTP and its operations.

pub mod server;
pub mod state;
