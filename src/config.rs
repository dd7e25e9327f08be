// Identifier-space width in bits; the ring holds 2^BITS identifiers.
// Any value in 1..=32 works, 3 matches the demo rings.
pub const DEFAULT_BITS: u32 = 3;

// Where the name service listens unless overridden on the command line.
pub const DEFAULT_NS_HOST: &str = "127.0.0.1";
pub const DEFAULT_NS_PORT: u16 = 9090;

// Host a chord node binds its own HTTP server to (port is picked by the OS).
pub const DEFAULT_NODE_HOST: &str = "127.0.0.1";

pub const DEFAULT_CACHE_SIZE: usize = 10;

// Worker periods; each tick sleeps uniform(T - T/4, T + T/4) to avoid lock-step.
pub const STABILIZE_INTERVAL_MS: u64 = 1000;
pub const FIX_FINGERS_INTERVAL_MS: u64 = 1000;

// Upper bound on routed hops (lookups, key forwarding, finger-update walks).
pub const HOP_LIMIT: u32 = 64;

// Timeout applied to every outbound RPC.
pub const RPC_TIMEOUT_MS: u64 = 1000;
