// =============================================================================
// IPC Broker — three-channel local bus over Unix-domain sockets
// =============================================================================
//
// `tokio::net::UnixListener`/`UnixStream` come for free with the `full`
// feature already pulled in for the WS/REST stack, so this stays on tokio
// rather than reaching for a dedicated IPC crate.
//
// Per-connection handling follows the same `tokio::select!` push/recv shape
// used for the WS connections: one task per connection, concurrently
// pushing outbound frames and draining inbound ones.
// =============================================================================

pub mod market_channel;
pub mod order_channel;
pub mod report_channel;

pub use market_channel::MarketChannel;
pub use order_channel::OrderChannel;
pub use report_channel::ReportChannel;
