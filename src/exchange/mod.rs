// Resilient exchange plumbing shared by every adapter
//
// retry: bounded backoff + credential refresh around one vendor exchange
// sse: byte-stream framing for server-sent events
// accumulator: incremental frames -> one reconstructed logical turn

pub mod accumulator;
pub mod retry;
pub mod sse;

pub use accumulator::{CompletedStream, PartDelta, StreamAccumulator, StreamFrame};
pub use retry::{execute, CredentialRefresher, RetryPolicy};
pub use sse::{SseEvent, SseLineBuffer};
