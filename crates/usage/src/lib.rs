//! Usage extraction from streamed or whole-body Anthropic responses,
//! plus the streaming tee that keeps analytics off the client's
//! critical path.

mod interceptor;
mod pricing;
mod sse;
mod tee;

pub use interceptor::{UsageInterceptor, UsageSnapshot};
pub use pricing::{cost_usd, pricing_for, ModelPricing};
pub use sse::{SseEvent, SseParser};
pub use tee::{tee, TeeReceiver, TeeSender};
