//! Security middleware components for request processing

pub mod body_limit;
pub mod chain;
pub mod clock;
pub mod cors;
pub mod headers;
pub mod hpp;
pub mod injection;
pub mod rate_limiter;
pub mod request;
pub mod sanitizer;
pub mod tree;

pub use body_limit::{BodyGuard, BodyGuardError, BodyKind, BodyLimitConfig, DecodedBody};
pub use chain::{
    Admitted, KeyFn, LimitHandler, RateLimitStage, Rejection, RejectionKind, SecurityChain,
    SecurityChainBuilder, Stage, Verdict,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use cors::{Cors, CorsConfig, CorsDecision, OriginPolicy, OriginPredicate, OriginPredicateError, OriginResolver};
pub use headers::{HeaderHardening, HeaderHardeningConfig};
pub use hpp::PollutionGuard;
pub use injection::{InjectionGuard, InjectionGuardConfig};
pub use rate_limiter::{
    KeyStrategy, Quota, RateLimitConfig, RateLimitError, RateLimitKey, RateLimitStatus, RateLimiter,
    TokenBucket, WindowQuota,
};
pub use request::{Principal, SanitizedInput, SecurityRequest};
pub use sanitizer::{Sanitizer, SanitizerOptions};
