pub mod band;
pub mod context;
pub mod rule;
pub mod ruleset;

pub use band::RateLimitBand;
pub use context::RequestContext;
pub use rule::RateLimitRule;
pub use ruleset::RateLimitRuleSet;
