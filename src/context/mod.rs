//! Per-user public-key contexts: the cache that holds them, the resolver
//! that fills it, and the request scope that publishes one for a request.

mod cache;
mod resolver;
mod scope;
mod user;

pub use cache::ContextCache;
pub use resolver::{is_anonymous, Authenticator, StaticDirectory, UnimplementedDirectory, UserDirectory, ANONYMOUS_USER};
pub use scope::RequestScope;
pub use user::{is_sensitive_attribute, SharedContext, UserContext, SENSITIVE_ATTRIBUTE_MARKERS};
