use super::user::SharedContext;

/// The active context of one request.
///
/// Created at the start of request handling and passed down explicitly.
/// Dropping it (or calling [`clear`](Self::clear)) releases the context, so
/// nothing survives into the next request.
#[derive(Debug, Default)]
pub struct RequestScope {
    active: Option<SharedContext>,
}

impl RequestScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&mut self, context: SharedContext) {
        self.active = Some(context);
    }

    /// The published context, unless it has since been wiped by the cache.
    pub fn active(&self) -> Option<&SharedContext> {
        self.active.as_ref().filter(|c| !c.is_cleared())
    }

    pub fn user(&self) -> Option<&str> {
        self.active().map(|c| c.user())
    }

    pub fn clear(&mut self) {
        self.active = None;
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_none()
    }
}
