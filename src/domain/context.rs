//! Immutable per-request attribute snapshot.

use std::collections::HashMap;

/// Snapshot of the attributes a [`crate::key::KeyResolver`] may draw on.
///
/// Built once per request by the adapter layer and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub client_ip: Option<String>,
    pub user_id: Option<String>,
    pub api_key: Option<String>,
    pub endpoint: Option<String>,
    pub method: Option<String>,
    attributes: HashMap<String, String>,
}

impl RequestContext {
    pub fn builder() -> RequestContextBuilder {
        RequestContextBuilder::default()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        match name {
            "client_ip" => self.client_ip.as_deref(),
            "user_id" => self.user_id.as_deref(),
            "api_key" => self.api_key.as_deref(),
            "endpoint" => self.endpoint.as_deref(),
            "method" => self.method.as_deref(),
            other => self.attributes.get(other).map(String::as_str),
        }
    }
}

#[derive(Debug, Default)]
pub struct RequestContextBuilder {
    inner: RequestContext,
}

impl RequestContextBuilder {
    pub fn client_ip(mut self, v: impl Into<String>) -> Self {
        self.inner.client_ip = Some(v.into());
        self
    }

    pub fn user_id(mut self, v: impl Into<String>) -> Self {
        self.inner.user_id = Some(v.into());
        self
    }

    pub fn api_key(mut self, v: impl Into<String>) -> Self {
        self.inner.api_key = Some(v.into());
        self
    }

    pub fn endpoint(mut self, v: impl Into<String>) -> Self {
        self.inner.endpoint = Some(v.into());
        self
    }

    pub fn method(mut self, v: impl Into<String>) -> Self {
        self.inner.method = Some(v.into());
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.attributes.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> RequestContext {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_known_attributes() {
        let ctx = RequestContext::builder()
            .client_ip("1.2.3.4")
            .user_id("u1")
            .build();
        assert_eq!(ctx.attribute("client_ip"), Some("1.2.3.4"));
        assert_eq!(ctx.attribute("user_id"), Some("u1"));
        assert_eq!(ctx.attribute("api_key"), None);
    }

    #[test]
    fn builder_sets_custom_attributes() {
        let ctx = RequestContext::builder()
            .attribute("tier", "premium")
            .build();
        assert_eq!(ctx.attribute("tier"), Some("premium"));
    }
}
