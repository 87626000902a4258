//! REST routes
//!
//! A route is a method plus a path template with named parameters. The
//! template (not the expanded path) identifies the rate limit bucket, together
//! with the route's major parameters.

use std::fmt;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl Method {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters that split a route into separate buckets
const MAJOR_PARAMETERS: [&str; 4] = ["channel_id", "guild_id", "webhook_id", "webhook_token"];

/// What a successful response body contains, for cache updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseKind {
    #[default]
    Opaque,
    User,
    Guild,
    Channel,
    Channels,
    Roles,
    Member,
    Message,
    Messages,
    /// Empty body; the route's `message_id` no longer exists
    DeletedMessage,
}

/// A REST route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    method: Method,
    template: &'static str,
    params: Vec<(&'static str, String)>,
    query: Vec<(String, String)>,
    returns: ResponseKind,
}

impl Route {
    /// Create a route from a method and path template such as `/channels/{channel_id}`
    #[must_use]
    pub fn new(method: Method, template: &'static str) -> Self {
        Self {
            method,
            template,
            params: Vec::new(),
            query: Vec::new(),
            returns: ResponseKind::Opaque,
        }
    }

    #[must_use]
    pub fn get(template: &'static str) -> Self {
        Self::new(Method::Get, template)
    }

    #[must_use]
    pub fn post(template: &'static str) -> Self {
        Self::new(Method::Post, template)
    }

    #[must_use]
    pub fn patch(template: &'static str) -> Self {
        Self::new(Method::Patch, template)
    }

    #[must_use]
    pub fn put(template: &'static str) -> Self {
        Self::new(Method::Put, template)
    }

    #[must_use]
    pub fn delete(template: &'static str) -> Self {
        Self::new(Method::Delete, template)
    }

    /// Bind a path parameter
    #[must_use]
    pub fn param(mut self, name: &'static str, value: impl fmt::Display) -> Self {
        self.params.push((name, value.to_string()));
        self
    }

    /// Append a query parameter
    #[must_use]
    pub fn query(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    /// Declare what the response body describes
    #[must_use]
    pub fn returns(mut self, kind: ResponseKind) -> Self {
        self.returns = kind;
        self
    }

    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[must_use]
    pub const fn template(&self) -> &'static str {
        self.template
    }

    #[must_use]
    pub const fn response_kind(&self) -> ResponseKind {
        self.returns
    }

    pub fn query_pairs(&self) -> &[(String, String)] {
        &self.query
    }

    /// Value bound to a parameter
    pub fn param_value(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Expanded path with parameters substituted
    #[must_use]
    pub fn path(&self) -> String {
        let mut path = self.template.to_string();
        for (name, value) in &self.params {
            path = path.replace(&format!("{{{name}}}"), value);
        }
        path
    }

    /// Major parameter values joined, or `-` for routes without any
    #[must_use]
    pub fn major_parameters(&self) -> String {
        let majors: Vec<&str> = MAJOR_PARAMETERS
            .iter()
            .filter_map(|name| self.param_value(name))
            .collect();
        if majors.is_empty() {
            "-".to_string()
        } else {
            majors.join(":")
        }
    }

    /// Method and template, e.g. `GET /channels/{channel_id}/messages`
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{} {}", self.method, self.template)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.template)
    }
}
