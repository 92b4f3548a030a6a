//! Per-request context — the immutable request plus type-erased extensions.
//!
//! Pipeline stages never mutate the [`Request`]. Anything a stage derives from
//! it (the parsed query view, for example) is attached as an extension so
//! downstream stages can reuse it instead of parsing again.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use crate::Request;

/// Type-erased request extensions map, keyed by type.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value of the same type.
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Get a value from the extensions map
    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Remove a value from the extensions map
    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// Per-request context handed from stage to stage through the pipeline.
pub struct Context {
    request: Request,
    extensions: Extensions,
}

impl Context {
    /// Create a new context from a request
    pub fn new(request: Request) -> Self {
        Self {
            request,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Marker(u32);

    #[test]
    fn extensions_round_trip_by_type() {
        let mut ext = Extensions::new();
        ext.insert(Marker(7));
        ext.insert(Marker(8));
        assert_eq!(ext.get::<Marker>(), Some(&Marker(8)));
        assert_eq!(ext.remove::<Marker>(), Some(Marker(8)));
        assert!(ext.get::<Marker>().is_none());
    }

    #[test]
    fn context_exposes_request() {
        let raw = b"GET /graphql HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        let mut ctx = Context::new(req);
        ctx.extensions_mut().insert(Marker(1));
        assert_eq!(ctx.request().path(), "/graphql");
        assert!(ctx.extensions().get::<Marker>().is_some());
    }
}
