//! Method registry: services built from typed handler closures.
//!
//! A [`Service`] is the set of remotely callable methods published under one
//! name. Handlers are registered through [`ServiceBuilder`] with the shape
//!
//! ```text
//! Fn(A, &mut R) -> Result<(), MethodError>
//! ```
//!
//! where `A` is the decoded argument and `R` the reply slot, created fresh
//! via `R::default()` for every invocation (so sequence and map replies
//! start empty and the handler can assign into them directly). At build
//! time each handler is erased into a per-method invoke slot that performs
//! decode-argument, allocate-reply, invoke, encode-reply against whatever
//! [`Encoding`] the connection negotiated.
//!
//! Service and method names must be exported: the wire convention reserves
//! names with a leading uppercase letter for remotely callable entries.
//!
//! # Example
//!
//! ```ignore
//! use seqwire::{MethodError, Service};
//!
//! let service = Service::builder("Foo")
//!     .method("Uppercase", |s: String, reply: &mut String| {
//!         *reply = s.to_uppercase();
//!         Ok(())
//!     })
//!     .build()?;
//! ```

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::codec::Encoding;
use crate::error::{MethodError, Result, RpcError};

type InvokeFn = Box<dyn Fn(Encoding, &[u8]) -> Result<Vec<u8>> + Send + Sync>;

/// One callable method: its name, the static types it decodes and encodes,
/// and the erased invoke slot installed at registration.
pub struct MethodDescriptor {
    name: String,
    arg_type: &'static str,
    reply_type: &'static str,
    invoke: InvokeFn,
}

impl MethodDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Type name of the argument the body decodes into.
    pub fn arg_type(&self) -> &'static str {
        self.arg_type
    }

    /// Type name of the reply slot.
    pub fn reply_type(&self) -> &'static str {
        self.reply_type
    }

    /// Decode the argument from `body`, run the handler on a fresh reply
    /// slot, and encode the slot.
    pub fn call(&self, encoding: Encoding, body: &[u8]) -> Result<Vec<u8>> {
        (self.invoke)(encoding, body)
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("arg_type", &self.arg_type)
            .field("reply_type", &self.reply_type)
            .finish_non_exhaustive()
    }
}

/// The set of remotely callable methods registered under one service name.
pub struct Service {
    name: String,
    methods: HashMap<String, MethodDescriptor>,
}

impl Service {
    /// Start building a service named `name`.
    pub fn builder(name: impl Into<String>) -> ServiceBuilder {
        ServiceBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up one method descriptor.
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.get(name)
    }

    /// Names of every registered method.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Dispatch `method` against `body`.
    pub fn call(&self, method: &str, encoding: Encoding, body: &[u8]) -> Result<Vec<u8>> {
        match self.methods.get(method) {
            Some(descriptor) => descriptor.call(encoding, body),
            None => Err(RpcError::MethodNotFound(method.to_string())),
        }
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder collecting typed method handlers for one service.
///
/// Name validation errors are deferred: the first offense is remembered and
/// surfaced by [`ServiceBuilder::build`], so registration chains stay fluent.
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, MethodDescriptor>,
    error: Option<RpcError>,
}

impl ServiceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
            error: None,
        }
    }

    /// Register a method handler.
    ///
    /// The handler receives the decoded argument and a mutable reply slot;
    /// returning `Err` surfaces the message in the response header's
    /// `Error` field.
    pub fn method<A, R, F>(mut self, name: &str, handler: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        R: Serialize + Default + Send + 'static,
        F: Fn(A, &mut R) -> std::result::Result<(), MethodError> + Send + Sync + 'static,
    {
        if self.error.is_some() {
            return self;
        }
        if !is_exported(name) {
            self.error = Some(RpcError::NameNotExported(name.to_string()));
            return self;
        }
        if self.methods.contains_key(name) {
            self.error = Some(RpcError::DuplicateMethod(name.to_string()));
            return self;
        }

        let invoke: InvokeFn = Box::new(move |encoding, body| {
            let arg: A = encoding.decode(body)?;
            let mut reply = R::default();
            handler(arg, &mut reply)?;
            encoding.encode(&reply)
        });
        self.methods.insert(
            name.to_string(),
            MethodDescriptor {
                name: name.to_string(),
                arg_type: std::any::type_name::<A>(),
                reply_type: std::any::type_name::<R>(),
                invoke,
            },
        );
        self
    }

    /// Validate names and produce the service.
    pub fn build(self) -> Result<Service> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if !is_exported(&self.name) {
            return Err(RpcError::NameNotExported(self.name));
        }
        for method in self.methods.keys() {
            debug!("rpc server: register {}.{}", self.name, method);
        }
        Ok(Service {
            name: self.name,
            methods: self.methods,
        })
    }
}

/// Exported per the wire convention: leading uppercase letter.
fn is_exported(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct SumArgs {
        num1: f32,
        num2: f32,
    }

    fn arith() -> Service {
        Service::builder("Arith")
            .method("Sum", |args: SumArgs, reply: &mut f32| {
                *reply = args.num1 + args.num2;
                Ok(())
            })
            .method("Div", |args: SumArgs, reply: &mut f32| {
                if args.num2 == 0.0 {
                    return Err(MethodError::new("divide by zero"));
                }
                *reply = args.num1 / args.num2;
                Ok(())
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_call_decodes_invokes_encodes() {
        let service = arith();
        let body = Encoding::MsgPack
            .encode(&SumArgs {
                num1: 10.24,
                num2: 5.12,
            })
            .unwrap();
        let reply = service.call("Sum", Encoding::MsgPack, &body).unwrap();
        let value: f32 = Encoding::MsgPack.decode(&reply).unwrap();
        assert!((value - 15.36).abs() < 1e-4);
    }

    #[test]
    fn test_handler_error_propagates() {
        let service = arith();
        let body = Encoding::MsgPack
            .encode(&SumArgs {
                num1: 1.0,
                num2: 0.0,
            })
            .unwrap();
        let err = service.call("Div", Encoding::MsgPack, &body).unwrap_err();
        assert_eq!(err.to_string(), "divide by zero");
    }

    #[test]
    fn test_unknown_method() {
        let err = arith()
            .call("DoesNotExist", Encoding::MsgPack, b"")
            .unwrap_err();
        assert!(matches!(err, RpcError::MethodNotFound(_)));
        assert!(err.to_string().contains("can't find method DoesNotExist"));
    }

    #[test]
    fn test_bad_body_is_a_decode_error() {
        let service = arith();
        let err = service
            .call("Sum", Encoding::MsgPack, b"\xc1garbage")
            .unwrap_err();
        assert!(matches!(err, RpcError::MsgPackDecode(_)));
    }

    #[test]
    fn test_reply_slot_starts_as_empty_container() {
        let service = Service::builder("Seq")
            .method("Range", |n: u32, reply: &mut Vec<u32>| {
                // Relies on the slot arriving empty.
                for i in 0..n {
                    reply.push(i);
                }
                Ok(())
            })
            .build()
            .unwrap();

        let body = Encoding::MsgPack.encode(&3u32).unwrap();
        let reply = service.call("Range", Encoding::MsgPack, &body).unwrap();
        let value: Vec<u32> = Encoding::MsgPack.decode(&reply).unwrap();
        assert_eq!(value, vec![0, 1, 2]);
    }

    #[test]
    fn test_unexported_method_name_rejected() {
        let err = Service::builder("Arith")
            .method("sum", |_: u32, _: &mut u32| Ok(()))
            .build()
            .unwrap_err();
        assert!(matches!(err, RpcError::NameNotExported(_)));
    }

    #[test]
    fn test_unexported_service_name_rejected() {
        let err = Service::builder("arith")
            .method("Sum", |_: u32, _: &mut u32| Ok(()))
            .build()
            .unwrap_err();
        assert!(matches!(err, RpcError::NameNotExported(_)));
    }

    #[test]
    fn test_duplicate_method_rejected() {
        let err = Service::builder("Arith")
            .method("Sum", |_: u32, _: &mut u32| Ok(()))
            .method("Sum", |_: u32, _: &mut u32| Ok(()))
            .build()
            .unwrap_err();
        assert!(matches!(err, RpcError::DuplicateMethod(_)));
    }

    #[test]
    fn test_descriptor_records_static_types() {
        let service = arith();
        let descriptor = service.method("Sum").unwrap();
        assert!(descriptor.arg_type().ends_with("SumArgs"));
        assert_eq!(descriptor.reply_type(), "f32");
        assert_eq!(descriptor.name(), "Sum");
    }

    #[test]
    fn test_method_names_enumerates() {
        let service = arith();
        let mut names: Vec<_> = service.method_names().collect();
        names.sort_unstable();
        assert_eq!(names, vec!["Div", "Sum"]);
    }
}
