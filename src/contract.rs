//! Contracts and the operation surface of handler instances.
//!
//! A contract is the set of operations one process implements and the other
//! calls. Handlers expose their operations through [`SharedObject`], either
//! written by hand or generated with [`methods_contract!`](crate::methods_contract)
//! and [`events_contract!`](crate::events_contract).

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    args::Args,
    error::{HandlerError, IpcError, Result},
};

/// Names never bound as operations.
pub const RESERVED_NAMES: &[&str] = &[
    "constructor",
    "toString",
    "toLocaleString",
    "valueOf",
    "propertyIsEnumerable",
    "isPrototypeOf",
    "hasOwnProperty",
];

/// Leading marker of private helpers that are not part of a contract.
pub const INTERNAL_MARKER: char = '_';

/// An object whose operations can be called over a transport.
///
/// # Example
/// ```ignore
/// struct Calculator;
///
/// #[async_trait]
/// impl SharedObject for Calculator {
///     fn operations(&self) -> &[&str] {
///         &["add"]
///     }
///
///     async fn call(&self, operation: &str, args: Args) -> Result<Value, HandlerError> {
///         match operation {
///             "add" => {
///                 let (a, b) = <(i64, i64)>::from_args(args)?;
///                 Ok(Value::from(a + b))
///             }
///             other => Err(HandlerError::unknown_operation(other)),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait SharedObject: Send + Sync {
    /// Declared operation names, in declaration order.
    fn operations(&self) -> &[&str];

    /// Run `operation` with positional `args`.
    async fn call(&self, operation: &str, args: Args) -> std::result::Result<Value, HandlerError>;
}

/// Whether `name` may be bound as an operation.
pub fn is_exposed(name: &str) -> bool {
    !name.is_empty() && !RESERVED_NAMES.contains(&name) && !name.starts_with(INTERNAL_MARKER)
}

/// Operation names to bind for `object`.
///
/// Reserved and internal names are dropped and duplicates collapse to their
/// first occurrence. Fails when no object is given or nothing is left to bind.
pub fn operation_names(object: Option<&dyn SharedObject>) -> Result<Vec<String>> {
    let object = object.ok_or_else(|| IpcError::InvalidContract("no instance given".into()))?;

    let declared = object.operations();
    if declared.is_empty() {
        return Err(IpcError::InvalidContract(
            "instance declares no operations".into(),
        ));
    }

    let mut names: Vec<String> = Vec::with_capacity(declared.len());
    for name in declared {
        if is_exposed(name) && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }

    if names.is_empty() {
        return Err(IpcError::InvalidContract(
            "instance declares only reserved or internal names".into(),
        ));
    }
    Ok(names)
}

#[doc(hidden)]
#[macro_export]
macro_rules! __contract_dispatch {
    ($contract:ident, $dispatch:ident; $($op:ident ($($arg:ident : $arg_ty:ty),*));*) => {
        impl<T: $contract + ?Sized> $dispatch<T> {
            /// Operation names declared by the contract.
            pub const OPERATIONS: &'static [&'static str] = &[$(stringify!($op)),*];

            pub fn new(handler: ::std::sync::Arc<T>) -> Self {
                Self(handler)
            }

            pub fn into_shared(self) -> ::std::sync::Arc<dyn $crate::SharedObject> {
                ::std::sync::Arc::new(self)
            }
        }

        #[$crate::__private::async_trait]
        impl<T: $contract + ?Sized> $crate::SharedObject for $dispatch<T> {
            fn operations(&self) -> &[&str] {
                Self::OPERATIONS
            }

            #[allow(unused_variables)]
            async fn call(
                &self,
                operation: &str,
                args: $crate::Args,
            ) -> ::std::result::Result<$crate::__private::Value, $crate::HandlerError> {
                match operation {
                    $(
                        stringify!($op) => {
                            let ($($arg,)*) =
                                <($($arg_ty,)*) as $crate::FromArgs>::from_args(args)?;
                            let output = self.0.$op($($arg),*).await?;
                            Ok($crate::__private::to_value(output)?)
                        }
                    )*
                    other => Err($crate::HandlerError::unknown_operation(other)),
                }
            }
        }
    };
}

/// Declare a methods contract: operations the host implements and the client
/// calls, awaiting a result.
///
/// Generates the contract trait, a dispatch type that serves an
/// implementation through [`bind_methods`](crate::bind_methods), and a client
/// adapter with one async method per operation.
///
/// ```ignore
/// methods_contract! {
///     pub trait MethodsContract {
///         fn ping(&self, text: String) -> String;
///     }
///     dispatch = MethodsDispatch;
///     client = MethodsClient;
/// }
/// ```
#[macro_export]
macro_rules! methods_contract {
    (
        $(#[$meta:meta])*
        $vis:vis trait $contract:ident {
            $(
                $(#[$op_meta:meta])*
                fn $op:ident(&self $(, $arg:ident : $arg_ty:ty)*) -> $ret:ty;
            )*
        }
        dispatch = $dispatch:ident;
        client = $client:ident;
    ) => {
        $(#[$meta])*
        #[$crate::__private::async_trait]
        $vis trait $contract: Send + Sync + 'static {
            $(
                $(#[$op_meta])*
                async fn $op(&self $(, $arg: $arg_ty)*)
                    -> ::std::result::Result<$ret, $crate::HandlerError>;
            )*
        }

        #[doc = concat!("Serves a [`", stringify!($contract), "`] implementation.")]
        $vis struct $dispatch<T: ?Sized>(::std::sync::Arc<T>);

        $crate::__contract_dispatch!($contract, $dispatch; $($op ($($arg : $arg_ty),*));*);

        #[doc = concat!("Calls [`", stringify!($contract), "`] operations on the remote host.")]
        #[derive(Clone)]
        $vis struct $client {
            proxy: $crate::MethodsProxy,
        }

        impl $client {
            pub fn new(proxy: $crate::MethodsProxy) -> Self {
                Self { proxy }
            }

            pub fn proxy(&self) -> &$crate::MethodsProxy {
                &self.proxy
            }

            $(
                $(#[$op_meta])*
                pub async fn $op(&self $(, $arg: $arg_ty)*) -> $crate::Result<$ret> {
                    self.proxy.invoke(stringify!($op), ($($arg,)*)).await
                }
            )*
        }
    };
}

/// Declare an events contract: operations the client implements and the host
/// fires without waiting for a result.
///
/// Generates the contract trait, a dispatch type that serves an
/// implementation through [`bind_events`](crate::bind_events), and an emitter
/// adapter with one fire-and-forget method per operation.
#[macro_export]
macro_rules! events_contract {
    (
        $(#[$meta:meta])*
        $vis:vis trait $contract:ident {
            $(
                $(#[$op_meta:meta])*
                fn $op:ident(&self $(, $arg:ident : $arg_ty:ty)*);
            )*
        }
        dispatch = $dispatch:ident;
        emitter = $emitter:ident;
    ) => {
        $(#[$meta])*
        #[$crate::__private::async_trait]
        $vis trait $contract: Send + Sync + 'static {
            $(
                $(#[$op_meta])*
                async fn $op(&self $(, $arg: $arg_ty)*)
                    -> ::std::result::Result<(), $crate::HandlerError>;
            )*
        }

        #[doc = concat!("Serves a [`", stringify!($contract), "`] implementation.")]
        $vis struct $dispatch<T: ?Sized>(::std::sync::Arc<T>);

        $crate::__contract_dispatch!($contract, $dispatch; $($op ($($arg : $arg_ty),*));*);

        #[doc = concat!("Fires [`", stringify!($contract), "`] events at the remote client.")]
        #[derive(Clone)]
        $vis struct $emitter {
            proxy: $crate::EventsProxy,
        }

        impl $emitter {
            pub fn new(proxy: $crate::EventsProxy) -> Self {
                Self { proxy }
            }

            pub fn proxy(&self) -> &$crate::EventsProxy {
                &self.proxy
            }

            $(
                $(#[$op_meta])*
                pub fn $op(&self $(, $arg: $arg_ty)*) {
                    self.proxy.emit(stringify!($op), ($($arg,)*));
                }
            )*
        }
    };
}
