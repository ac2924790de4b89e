//! Positional argument payloads.
//!
//! Every call carries its arguments as a JSON array, one element per
//! parameter. Tuples convert to and from that shape so typed adapters can
//! pass `(a, b)` on one side and destructure `(a, b)` on the other.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::error::HandlerError;

/// Positional arguments of a single call.
pub type Args = Vec<Value>;

/// Values that can be sent as positional arguments.
pub trait IntoArgs {
    fn into_args(self) -> Result<Args, serde_json::Error>;
}

/// Values that can be rebuilt from positional arguments on the handling side.
pub trait FromArgs: Sized {
    fn from_args(args: Args) -> Result<Self, HandlerError>;
}

impl IntoArgs for Args {
    fn into_args(self) -> Result<Args, serde_json::Error> {
        Ok(self)
    }
}

macro_rules! tuple_args {
    ($len:expr; $($name:ident),*) => {
        impl<$($name: Serialize),*> IntoArgs for ($($name,)*) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Result<Args, serde_json::Error> {
                let ($($name,)*) = self;
                Ok(vec![$(serde_json::to_value($name)?),*])
            }
        }

        impl<$($name: DeserializeOwned),*> FromArgs for ($($name,)*) {
            #[allow(non_snake_case, unused_mut, unused_variables)]
            fn from_args(args: Args) -> Result<Self, HandlerError> {
                if args.len() != $len {
                    return Err(HandlerError::new(format!(
                        "expected {} argument(s), got {}",
                        $len,
                        args.len()
                    )));
                }
                let mut args = args.into_iter();
                Ok(($(serde_json::from_value::<$name>(args.next().unwrap_or(Value::Null))?,)*))
            }
        }
    };
}

tuple_args!(0;);
tuple_args!(1; A);
tuple_args!(2; A, B);
tuple_args!(3; A, B, C);
tuple_args!(4; A, B, C, D);
tuple_args!(5; A, B, C, D, E);
tuple_args!(6; A, B, C, D, E, F);
tuple_args!(7; A, B, C, D, E, F, G);
tuple_args!(8; A, B, C, D, E, F, G, H);
