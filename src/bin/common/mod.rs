//! Contracts shared by the demo host and client.

use ipc_proxy::{events_contract, methods_contract};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Param {
    pub a: i32,
    pub b: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Sum {
    pub sum: i32,
}

methods_contract! {
    /// Served by the host process.
    pub trait HostMethods {
        fn ping(&self, text: String) -> String;
        fn add(&self, param: Param) -> Sum;
    }
    dispatch = HostMethodsDispatch;
    client = HostMethodsClient;
}

events_contract! {
    /// Implemented by the client process.
    pub trait ClientEvents {
        fn on_something(&self, message: String);
    }
    dispatch = ClientEventsDispatch;
    emitter = ClientEventsEmitter;
}
