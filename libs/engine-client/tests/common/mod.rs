#![allow(dead_code)]

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use engine_client::{Credentials, EngineError, EngineTransport, Reply, Request, Role, Session};
use serde_json::{json, Value};

/// Records every call and answers from a user-supplied closure.
pub struct ScriptedTransport {
    calls: Mutex<Vec<(Credentials, Request)>>,
    responder: Box<dyn Fn(usize, &Request) -> Result<Reply, EngineError> + Send + Sync>,
}

impl ScriptedTransport {
    pub fn new(
        responder: impl Fn(usize, &Request) -> Result<Reply, EngineError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            responder: Box::new(responder),
        })
    }

    /// Answers `ok` with an empty object to everything.
    pub fn always_ok() -> Arc<Self> {
        Self::new(|_, _| Ok(Reply::ok(json!({}))))
    }

    pub fn calls(&self) -> Vec<(Credentials, Request)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn inserts(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|(_, r)| match r {
                Request::Insert(v) => Some(v),
                _ => None,
            })
            .collect()
    }
}

impl EngineTransport for ScriptedTransport {
    fn call<'a>(
        &'a self,
        credentials: &'a Credentials,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Reply, EngineError>> + Send + 'a>> {
        let index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push((credentials.clone(), request.clone()));
            calls.len() - 1
        };
        let result = (self.responder)(index, &request);
        Box::pin(async move { result })
    }
}

pub fn child_session(transport: Arc<ScriptedTransport>) -> Session {
    Session::new(transport, Credentials::new(Role::Child, "child-1", "child-secret"))
}
