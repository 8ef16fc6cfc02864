use std::collections::VecDeque;
use std::io;

use async_trait::async_trait;
use parking_lot::Mutex;

use httpcache::{CacheRequest, HttpResponse, ResponseResolver};

/// Resolver that replays queued outcomes in order and records every request
/// it receives. An empty queue answers with an I/O error.
#[derive(Default)]
pub struct ScriptedResolver {
    script: Mutex<VecDeque<io::Result<HttpResponse>>>,
    requests: Mutex<Vec<CacheRequest>>,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: HttpResponse) {
        self.script.lock().push_back(Ok(response));
    }

    pub fn push_error(&self, kind: io::ErrorKind) {
        self.script
            .lock()
            .push_back(Err(io::Error::new(kind, "scripted failure")));
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<CacheRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> Option<CacheRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl ResponseResolver for ScriptedResolver {
    async fn resolve(&self, request: &CacheRequest) -> io::Result<HttpResponse> {
        self.requests.lock().push(request.clone());
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Err(io::Error::other("no scripted response left")))
    }
}
