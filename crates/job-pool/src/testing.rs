//! Scripted page sources for pool tests

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::{Value, json};
use upstream::{FetchStrategy, PageSource, Result, ServerPage};

/// One recorded `fetch_page` call.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchCall {
    pub place_id: String,
    pub cursor: Option<String>,
    pub strategy: String,
}

type Responder = dyn Fn(&FetchCall, usize) -> Result<ServerPage> + Send + Sync;

/// Page source answering from a closure. The closure receives the call and
/// its zero-based index across all calls.
pub struct ScriptedSource {
    responder: Box<Responder>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    log: Mutex<Vec<FetchCall>>,
}

impl ScriptedSource {
    pub fn new(
        responder: impl Fn(&FetchCall, usize) -> Result<ServerPage> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
            log: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long (tokio time) before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> Vec<FetchCall> {
        self.log.lock().unwrap().clone()
    }
}

impl PageSource for ScriptedSource {
    fn id(&self) -> &str {
        "scripted"
    }

    fn fetch_page<'a>(
        &'a self,
        place_id: &'a str,
        cursor: Option<&'a str>,
        strategy: &'a FetchStrategy,
    ) -> Pin<Box<dyn Future<Output = Result<ServerPage>> + Send + 'a>> {
        Box::pin(async move {
            let call = FetchCall {
                place_id: place_id.to_string(),
                cursor: cursor.map(str::to_owned),
                strategy: strategy.key(),
            };
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(call.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            (self.responder)(&call, index)
        })
    }
}

/// Raw server record as the listing returns it.
pub fn server(id: &str, playing: u32, max_players: u32) -> Value {
    json!({
        "id": id,
        "playing": playing,
        "maxPlayers": max_players,
        "ping": 80,
        "fps": 60,
    })
}

/// Page of servers with ids `{prefix}-{start}..{prefix}-{end}`, all eligible.
pub fn page_of(prefix: &str, range: std::ops::Range<usize>, next: Option<&str>) -> ServerPage {
    ServerPage {
        data: range.map(|i| server(&format!("{prefix}-{i}"), 5, 10)).collect(),
        next_page_cursor: next.map(str::to_owned),
    }
}
