//! Pull side of the feed: paginated page requests.

use crate::error::{Result, SyncError};
use crate::feed::{FeedPage, FeedScope};
use crate::types::{Generation, TargetId};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::sync::Arc;

/// One page request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub target: TargetId,
    pub scope: FeedScope,
    /// `None` asks for the first page.
    pub cursor: Option<String>,
    pub limit: usize,
}

impl PageRequest {
    pub fn is_first_page(&self) -> bool {
        self.cursor.is_none()
    }
}

pub(crate) struct PageOutcome {
    pub(crate) epoch: Generation,
    pub(crate) request: PageRequest,
    pub(crate) result: Result<FeedPage>,
}

/// Completion handle for a [`PageRequest`].
///
/// May be moved to another thread and completed there. Replies for a
/// request the bridge no longer cares about are discarded on delivery.
pub struct PageReply {
    epoch: Generation,
    request: PageRequest,
    tx: Sender<PageOutcome>,
}

impl PageReply {
    pub(crate) fn new(epoch: Generation, request: PageRequest, tx: Sender<PageOutcome>) -> Self {
        Self { epoch, request, tx }
    }

    pub fn request(&self) -> &PageRequest {
        &self.request
    }

    /// Complete the request. Returns false if the bridge is gone.
    pub fn send(self, result: Result<FeedPage>) -> bool {
        self.tx
            .send(PageOutcome {
                epoch: self.epoch,
                request: self.request,
                result,
            })
            .is_ok()
    }

    pub fn ok(self, page: FeedPage) -> bool {
        self.send(Ok(page))
    }

    pub fn fail(self, error: impl Into<String>) -> bool {
        self.send(Err(SyncError::Pull(error.into())))
    }
}

/// Where feed pages come from.
///
/// Implementations start the fetch and complete `reply` whenever the
/// result is available, synchronously or later from another thread.
pub trait FeedSource {
    fn fetch(&mut self, request: PageRequest, reply: PageReply);
}

impl<F> FeedSource for F
where
    F: FnMut(PageRequest, PageReply),
{
    fn fetch(&mut self, request: PageRequest, reply: PageReply) {
        self(request, reply)
    }
}

/// Source that parks every request until it is answered by hand.
#[derive(Clone, Default)]
pub struct MemoryFeedSource {
    pending: Arc<Mutex<Vec<PageReply>>>,
    total: Arc<Mutex<usize>>,
}

impl MemoryFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests waiting for an answer, oldest first.
    pub fn pending(&self) -> Vec<PageRequest> {
        self.pending
            .lock()
            .iter()
            .map(|reply| reply.request().clone())
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Requests received so far, answered or not.
    pub fn request_count(&self) -> usize {
        *self.total.lock()
    }

    /// Answer the oldest pending request. Returns false if none is pending.
    pub fn respond(&self, result: Result<FeedPage>) -> bool {
        let reply = {
            let mut pending = self.pending.lock();
            if pending.is_empty() {
                return false;
            }
            pending.remove(0)
        };
        reply.send(result)
    }

    pub fn respond_ok(&self, page: FeedPage) -> bool {
        self.respond(Ok(page))
    }

    pub fn respond_err(&self, error: impl Into<String>) -> bool {
        self.respond(Err(SyncError::Pull(error.into())))
    }
}

impl FeedSource for MemoryFeedSource {
    fn fetch(&mut self, _request: PageRequest, reply: PageReply) {
        *self.total.lock() += 1;
        self.pending.lock().push(reply);
    }
}
