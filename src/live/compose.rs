//! Composition operators over live result streams.
//!
//! A [`Live`] is a channel of results plus whatever must stop when the consumer is done
//! with it: a registered query, or a task thread reading from upstream `Live`s. Operator
//! tasks own their inputs, so stopping the outermost `Live` cancels its task, the task
//! drops its inputs, and the teardown runs down the whole chain before `stop` returns.

use crate::core::error::StoreError;
use crate::live::cancel::CancelToken;
use crate::live::engine::{Item, LiveQuery, Mailbox, Teardown};
use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, Select, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

enum Stopper {
    Query(Teardown),
    Task {
        token: CancelToken,
        join: Option<JoinHandle<()>>,
    },
    Stopped,
}

impl Stopper {
    fn stop(&mut self) {
        match std::mem::replace(self, Stopper::Stopped) {
            Stopper::Query(teardown) => teardown.tear_down(),
            Stopper::Task { token, join } => {
                token.cancel();
                if let Some(join) = join
                    && join.thread().id() != thread::current().id()
                {
                    let _ = join.join();
                }
            }
            Stopper::Stopped => {}
        }
    }
}

/// A live stream of results. Dropping it stops everything upstream.
pub struct Live<T> {
    rx: Receiver<Item<T>>,
    stop: Stopper,
}

impl<T> From<LiveQuery<T>> for Live<T> {
    fn from(query: LiveQuery<T>) -> Self {
        let (rx, teardown) = query.into_parts();
        Live {
            rx,
            stop: Stopper::Query(teardown),
        }
    }
}

impl<T> Drop for Live<T> {
    fn drop(&mut self) {
        self.stop.stop();
    }
}

impl<T: Send + 'static> Live<T> {
    /// Block for the next item. `Closed` once the stream has ended.
    pub fn recv(&self) -> Item<T> {
        self.rx.recv().unwrap_or(Err(StoreError::Closed))
    }

    /// `None` on timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Item<T>> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(StoreError::Closed)),
        }
    }

    pub fn try_recv(&self) -> Option<Item<T>> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(StoreError::Closed)),
        }
    }

    /// Stop this stream and everything feeding it. Idempotent.
    pub fn stop(&mut self) {
        self.stop.stop();
    }

    /// Wait for the first item, then tear the subscription down.
    pub fn first(self) -> Item<T> {
        self.recv()
    }

    /// Like [`Live::first`] with an upper bound on the wait.
    pub fn first_timeout(self, timeout: Duration) -> Option<Item<T>> {
        self.recv_timeout(timeout)
    }

    pub fn map<U, F>(self, f: F) -> Result<Live<U>, StoreError>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U, StoreError> + Send + 'static,
    {
        spawn_task("map", move |cancel, out| {
            let source = self;
            loop {
                let mut sel = Select::new();
                let cancelled = sel.recv(cancel);
                let upstream = sel.recv(&source.rx);
                let op = sel.select();
                match op.index() {
                    i if i == cancelled => {
                        let _ = op.recv(cancel);
                        return;
                    }
                    i if i == upstream => match op.recv(&source.rx) {
                        Ok(item) => out.deliver(item.and_then(&f)),
                        Err(_) => return,
                    },
                    _ => return,
                }
            }
        })
    }

    /// End this stream once `token` is cancelled.
    pub fn until(self, token: &CancelToken) -> Result<Live<T>, StoreError> {
        let token = token.clone();
        spawn_task("until", move |cancel, out| {
            let source = self;
            loop {
                let mut sel = Select::new();
                let cancelled = sel.recv(cancel);
                let scope_end = sel.recv(token.receiver());
                let upstream = sel.recv(&source.rx);
                let op = sel.select();
                match op.index() {
                    i if i == cancelled => {
                        let _ = op.recv(cancel);
                        return;
                    }
                    i if i == scope_end => {
                        let _ = op.recv(token.receiver());
                        return;
                    }
                    i if i == upstream => match op.recv(&source.rx) {
                        Ok(item) => out.deliver(item),
                        Err(_) => return,
                    },
                    _ => return,
                }
            }
        })
    }
}

/// Run `body` on its own thread, feeding a fresh mailbox. The returned `Live` cancels and
/// joins the thread when stopped.
fn spawn_task<T, F>(name: &str, body: F) -> Result<Live<T>, StoreError>
where
    T: Send + 'static,
    F: FnOnce(&Receiver<()>, &Mailbox<T>) + Send + 'static,
{
    let token = CancelToken::new();
    let task_token = token.clone();
    let (mailbox, rx) = Mailbox::new();
    let join = thread::Builder::new()
        .name(format!("live-{name}"))
        .spawn(move || {
            body(task_token.receiver(), &mailbox);
            debug!(task = "compose", "operator task finished");
        })?;
    Ok(Live {
        rx,
        stop: Stopper::Task {
            token,
            join: Some(join),
        },
    })
}

/// Latest-value join over any number of sources of one type.
///
/// Emits nothing until every source has produced a value, then one combined vector per
/// upstream emission. Errors are forwarded as they arrive and do not replace the last good
/// value. With no sources it emits one empty vector. Ends when any source ends.
pub fn join_all<T>(sources: Vec<Live<T>>) -> Result<Live<Vec<T>>, StoreError>
where
    T: Clone + Send + 'static,
{
    spawn_task("join", move |cancel, out| {
        let mut latest: Vec<Option<T>> = vec![None; sources.len()];
        if sources.is_empty() {
            out.deliver(Ok(Vec::new()));
        }
        loop {
            let mut sel = Select::new();
            let cancelled = sel.recv(cancel);
            for source in &sources {
                sel.recv(&source.rx);
            }
            let op = sel.select();
            let index = op.index();
            if index == cancelled {
                let _ = op.recv(cancel);
                return;
            }
            let slot = index - 1;
            match op.recv(&sources[slot].rx) {
                Ok(Ok(value)) => {
                    latest[slot] = Some(value);
                    if latest.iter().all(Option::is_some) {
                        out.deliver(Ok(latest.iter().flatten().cloned().collect()));
                    }
                }
                Ok(Err(err)) => out.deliver(Err(err)),
                Err(_) => return,
            }
        }
    })
}

pub fn join2<A, B>(a: Live<A>, b: Live<B>) -> Result<Live<(A, B)>, StoreError>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
{
    spawn_task("join2", move |cancel, out| {
        let (a, b) = (a, b);
        let (mut last_a, mut last_b) = (None, None);
        loop {
            let mut sel = Select::new();
            let cancelled = sel.recv(cancel);
            let ia = sel.recv(&a.rx);
            let ib = sel.recv(&b.rx);
            let op = sel.select();
            let index = op.index();
            let received = if index == cancelled {
                let _ = op.recv(cancel);
                return;
            } else if index == ia {
                op.recv(&a.rx).map(|item| item.map(|v| last_a = Some(v)))
            } else if index == ib {
                op.recv(&b.rx).map(|item| item.map(|v| last_b = Some(v)))
            } else {
                return;
            };
            match received {
                Ok(Ok(())) => {
                    if let (Some(a), Some(b)) = (&last_a, &last_b) {
                        out.deliver(Ok((a.clone(), b.clone())));
                    }
                }
                Ok(Err(err)) => out.deliver(Err(err)),
                Err(_) => return,
            }
        }
    })
}

pub fn join3<A, B, C>(a: Live<A>, b: Live<B>, c: Live<C>) -> Result<Live<(A, B, C)>, StoreError>
where
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    C: Clone + Send + 'static,
{
    let ab = join2(a, b)?;
    join2(ab, c)?.map(|((a, b), c)| Ok((a, b, c)))
}

/// Re-derive a stream whenever `key` emits a value different from the current one.
///
/// The previous derived stream is stopped before `derive` runs for the new key. Items from
/// the current derived stream are forwarded; errors from either side are forwarded too.
pub fn switch_on_key<K, T, F>(key: Live<K>, derive: F) -> Result<Live<T>, StoreError>
where
    K: PartialEq + Send + 'static,
    T: Send + 'static,
    F: Fn(&K) -> Result<Live<T>, StoreError> + Send + 'static,
{
    spawn_task("switch", move |cancel, out| {
        let key = key;
        let mut current: Option<K> = None;
        let mut inner: Option<Live<T>> = None;
        loop {
            let event = {
                let mut sel = Select::new();
                let cancelled = sel.recv(cancel);
                let from_key = sel.recv(&key.rx);
                if let Some(live) = &inner {
                    sel.recv(&live.rx);
                }
                let op = sel.select();
                let index = op.index();
                if index == cancelled {
                    let _ = op.recv(cancel);
                    return;
                } else if index == from_key {
                    Switch::Key(op.recv(&key.rx))
                } else if let Some(live) = &inner {
                    Switch::Inner(op.recv(&live.rx))
                } else {
                    return;
                }
            };
            match event {
                Switch::Key(Ok(Ok(next))) => {
                    if inner.is_some() && current.as_ref() == Some(&next) {
                        continue;
                    }
                    drop(inner.take());
                    match derive(&next) {
                        Ok(live) => inner = Some(live),
                        Err(err) => out.deliver(Err(err)),
                    }
                    current = Some(next);
                }
                Switch::Key(Ok(Err(err))) => out.deliver(Err(err)),
                Switch::Key(Err(_)) => return,
                Switch::Inner(Ok(item)) => out.deliver(item),
                Switch::Inner(Err(_)) => inner = None,
            }
        }
    })
}

enum Switch<K, T> {
    Key(Result<Item<K>, RecvError>),
    Inner(Result<Item<T>, RecvError>),
}

/// A caller-defined lifetime for subscriptions.
///
/// Streams attached with [`Scope::watch`] are consumed on scope-owned threads; when the
/// scope ends (explicit [`Scope::close`] or drop) every one of them is stopped and joined.
pub struct Scope {
    token: CancelToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            token: CancelToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Call `on_item` for every item of `live` until the scope ends or the stream does.
    pub fn watch<T, F>(&mut self, live: Live<T>, mut on_item: F) -> Result<(), StoreError>
    where
        T: Send + 'static,
        F: FnMut(Item<T>) + Send + 'static,
    {
        let token = self.token.clone();
        let join = thread::Builder::new()
            .name("live-scope".to_string())
            .spawn(move || {
                let live = live;
                loop {
                    let mut sel = Select::new();
                    let ended = sel.recv(token.receiver());
                    let upstream = sel.recv(&live.rx);
                    let op = sel.select();
                    if op.index() == ended {
                        let _ = op.recv(token.receiver());
                        return;
                    }
                    if op.index() != upstream {
                        return;
                    }
                    match op.recv(&live.rx) {
                        Ok(item) => on_item(item),
                        Err(_) => return,
                    }
                }
            })?;
        self.tasks.push(join);
        Ok(())
    }

    /// End the scope and wait until every attached subscription is torn down.
    pub fn close(&mut self) {
        self.token.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.join();
        }
    }
}

impl Drop for Scope {
    fn drop(&mut self) {
        self.close();
    }
}
