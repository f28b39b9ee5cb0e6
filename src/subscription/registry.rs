use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::subscription::filter::{MULTI_LEVEL_WILDCARD, SINGLE_LEVEL_WILDCARD, TopicFilter};
use crate::subscription::message::Message;
use crate::utils::{HandlerError, Result};

/// A message handler. Handlers run on the dispatch task and should return
/// quickly.
pub type Handler = Arc<dyn Fn(&Message) -> std::result::Result<(), HandlerError> + Send + Sync>;

/// Identifies one registration. Ids grow monotonically, so ordering by id is
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A handler returned by [`SubscriptionRegistry::matches`].
#[derive(Clone)]
pub struct MatchedHandler {
    pub id: SubscriptionId,
    pub filter: Arc<str>,
    pub handler: Handler,
}

impl fmt::Debug for MatchedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MatchedHandler")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .finish()
    }
}

/// Maps topic filters to handlers.
///
/// Filters are stored in a trie keyed by level, so a lookup walks at most
/// the depth of the topic (plus the `+` branches along the way). The trie
/// sits behind a reader/writer lock; `matches` clones what it found before
/// releasing the lock, so a concurrent `add` or `remove` never changes a
/// result that is already being delivered.
#[derive(Default)]
pub struct SubscriptionRegistry {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
}

#[derive(Default)]
struct Inner {
    root: Node,
    len: usize,
}

#[derive(Default)]
struct Node {
    children: HashMap<String, Node>,
    // filters ending at this node
    exact: Vec<MatchedHandler>,
    // filters ending in '#' right below this node
    multi: Vec<MatchedHandler>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under `filter`.
    ///
    /// Fails with `InvalidFilter` for empty filters, a `#` anywhere but the
    /// last level, or wildcards mixed with other characters in one level.
    pub fn add<F>(&self, filter: &str, handler: F) -> Result<SubscriptionId>
    where
        F: Fn(&Message) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.add_shared(filter, Arc::new(handler))
    }

    /// Like [`add`](Self::add) for a handler that is already shared.
    pub fn add_shared(&self, filter: &str, handler: Handler) -> Result<SubscriptionId> {
        let filter = TopicFilter::new(filter)?;
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = MatchedHandler {
            id,
            filter: Arc::from(filter.as_str()),
            handler,
        };

        let mut inner = self.inner.write();
        let mut node = &mut inner.root;
        let mut multi = false;
        for level in filter.levels() {
            if level == MULTI_LEVEL_WILDCARD {
                multi = true;
                break;
            }
            node = node.children.entry(level.to_string()).or_default();
        }
        if multi {
            node.multi.push(entry);
        } else {
            node.exact.push(entry);
        }
        inner.len += 1;

        Ok(id)
    }

    /// Unregisters the handler `id` from `filter`. Returns whether anything
    /// was removed; an unknown pair is a no-op.
    pub fn remove(&self, filter: &str, id: SubscriptionId) -> bool {
        let Ok(filter) = TopicFilter::new(filter) else {
            return false;
        };
        let levels: Vec<&str> = filter.levels().collect();

        let mut inner = self.inner.write();
        let removed = inner.root.remove(&levels, id);
        if removed {
            inner.len -= 1;
        }
        removed
    }

    /// Returns every handler whose filter matches `topic`, in registration
    /// order.
    pub fn matches(&self, topic: &str) -> Vec<MatchedHandler> {
        let levels: Vec<&str> = topic.split('/').collect();
        let mut found = Vec::new();
        self.inner.read().root.collect(&levels, &mut found);
        found.sort_by_key(|m| m.id);
        found
    }

    /// Whether at least one handler is registered under exactly `filter`.
    pub fn contains_filter(&self, filter: &str) -> bool {
        let Ok(filter) = TopicFilter::new(filter) else {
            return false;
        };

        let inner = self.inner.read();
        let mut node = &inner.root;
        for level in filter.levels() {
            if level == MULTI_LEVEL_WILDCARD {
                return !node.multi.is_empty();
            }
            match node.children.get(level) {
                Some(child) => node = child,
                None => return false,
            }
        }
        !node.exact.is_empty()
    }

    /// Distinct registered filters, sorted.
    pub fn filters(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.inner
            .read()
            .root
            .collect_filters(&mut Vec::new(), &mut out);
        out.sort();
        out
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.inner.read().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("filters", &self.filters())
            .field("len", &self.len())
            .finish()
    }
}

impl Node {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.exact.is_empty() && self.multi.is_empty()
    }

    fn remove(&mut self, levels: &[&str], id: SubscriptionId) -> bool {
        match levels.split_first() {
            None => remove_entry(&mut self.exact, id),
            Some((level, _)) if *level == MULTI_LEVEL_WILDCARD => {
                remove_entry(&mut self.multi, id)
            }
            Some((level, rest)) => {
                let Some(child) = self.children.get_mut(*level) else {
                    return false;
                };
                let removed = child.remove(rest, id);
                if removed && child.is_empty() {
                    self.children.remove(*level);
                }
                removed
            }
        }
    }

    fn collect(&self, levels: &[&str], out: &mut Vec<MatchedHandler>) {
        // '#' also matches the parent level itself
        out.extend(self.multi.iter().cloned());

        match levels.split_first() {
            None => out.extend(self.exact.iter().cloned()),
            Some((level, rest)) => {
                if *level != SINGLE_LEVEL_WILDCARD {
                    if let Some(child) = self.children.get(*level) {
                        child.collect(rest, out);
                    }
                }
                if let Some(child) = self.children.get(SINGLE_LEVEL_WILDCARD) {
                    child.collect(rest, out);
                }
            }
        }
    }

    fn collect_filters(&self, path: &mut Vec<String>, out: &mut Vec<String>) {
        if !self.exact.is_empty() {
            out.push(path.join("/"));
        }
        if !self.multi.is_empty() {
            path.push(MULTI_LEVEL_WILDCARD.to_string());
            out.push(path.join("/"));
            path.pop();
        }
        for (level, child) in &self.children {
            path.push(level.clone());
            child.collect_filters(path, out);
            path.pop();
        }
    }
}

fn remove_entry(entries: &mut Vec<MatchedHandler>, id: SubscriptionId) -> bool {
    match entries.iter().position(|e| e.id == id) {
        Some(pos) => {
            entries.remove(pos);
            true
        }
        None => false,
    }
}
