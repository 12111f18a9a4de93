//! Subscription model and matching tables
//!
//! Three subscription indices, checked in order per emitted event:
//!
//! 1. **Type index**: dotted-type lookup; a subscription for a type also
//!    receives every descendant type (`function` matches
//!    `function.executing`), which is how a class-hierarchy subscription
//!    renders onto dotted names.
//! 2. **Pattern index**: regular expressions compiled at subscribe time,
//!    matched against `event.event_type`.
//! 3. **Predicate index**: arbitrary boolean functions of the event.
//!
//! A handler is invoked at most once per event even when several of its
//! filter's clauses match.

use provenant_core::Event;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handle identifying one subscription, returned by `subscribe`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Event handler callback
///
/// Handlers run sequentially on the dispatcher; panics are caught and
/// counted, never propagated.
pub type EventHandler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Predicate over events
pub type EventPredicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

/// What a subscription matches
#[derive(Clone)]
pub enum SubscriptionFilter {
    /// Every event
    All,
    /// Exact dotted types, each including its descendant types
    Types(Vec<String>),
    /// Compiled pattern over `event.event_type`
    Pattern(Regex),
    /// Arbitrary predicate
    Predicate(EventPredicate),
}

impl fmt::Debug for SubscriptionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionFilter::All => write!(f, "All"),
            SubscriptionFilter::Types(ts) => f.debug_tuple("Types").field(ts).finish(),
            SubscriptionFilter::Pattern(re) => {
                f.debug_tuple("Pattern").field(&re.as_str()).finish()
            }
            SubscriptionFilter::Predicate(_) => write!(f, "Predicate(..)"),
        }
    }
}

pub(crate) struct Subscription {
    pub id: SubscriptionId,
    pub filter: SubscriptionFilter,
    pub handler: EventHandler,
    pub priority: i32,
}

/// The three matching indices
#[derive(Default)]
pub(crate) struct SubscriptionTables {
    /// declared type -> subscription ids
    by_type: HashMap<String, Vec<SubscriptionId>>,
    /// pattern and predicate subscriptions, scanned per event
    scanned: Vec<SubscriptionId>,
    /// all subscriptions by id
    all: HashMap<SubscriptionId, Arc<Subscription>>,
}

impl SubscriptionTables {
    pub fn insert(&mut self, sub: Subscription) {
        let id = sub.id;
        match &sub.filter {
            SubscriptionFilter::Types(types) => {
                for t in types {
                    self.by_type.entry(t.clone()).or_default().push(id);
                }
            }
            SubscriptionFilter::All
            | SubscriptionFilter::Pattern(_)
            | SubscriptionFilter::Predicate(_) => self.scanned.push(id),
        }
        self.all.insert(id, Arc::new(sub));
    }

    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let Some(sub) = self.all.remove(&id) else {
            return false;
        };
        match &sub.filter {
            SubscriptionFilter::Types(types) => {
                for t in types {
                    if let Some(ids) = self.by_type.get_mut(t) {
                        ids.retain(|x| *x != id);
                        if ids.is_empty() {
                            self.by_type.remove(t);
                        }
                    }
                }
            }
            _ => self.scanned.retain(|x| *x != id),
        }
        true
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    /// Find the subscriptions matching an event, priority descending
    pub fn matching(&self, event: &Event) -> Vec<Arc<Subscription>> {
        let mut hits: Vec<Arc<Subscription>> = Vec::new();

        // Type index: the exact type and every dotted prefix of it.
        for key in type_ancestors(&event.event_type) {
            if let Some(ids) = self.by_type.get(key) {
                for id in ids {
                    if let Some(sub) = self.all.get(id) {
                        hits.push(sub.clone());
                    }
                }
            }
        }

        // Pattern and predicate indices.
        for id in &self.scanned {
            let Some(sub) = self.all.get(id) else { continue };
            let matched = match &sub.filter {
                SubscriptionFilter::All => true,
                SubscriptionFilter::Pattern(re) => re.is_match(&event.event_type),
                SubscriptionFilter::Predicate(p) => p(event),
                SubscriptionFilter::Types(_) => false,
            };
            if matched {
                hits.push(sub.clone());
            }
        }

        hits.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));
        hits.dedup_by_key(|s| s.id);
        hits
    }
}

/// Iterate the dotted prefixes of a type, most specific first
///
/// `function.executing` yields `function.executing`, then `function`.
fn type_ancestors(event_type: &str) -> impl Iterator<Item = &str> {
    let mut current = Some(event_type);
    std::iter::from_fn(move || {
        let out = current?;
        current = out.rfind('.').map(|i| &out[..i]);
        Some(out)
    })
}
