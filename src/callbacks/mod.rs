//! Named, ordered hook lists per operation kind.
//!
//! Ordering directives are resolved when a hook is registered; running a
//! pipeline is a linear pass over the pre-sorted list.

mod create;
mod delete;
mod query;
mod shared;
mod update;

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, LazyLock, RwLock};

use futures_util::future::BoxFuture;

use crate::scope::Scope;

pub type Hook = Arc<dyn for<'a> Fn(&'a mut Scope) -> BoxFuture<'a, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Query,
    Update,
    Delete,
}

impl OperationKind {
    const ALL: [OperationKind; 4] = [
        OperationKind::Create,
        OperationKind::Query,
        OperationKind::Update,
        OperationKind::Delete,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Query => "query",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

#[derive(Clone)]
struct Processor {
    name: String,
    kind: OperationKind,
    before: Option<String>,
    after: Option<String>,
    replace: bool,
    remove: bool,
    hook: Option<Hook>,
}

impl fmt::Debug for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Processor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("before", &self.before)
            .field("after", &self.after)
            .field("replace", &self.replace)
            .field("remove", &self.remove)
            .finish_non_exhaustive()
    }
}

/// Hook registry. Shared read-only between builders; edits go through
/// [`CallbackEditor`], which swaps in an edited copy.
#[derive(Clone, Default)]
pub struct Callbacks {
    creates: Vec<(String, Hook)>,
    queries: Vec<(String, Hook)>,
    updates: Vec<(String, Hook)>,
    deletes: Vec<(String, Hook)>,
    processors: Vec<Processor>,
}

impl fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_struct("Callbacks");
        for kind in OperationKind::ALL {
            dbg.field(kind.as_str(), &self.names(kind));
        }
        dbg.finish()
    }
}

static DEFAULT_CALLBACKS: LazyLock<Arc<Callbacks>> =
    LazyLock::new(|| Arc::new(Callbacks::with_defaults()));

impl Callbacks {
    /// The shared registry new roots start from.
    #[must_use]
    pub fn shared_defaults() -> Arc<Callbacks> {
        Arc::clone(&DEFAULT_CALLBACKS)
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        let mut callbacks = Callbacks::default();
        create::register_defaults(&mut callbacks);
        query::register_defaults(&mut callbacks);
        update::register_defaults(&mut callbacks);
        delete::register_defaults(&mut callbacks);
        callbacks
    }

    #[must_use]
    pub fn hooks(&self, kind: OperationKind) -> &[(String, Hook)] {
        match kind {
            OperationKind::Create => &self.creates,
            OperationKind::Query => &self.queries,
            OperationKind::Update => &self.updates,
            OperationKind::Delete => &self.deletes,
        }
    }

    /// Hook names for `kind` in execution order.
    #[must_use]
    pub fn names(&self, kind: OperationKind) -> Vec<&str> {
        self.hooks(kind).iter().map(|(name, _)| name.as_str()).collect()
    }

    #[must_use]
    pub fn get(&self, kind: OperationKind, name: &str) -> Option<Hook> {
        self.processors
            .iter()
            .rev()
            .find(|p| p.kind == kind && p.name == name)
            .filter(|p| !p.remove)
            .and_then(|p| p.hook.clone())
    }

    pub(crate) fn register_fn<F>(&mut self, kind: OperationKind, name: &str, f: F)
    where
        F: for<'a> Fn(&'a mut Scope) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        ProcessorBuilder::new(kind).register(self, name, Arc::new(f));
    }

    fn push(&mut self, processor: Processor) {
        let kind = processor.kind;
        self.processors.push(processor);
        self.reorder(kind);
    }

    fn reorder(&mut self, kind: OperationKind) {
        let procs: Vec<Processor> = self
            .processors
            .iter()
            .filter(|p| p.kind == kind)
            .cloned()
            .collect();
        let sorted = sort_processors(procs);
        match kind {
            OperationKind::Create => self.creates = sorted,
            OperationKind::Query => self.queries = sorted,
            OperationKind::Update => self.updates = sorted,
            OperationKind::Delete => self.deletes = sorted,
        }
    }
}

fn rindex<'a>(names: impl DoubleEndedIterator<Item = &'a str> + ExactSizeIterator, name: &str) -> Option<usize> {
    let len = names.len();
    names
        .rev()
        .position(|n| n == name)
        .map(|pos| len - 1 - pos)
}

fn sort_processors(mut procs: Vec<Processor>) -> Vec<(String, Hook)> {
    let all_names: Vec<String> = procs.iter().map(|p| p.name.clone()).collect();

    let mut seen = HashSet::new();
    for p in &procs {
        if !seen.insert(p.name.as_str()) && !p.replace && !p.remove {
            tracing::warn!(callback = %p.name, kind = p.kind.as_str(), "callback already registered");
        }
    }

    let mut sorted: Vec<String> = Vec::with_capacity(procs.len());
    for idx in 0..procs.len() {
        place(idx, &mut procs, &all_names, &mut sorted);
    }

    sorted
        .iter()
        .filter_map(|name| {
            let idx = rindex(all_names.iter().map(String::as_str), name)?;
            let p = &procs[idx];
            if p.remove {
                return None;
            }
            p.hook.clone().map(|hook| (name.clone(), hook))
        })
        .collect()
}

fn place(idx: usize, procs: &mut [Processor], all_names: &[String], sorted: &mut Vec<String>) {
    let name = procs[idx].name.clone();
    if sorted.contains(&name) {
        return;
    }

    if let Some(before) = procs[idx].before.clone() {
        if let Some(pos) = rindex(sorted.iter().map(String::as_str), &before) {
            sorted.insert(pos, name.clone());
        } else if let Some(target) = rindex(all_names.iter().map(String::as_str), &before) {
            // anchor not placed yet: take the tail, then place the anchor after us
            sorted.push(name.clone());
            place(target, procs, all_names, sorted);
        }
    }

    if let Some(after) = procs[idx].after.clone() {
        if let Some(pos) = rindex(sorted.iter().map(String::as_str), &after) {
            if !sorted.contains(&name) {
                sorted.insert(pos + 1, name.clone());
            }
        } else if let Some(target) = rindex(all_names.iter().map(String::as_str), &after) {
            if procs[target].before.is_none() {
                procs[target].before = Some(name.clone());
            }
            place(target, procs, all_names, sorted);
        }
    }

    if !sorted.contains(&name) {
        sorted.push(name);
    }
}

/// Staged registration for one operation kind.
#[derive(Debug, Clone)]
pub struct ProcessorBuilder {
    kind: OperationKind,
    before: Option<String>,
    after: Option<String>,
}

impl ProcessorBuilder {
    fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            before: None,
            after: None,
        }
    }

    fn register(self, callbacks: &mut Callbacks, name: &str, hook: Hook) {
        callbacks.push(Processor {
            name: name.to_string(),
            kind: self.kind,
            before: self.before,
            after: self.after,
            replace: false,
            remove: false,
            hook: Some(hook),
        });
    }
}

/// Edits one root's registry by clone-then-replace under its lock.
pub struct CallbackEditor {
    slot: Arc<RwLock<Arc<Callbacks>>>,
}

impl fmt::Debug for CallbackEditor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackEditor").finish_non_exhaustive()
    }
}

impl CallbackEditor {
    pub(crate) fn new(slot: Arc<RwLock<Arc<Callbacks>>>) -> Self {
        Self { slot }
    }

    #[must_use]
    pub fn create(&self) -> KindEditor<'_> {
        self.kind(OperationKind::Create)
    }

    #[must_use]
    pub fn query(&self) -> KindEditor<'_> {
        self.kind(OperationKind::Query)
    }

    #[must_use]
    pub fn update(&self) -> KindEditor<'_> {
        self.kind(OperationKind::Update)
    }

    #[must_use]
    pub fn delete(&self) -> KindEditor<'_> {
        self.kind(OperationKind::Delete)
    }

    #[must_use]
    pub fn kind(&self, kind: OperationKind) -> KindEditor<'_> {
        KindEditor {
            editor: self,
            builder: ProcessorBuilder::new(kind),
        }
    }

    /// Current registry snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Callbacks> {
        match self.slot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn edit(&self, apply: impl FnOnce(&mut Callbacks)) {
        let mut slot = match self.slot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next = Callbacks::clone(&slot);
        apply(&mut next);
        *slot = Arc::new(next);
    }
}

pub struct KindEditor<'e> {
    editor: &'e CallbackEditor,
    builder: ProcessorBuilder,
}

impl KindEditor<'_> {
    /// Place the next registration right before `name`.
    #[must_use]
    pub fn before(mut self, name: &str) -> Self {
        self.builder.before = Some(name.to_string());
        self
    }

    /// Place the next registration right after `name`.
    #[must_use]
    pub fn after(mut self, name: &str) -> Self {
        self.builder.after = Some(name.to_string());
        self
    }

    pub fn register<F>(self, name: &str, hook: F)
    where
        F: for<'a> Fn(&'a mut Scope) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        let hook: Hook = Arc::new(hook);
        let builder = self.builder;
        self.editor
            .edit(move |callbacks| builder.register(callbacks, name, hook));
    }

    pub fn replace<F>(self, name: &str, hook: F)
    where
        F: for<'a> Fn(&'a mut Scope) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        let hook: Hook = Arc::new(hook);
        let kind = self.builder.kind;
        tracing::info!(callback = name, kind = kind.as_str(), "replacing callback");
        self.editor.edit(move |callbacks| {
            callbacks.push(Processor {
                name: name.to_string(),
                kind,
                before: None,
                after: None,
                replace: true,
                remove: false,
                hook: Some(hook),
            });
        });
    }

    pub fn remove(self, name: &str) {
        let kind = self.builder.kind;
        tracing::info!(callback = name, kind = kind.as_str(), "removing callback");
        self.editor.edit(move |callbacks| {
            callbacks.push(Processor {
                name: name.to_string(),
                kind,
                before: None,
                after: None,
                replace: false,
                remove: true,
                hook: None,
            });
        });
    }

    #[must_use]
    pub fn get(self, name: &str) -> Option<Hook> {
        self.editor.snapshot().get(self.builder.kind, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut Scope) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn editor() -> CallbackEditor {
        CallbackEditor::new(Arc::new(RwLock::new(Arc::new(Callbacks::default()))))
    }

    #[test]
    fn before_and_after_resolve_at_registration() {
        let cb = editor();
        cb.create().register("a", noop);
        cb.create().after("a").register("b", noop);
        cb.create().before("a").register("c", noop);
        assert_eq!(cb.snapshot().names(OperationKind::Create), vec!["c", "a", "b"]);
    }

    #[test]
    fn after_an_unplaced_anchor_still_follows_it() {
        let cb = editor();
        cb.query().after("late").register("follower", noop);
        cb.query().register("late", noop);
        assert_eq!(
            cb.snapshot().names(OperationKind::Query),
            vec!["late", "follower"]
        );
    }

    #[test]
    fn remove_and_replace_keep_positions() {
        let cb = editor();
        cb.delete().register("one", noop);
        cb.delete().register("two", noop);
        cb.delete().register("three", noop);
        cb.delete().remove("two");
        cb.delete().replace("three", noop);
        assert_eq!(cb.snapshot().names(OperationKind::Delete), vec!["one", "three"]);
    }

    #[test]
    fn edits_do_not_touch_earlier_snapshots() {
        let cb = editor();
        cb.update().register("x", noop);
        let before = cb.snapshot();
        cb.update().register("y", noop);
        assert_eq!(before.names(OperationKind::Update), vec!["x"]);
        assert_eq!(cb.snapshot().names(OperationKind::Update), vec!["x", "y"]);
    }

    #[test]
    fn default_set_order() {
        let defaults = Callbacks::with_defaults();
        assert_eq!(
            defaults.names(OperationKind::Create),
            vec![
                "begin_transaction",
                "before_create",
                "update_time_stamp",
                "create",
                "after_create",
                "commit_or_rollback_transaction",
            ]
        );
        assert_eq!(
            defaults.names(OperationKind::Query),
            vec!["query", "preload", "after_query"]
        );
    }
}
