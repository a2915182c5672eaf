//! The model-element tree.
//!
//! Elements form a strict tree: one parent, an ordered list of children,
//! fixed for the duration of an experiment run. The tree is stored as an
//! arena of records indexed by [`ElementId`]; behavior lives in a boxed
//! [`Element`] per record, and free traversals walk the arena in pre-order
//! or post-order invoking one lifecycle hook per node.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::calendar::Message;
use crate::error::{Error, Result};
use crate::executive::Executive;
use crate::factory::StreamBank;
use crate::stream::RandomStream;
use crate::{ElementId, EventHandle, Priority, StreamId};

/// Everything an element may touch while one of its callbacks runs: the
/// executive (scheduling, clock, stop requests), the stream bank, and its
/// own id.
pub struct Context<'a> {
    /// The executive driving the current run.
    pub executive: &'a mut Executive,
    /// The simulation's random streams.
    pub streams: &'a mut StreamBank,
    element: ElementId,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        executive: &'a mut Executive,
        streams: &'a mut StreamBank,
        element: ElementId,
    ) -> Self {
        Self {
            executive,
            streams,
            element,
        }
    }

    /// The element this context belongs to.
    #[must_use]
    pub fn self_id(&self) -> ElementId {
        self.element
    }

    /// The current simulation time.
    #[must_use]
    pub fn time(&self) -> Duration {
        self.executive.time()
    }

    /// Returns the stream with the given id from the bank.
    pub fn stream(&mut self, id: StreamId) -> &mut RandomStream {
        self.streams.stream(id)
    }

    /// Schedules an event for this element.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error if the executive has ended.
    pub fn schedule(
        &mut self,
        delay: Duration,
        priority: Priority,
        message: Option<Message>,
    ) -> Result<EventHandle> {
        self.executive
            .schedule(delay, priority, self.element, message)
    }

    /// Schedules an event for another element.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error if the executive has ended.
    pub fn schedule_for(
        &mut self,
        target: ElementId,
        delay: Duration,
        priority: Priority,
        message: Option<Message>,
    ) -> Result<EventHandle> {
        self.executive.schedule(delay, priority, target, message)
    }

    /// Requests early termination of the current run.
    ///
    /// # Errors
    ///
    /// Returns an illegal-state error unless the event loop is running.
    pub fn stop(&mut self, reason: impl Into<String>) -> Result<()> {
        self.executive.stop(reason)
    }
}

/// Behavior of a model element.
///
/// `on_event` handles events scheduled for the element; the lifecycle hooks
/// default to no-ops so an element implements only the boundaries it cares
/// about. Hooks must not mutate the tree structure.
pub trait Element {
    /// Handles an event scheduled for this element.
    fn on_event(&mut self, ctx: &mut Context<'_>, message: Option<&Message>);

    /// Fired once before the first replication of an experiment, parent
    /// before children.
    fn before_experiment(&mut self, _ctx: &mut Context<'_>) {}

    /// Fired at the start of every replication, parent before children.
    fn before_replication(&mut self, _ctx: &mut Context<'_>) {}

    /// Fired after `before_replication`, parent before children; this is
    /// where initial events are scheduled.
    fn initialize(&mut self, _ctx: &mut Context<'_>) {}

    /// Fired when the warm-up period ends; statistics collected so far
    /// should be discarded.
    fn warm_up(&mut self, _ctx: &mut Context<'_>) {}

    /// Fired periodically for elements that registered an update interval.
    fn timed_update(&mut self, _ctx: &mut Context<'_>) {}

    /// Fired at the end of every replication, children before parent.
    fn after_replication(&mut self, _ctx: &mut Context<'_>) {}

    /// Fired once after the last replication, children before parent.
    fn after_experiment(&mut self, _ctx: &mut Context<'_>) {}
}

/// A collaborator notified after an element's lifecycle hook completes.
///
/// Observers on one element fire in registration order; they must not
/// mutate the model tree.
pub trait ElementObserver {
    /// See [`Element::before_experiment`].
    fn before_experiment(&mut self, _element: ElementId, _ctx: &mut Context<'_>) {}
    /// See [`Element::before_replication`].
    fn before_replication(&mut self, _element: ElementId, _ctx: &mut Context<'_>) {}
    /// See [`Element::initialize`].
    fn initialize(&mut self, _element: ElementId, _ctx: &mut Context<'_>) {}
    /// See [`Element::warm_up`].
    fn warm_up(&mut self, _element: ElementId, _ctx: &mut Context<'_>) {}
    /// See [`Element::timed_update`].
    fn timed_update(&mut self, _element: ElementId, _ctx: &mut Context<'_>) {}
    /// See [`Element::after_replication`].
    fn after_replication(&mut self, _element: ElementId, _ctx: &mut Context<'_>) {}
    /// See [`Element::after_experiment`].
    fn after_experiment(&mut self, _element: ElementId, _ctx: &mut Context<'_>) {}
}

/// A shared, interior-mutable observer registration.
pub type SharedObserver = Rc<RefCell<dyn ElementObserver>>;

/// Opaque token returned by [`Model::attach_observer`], usable to detach.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ObserverHandle {
    element: ElementId,
    slot: usize,
}

/// Lifecycle hooks, used to drive generic traversals.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum Hook {
    BeforeExperiment,
    BeforeReplication,
    Initialize,
    WarmUp,
    TimedUpdate,
    AfterReplication,
    AfterExperiment,
}

impl Hook {
    /// Whether the hook propagates parent-before-children.
    fn is_top_down(self) -> bool {
        match self {
            Hook::BeforeExperiment
            | Hook::BeforeReplication
            | Hook::Initialize
            | Hook::WarmUp
            | Hook::TimedUpdate => true,
            Hook::AfterReplication | Hook::AfterExperiment => false,
        }
    }

    fn invoke(self, element: &mut dyn Element, ctx: &mut Context<'_>) {
        match self {
            Hook::BeforeExperiment => element.before_experiment(ctx),
            Hook::BeforeReplication => element.before_replication(ctx),
            Hook::Initialize => element.initialize(ctx),
            Hook::WarmUp => element.warm_up(ctx),
            Hook::TimedUpdate => element.timed_update(ctx),
            Hook::AfterReplication => element.after_replication(ctx),
            Hook::AfterExperiment => element.after_experiment(ctx),
        }
    }

    fn invoke_observer(self, observer: &SharedObserver, id: ElementId, ctx: &mut Context<'_>) {
        let mut observer = observer.borrow_mut();
        match self {
            Hook::BeforeExperiment => observer.before_experiment(id, ctx),
            Hook::BeforeReplication => observer.before_replication(id, ctx),
            Hook::Initialize => observer.initialize(id, ctx),
            Hook::WarmUp => observer.warm_up(id, ctx),
            Hook::TimedUpdate => observer.timed_update(id, ctx),
            Hook::AfterReplication => observer.after_replication(id, ctx),
            Hook::AfterExperiment => observer.after_experiment(id, ctx),
        }
    }
}

struct ElementRecord {
    name: String,
    parent: Option<ElementId>,
    children: Vec<ElementId>,
    logic: Option<Box<dyn Element>>,
    warm_up: Option<Duration>,
    timed_interval: Option<Duration>,
    observers: Vec<Option<SharedObserver>>,
}

impl ElementRecord {
    fn new(name: String, parent: Option<ElementId>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            logic: None,
            warm_up: None,
            timed_interval: None,
            observers: Vec::new(),
        }
    }
}

/// The model: an arena of element records forming a strict tree.
///
/// The root record is created with the model and carries no behavior of its
/// own; every added element attaches under the root or under another
/// element. Traversal orders are computed lazily and cached until the
/// structure changes.
pub struct Model {
    records: Vec<ElementRecord>,
    root: ElementId,
    frozen: bool,
    pre_order: Option<Vec<ElementId>>,
    post_order: Option<Vec<ElementId>>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new("model")
    }
}

impl Model {
    /// Creates a model whose root element has the given name.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            records: vec![ElementRecord::new(name.into(), None)],
            root: ElementId::from(0),
            frozen: false,
            pre_order: None,
            post_order: None,
        }
    }

    /// The root element's id.
    #[must_use]
    pub fn root(&self) -> ElementId {
        self.root
    }

    /// Number of elements, the root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the model holds only its root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.len() == 1
    }

    /// Adds an element under `parent` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the structure is frozen by a running experiment
    /// or if `parent` is unknown.
    pub fn add_element(
        &mut self,
        parent: ElementId,
        name: &str,
        logic: impl Element + 'static,
    ) -> Result<ElementId> {
        if self.frozen {
            return Err(Error::FrozenModel);
        }
        self.record(parent)?;
        let id = ElementId::from(self.records.len());
        let mut record = ElementRecord::new(name.into(), Some(parent));
        record.logic = Some(Box::new(logic));
        self.records.push(record);
        self.records[usize::from(parent)].children.push(id);
        self.pre_order = None;
        self.post_order = None;
        Ok(id)
    }

    /// The element's own name.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is unknown.
    pub fn name(&self, id: ElementId) -> Result<&str> {
        Ok(&self.record(id)?.name)
    }

    /// The element's full path name, segments joined with `/`.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is unknown.
    pub fn full_name(&self, id: ElementId) -> Result<String> {
        let mut segments = vec![self.record(id)?.name.as_str()];
        let mut cursor = self.record(id)?.parent;
        while let Some(parent) = cursor {
            let record = self.record(parent)?;
            segments.push(record.name.as_str());
            cursor = record.parent;
        }
        segments.reverse();
        Ok(segments.join("/"))
    }

    /// The element's parent, `None` for the root.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is unknown.
    pub fn parent(&self, id: ElementId) -> Result<Option<ElementId>> {
        Ok(self.record(id)?.parent)
    }

    /// The element's children, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is unknown.
    pub fn children(&self, id: ElementId) -> Result<&[ElementId]> {
        Ok(&self.record(id)?.children)
    }

    /// Requests that statistics be reset `length` into every replication.
    /// The warm-up event fires once per replication, at the earliest
    /// positive length requested across the tree, and notifies the whole
    /// tree, not just the requester.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is unknown.
    pub fn set_warm_up(&mut self, id: ElementId, length: Option<Duration>) -> Result<()> {
        self.record_mut(id)?.warm_up = length;
        Ok(())
    }

    /// Registers (or clears) a periodic timed-update interval for the
    /// element. The update is scoped to the element and its observers.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is unknown, or a configuration error for a
    /// zero interval.
    pub fn set_timed_update(&mut self, id: ElementId, interval: Option<Duration>) -> Result<()> {
        if interval == Some(Duration::default()) {
            return Err(Error::InvalidConfig(String::from(
                "timed update interval must be positive",
            )));
        }
        self.record_mut(id)?.timed_interval = interval;
        Ok(())
    }

    /// Attaches an observer to the element, after any already attached.
    ///
    /// # Errors
    ///
    /// Returns an error if `id` is unknown, or if this same observer
    /// instance is already attached to this element.
    pub fn attach_observer(
        &mut self,
        id: ElementId,
        observer: SharedObserver,
    ) -> Result<ObserverHandle> {
        let record = self.record_mut(id)?;
        let duplicate = record
            .observers
            .iter()
            .flatten()
            .any(|existing| Rc::ptr_eq(existing, &observer));
        if duplicate {
            return Err(Error::DuplicateObserver(id));
        }
        record.observers.push(Some(observer));
        Ok(ObserverHandle {
            element: id,
            slot: record.observers.len() - 1,
        })
    }

    /// Detaches a previously attached observer.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle's element is unknown or the handle no
    /// longer refers to an attached observer.
    pub fn detach_observer(&mut self, handle: ObserverHandle) -> Result<()> {
        let record = self.record_mut(handle.element)?;
        match record.observers.get_mut(handle.slot) {
            Some(slot) if slot.is_some() => {
                *slot = None;
                Ok(())
            }
            _ => Err(Error::UnknownObserver(handle.element)),
        }
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    pub(crate) fn unfreeze(&mut self) {
        self.frozen = false;
    }

    /// The earliest positive warm-up length requested by any element, merged
    /// with an experiment-level default.
    pub(crate) fn earliest_warm_up(&self, default: Option<Duration>) -> Option<Duration> {
        self.records
            .iter()
            .filter_map(|record| record.warm_up)
            .chain(default)
            .filter(|length| *length > Duration::default())
            .min()
    }

    /// All registered timed-update intervals.
    pub(crate) fn timed_intervals(&self) -> Vec<(ElementId, Duration)> {
        self.records
            .iter()
            .enumerate()
            .filter_map(|(index, record)| {
                record
                    .timed_interval
                    .map(|interval| (ElementId::from(index), interval))
            })
            .collect()
    }

    pub(crate) fn timed_interval(&self, id: ElementId) -> Option<Duration> {
        self.record(id).ok().and_then(|record| record.timed_interval)
    }

    /// Pre-order traversal (parent before children), computed lazily.
    pub(crate) fn pre_order_ids(&mut self) -> Vec<ElementId> {
        if self.pre_order.is_none() {
            let mut order = Vec::with_capacity(self.records.len());
            let mut stack = vec![self.root];
            while let Some(id) = stack.pop() {
                order.push(id);
                for &child in self.records[usize::from(id)].children.iter().rev() {
                    stack.push(child);
                }
            }
            self.pre_order = Some(order);
        }
        self.pre_order.clone().expect("cache populated above")
    }

    /// Post-order traversal (children before parent), computed lazily.
    pub(crate) fn post_order_ids(&mut self) -> Vec<ElementId> {
        if self.post_order.is_none() {
            let mut order = Vec::with_capacity(self.records.len());
            let mut stack = vec![self.root];
            while let Some(id) = stack.pop() {
                order.push(id);
                for &child in &self.records[usize::from(id)].children {
                    stack.push(child);
                }
            }
            order.reverse();
            self.post_order = Some(order);
        }
        self.post_order.clone().expect("cache populated above")
    }

    /// Delivers an event to the target element's handler.
    ///
    /// # Errors
    ///
    /// Returns an error if `target` is unknown.
    pub(crate) fn dispatch(
        &mut self,
        target: ElementId,
        executive: &mut Executive,
        streams: &mut StreamBank,
        message: Option<&Message>,
    ) -> Result<()> {
        self.record(target)?;
        if let Some(mut logic) = self.records[usize::from(target)].logic.take() {
            let mut ctx = Context::new(executive, streams, target);
            logic.on_event(&mut ctx, message);
            self.records[usize::from(target)].logic = Some(logic);
        } else {
            log::warn!("event targeted element {} which has no handler", target);
        }
        Ok(())
    }

    /// Walks the tree in the hook's traversal order, invoking the hook on
    /// every element and then on its observers in registration order.
    pub(crate) fn notify(
        &mut self,
        hook: Hook,
        executive: &mut Executive,
        streams: &mut StreamBank,
    ) {
        let order = if hook.is_top_down() {
            self.pre_order_ids()
        } else {
            self.post_order_ids()
        };
        for id in order {
            self.fire_hook(hook, id, executive, streams);
        }
    }

    /// Invokes a hook on a single element and its observers; used for the
    /// element-scoped hooks (timed update).
    pub(crate) fn fire_hook(
        &mut self,
        hook: Hook,
        id: ElementId,
        executive: &mut Executive,
        streams: &mut StreamBank,
    ) {
        if let Some(mut logic) = self.records[usize::from(id)].logic.take() {
            let mut ctx = Context::new(executive, streams, id);
            hook.invoke(logic.as_mut(), &mut ctx);
            self.records[usize::from(id)].logic = Some(logic);
        }
        let observers: Vec<SharedObserver> = self.records[usize::from(id)]
            .observers
            .iter()
            .flatten()
            .map(Rc::clone)
            .collect();
        for observer in observers {
            let mut ctx = Context::new(executive, streams, id);
            hook.invoke_observer(&observer, id, &mut ctx);
        }
    }

    fn record(&self, id: ElementId) -> Result<&ElementRecord> {
        self.records
            .get(usize::from(id))
            .ok_or(Error::UnknownElement(id))
    }

    fn record_mut(&mut self, id: ElementId) -> Result<&mut ElementRecord> {
        self.records
            .get_mut(usize::from(id))
            .ok_or(Error::UnknownElement(id))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Inert;

    impl Element for Inert {
        fn on_event(&mut self, _ctx: &mut Context<'_>, _message: Option<&Message>) {}
    }

    fn three_level_model() -> (Model, ElementId, ElementId, ElementId) {
        let mut model = Model::new("root");
        let parent = model.add_element(model.root(), "parent", Inert).unwrap();
        let left = model.add_element(parent, "left", Inert).unwrap();
        let right = model.add_element(parent, "right", Inert).unwrap();
        (model, parent, left, right)
    }

    #[test]
    fn test_pre_order_visits_parents_first() {
        let (mut model, parent, left, right) = three_level_model();
        let order = model.pre_order_ids();
        assert_eq!(order, vec![model.root(), parent, left, right]);
    }

    #[test]
    fn test_post_order_visits_children_first() {
        let (mut model, parent, left, right) = three_level_model();
        let order = model.post_order_ids();
        assert_eq!(order, vec![left, right, parent, model.root()]);
    }

    #[test]
    fn test_full_name_joins_path_segments() {
        let (model, parent, left, _) = three_level_model();
        assert_eq!(model.full_name(parent).unwrap(), "root/parent");
        assert_eq!(model.full_name(left).unwrap(), "root/parent/left");
    }

    #[test]
    fn test_add_element_rejected_while_frozen() {
        let (mut model, parent, _, _) = three_level_model();
        model.freeze();
        assert!(matches!(
            model.add_element(parent, "late", Inert),
            Err(Error::FrozenModel)
        ));
        model.unfreeze();
        assert!(model.add_element(parent, "late", Inert).is_ok());
    }

    #[test]
    fn test_duplicate_observer_is_rejected() {
        let (mut model, parent, _, _) = three_level_model();
        struct Quiet;
        impl ElementObserver for Quiet {}
        let observer: SharedObserver = Rc::new(RefCell::new(Quiet));
        model
            .attach_observer(parent, Rc::clone(&observer))
            .unwrap();
        assert!(matches!(
            model.attach_observer(parent, Rc::clone(&observer)),
            Err(Error::DuplicateObserver(_))
        ));
        // The same instance is fine on a different element.
        assert!(model.attach_observer(model.root(), observer).is_ok());
    }

    #[test]
    fn test_detached_observer_slot_cannot_be_detached_twice() {
        let (mut model, parent, _, _) = three_level_model();
        struct Quiet;
        impl ElementObserver for Quiet {}
        let handle = model
            .attach_observer(parent, Rc::new(RefCell::new(Quiet)))
            .unwrap();
        model.detach_observer(handle).unwrap();
        assert!(matches!(
            model.detach_observer(handle),
            Err(Error::UnknownObserver(_))
        ));
    }

    #[test]
    fn test_earliest_warm_up_ignores_zero_lengths() {
        let (mut model, parent, left, _) = three_level_model();
        assert_eq!(model.earliest_warm_up(None), None);
        model.set_warm_up(left, Some(Duration::default())).unwrap();
        assert_eq!(model.earliest_warm_up(None), None);
        model
            .set_warm_up(parent, Some(Duration::from_secs(20)))
            .unwrap();
        assert_eq!(
            model.earliest_warm_up(Some(Duration::from_secs(30))),
            Some(Duration::from_secs(20))
        );
        assert_eq!(
            model.earliest_warm_up(Some(Duration::from_secs(10))),
            Some(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_zero_timed_update_interval_is_rejected() {
        let (mut model, parent, _, _) = three_level_model();
        assert!(model
            .set_timed_update(parent, Some(Duration::default()))
            .is_err());
        assert!(model
            .set_timed_update(parent, Some(Duration::from_secs(1)))
            .is_ok());
        assert_eq!(model.timed_intervals(), vec![(parent, Duration::from_secs(1))]);
    }
}
