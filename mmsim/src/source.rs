use std::rc::Rc;

use rand_distr::Distribution;

use dsim::{delay_from_secs, Context, Element, ElementId, Message, Priority, StreamId};

use crate::{Customer, CustomerId, StationMsg};

/// Generates customers and sends them to the station.
///
/// The source has one event: an arrival. Handling it stamps a new customer
/// with the current time, forwards it to the station, and schedules the next
/// arrival from the interarrival distribution, sampled from the source's
/// stream.
pub struct Source<D>
where
    D: Distribution<f64>,
{
    station: ElementId,
    interarrival: D,
    stream: StreamId,
    next_id: usize,
}

impl<D> Source<D>
where
    D: Distribution<f64>,
{
    /// Creates a source feeding `station`, with interarrival seconds drawn
    /// from `interarrival` using the given stream.
    #[must_use]
    pub fn new(station: ElementId, interarrival: D, stream: StreamId) -> Self {
        Self {
            station,
            interarrival,
            stream,
            next_id: 0,
        }
    }

    fn schedule_next_arrival(&self, ctx: &mut Context<'_>) {
        let delay = delay_from_secs(self.interarrival.sample(ctx.stream(self.stream)))
            .expect("interarrival samples are non-negative");
        ctx.schedule(delay, Priority::DEFAULT, None)
            .expect("executive accepts events while running");
    }
}

impl<D> Element for Source<D>
where
    D: Distribution<f64>,
{
    fn initialize(&mut self, ctx: &mut Context<'_>) {
        self.next_id = 0;
        self.schedule_next_arrival(ctx);
    }

    fn on_event(&mut self, ctx: &mut Context<'_>, _message: Option<&Message>) {
        let customer = Customer::new(CustomerId::from(self.next_id), ctx.time());
        self.next_id += 1;
        log::debug!("[{:?}] customer {} arrives", ctx.time(), customer.id());
        ctx.schedule_for(
            self.station,
            std::time::Duration::default(),
            Priority::DEFAULT,
            Some(Rc::new(StationMsg::Arrive(customer)) as Message),
        )
        .expect("executive accepts events while running");
        self.schedule_next_arrival(ctx);
    }
}
