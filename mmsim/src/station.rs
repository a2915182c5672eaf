use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use rand_distr::Distribution;

use dsim::{delay_from_secs, Context, Element, Message, Priority, StreamId};

use crate::{Customer, SharedSummary};

/// Station events.
#[derive(Debug, Copy, Clone)]
pub enum StationMsg {
    /// A customer has arrived and wants a server.
    Arrive(Customer),
    /// The customer's service has finished.
    Depart(Customer),
}

/// A bank of `c` identical servers fed by one FIFO queue.
///
/// Service seconds are drawn from the station's distribution using its
/// stream. The station tracks waiting and flow times per customer and the
/// busy-server time integral for utilization. Warm-up discards everything
/// collected so far while leaving the queue and the servers untouched, so
/// post-warm-up statistics start from the running system state.
pub struct Station<D>
where
    D: Distribution<f64>,
{
    servers: usize,
    service: D,
    stream: StreamId,
    queue: VecDeque<Customer>,
    busy: usize,
    waits: Vec<f64>,
    flows: Vec<f64>,
    busy_area: f64,
    last_change: Duration,
    observed_from: Duration,
    summary: SharedSummary,
}

impl<D> Station<D>
where
    D: Distribution<f64>,
{
    /// Creates a station with `servers` servers, service seconds drawn from
    /// `service` using `stream`, reporting into `summary`.
    ///
    /// # Errors
    ///
    /// Returns an error if `servers` is zero.
    pub fn new(
        servers: usize,
        service: D,
        stream: StreamId,
        summary: SharedSummary,
    ) -> eyre::Result<Self> {
        eyre::ensure!(servers > 0, "a station needs at least one server");
        Ok(Self {
            servers,
            service,
            stream,
            queue: VecDeque::new(),
            busy: 0,
            waits: Vec::new(),
            flows: Vec::new(),
            busy_area: 0.0,
            last_change: Duration::default(),
            observed_from: Duration::default(),
            summary,
        })
    }

    /// Customers currently waiting for a server.
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    fn track_busy(&mut self, now: Duration) {
        self.busy_area += self.busy as f64 * (now - self.last_change).as_secs_f64();
        self.last_change = now;
    }

    fn start_service(&mut self, ctx: &mut Context<'_>, customer: Customer) {
        let now = ctx.time();
        self.waits
            .push((now - customer.arrival_time()).as_secs_f64());
        self.track_busy(now);
        self.busy += 1;
        let delay = delay_from_secs(self.service.sample(ctx.stream(self.stream)))
            .expect("service samples are non-negative");
        log::trace!(
            "[{:?}] customer {} starts service for {:?}",
            now,
            customer.id(),
            delay
        );
        ctx.schedule(
            delay,
            Priority::DEFAULT,
            Some(Rc::new(StationMsg::Depart(customer)) as Message),
        )
        .expect("executive accepts events while running");
    }
}

impl<D> Element for Station<D>
where
    D: Distribution<f64>,
{
    fn initialize(&mut self, ctx: &mut Context<'_>) {
        self.queue.clear();
        self.busy = 0;
        self.waits.clear();
        self.flows.clear();
        self.busy_area = 0.0;
        self.last_change = ctx.time();
        self.observed_from = ctx.time();
    }

    fn on_event(&mut self, ctx: &mut Context<'_>, message: Option<&Message>) {
        let message = message
            .and_then(|m| m.downcast_ref::<StationMsg>())
            .copied()
            .expect("station events carry a StationMsg payload");
        match message {
            StationMsg::Arrive(customer) => {
                if self.busy < self.servers {
                    self.start_service(ctx, customer);
                } else {
                    self.queue.push_back(customer);
                }
            }
            StationMsg::Depart(customer) => {
                let now = ctx.time();
                self.track_busy(now);
                self.busy -= 1;
                self.flows
                    .push((now - customer.arrival_time()).as_secs_f64());
                log::debug!("[{:?}] customer {} departs", now, customer.id());
                if let Some(next) = self.queue.pop_front() {
                    self.start_service(ctx, next);
                }
            }
        }
    }

    fn warm_up(&mut self, ctx: &mut Context<'_>) {
        let now = ctx.time();
        self.track_busy(now);
        self.waits.clear();
        self.flows.clear();
        self.busy_area = 0.0;
        self.observed_from = now;
    }

    fn after_replication(&mut self, ctx: &mut Context<'_>) {
        let now = ctx.time();
        self.track_busy(now);
        let observed = (now - self.observed_from).as_secs_f64();
        let utilization = if observed > 0.0 {
            self.busy_area / (self.servers as f64 * observed)
        } else {
            0.0
        };
        self.summary
            .borrow_mut()
            .push_replication(&self.waits, &self.flows, utilization);
    }
}
