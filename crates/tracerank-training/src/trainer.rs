//! The top-level training loop.
//!
//! Each cycle the trainer fans one evaluation task per event out over the
//! worker pool, waits for the pool to go idle, sums the winners' ranks, and
//! notifies the crafter. The live weight vector is republished to the shared
//! buffer only between cycles, while no worker is running, so evaluations
//! never observe a half-written proposal.
//!
//! The rank total is minimized; its floor is the event count (every winner
//! ranked first), at which point the search stops early. An external stop
//! flag is honoured between cycles, never mid-batch, so a stop is always
//! cycle-granular and the best weights survive it.

use std::{
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use tracerank_engine::{Event, Weight};

use crate::{WeightsCrafter, WorkerPool, pool::Task};

/// How often a progress record is emitted while no improvement happens.
const SUMMARY_INTERVAL: Duration = Duration::from_secs(60);

/// What a finished (or stopped) training run leaves behind.
#[derive(Debug)]
pub struct TrainOutcome {
    pub cycles_run: u64,
    /// Best rank total observed; the persisted weights reproduce it.
    pub rank_total: u32,
    /// Per-event winner ranks matching `rank_total`.
    pub event_ranks: Vec<u32>,
    pub stop_requested: bool,
}

/// Owns the crafter, the pool, and the shared weight buffer for one run.
pub struct Trainer {
    events: Vec<Arc<Mutex<Event>>>,
    crafter: Box<dyn WeightsCrafter>,
    pool: WorkerPool,
    shared_weights: Arc<RwLock<Vec<Weight>>>,
    max_cycles: u64,
    stop: Arc<AtomicBool>,
}

impl Trainer {
    /// # Panics
    ///
    /// Panics if `events` is empty or an event disagrees with the crafter on
    /// the weight count; callers validate event compatibility beforehand.
    #[must_use]
    pub fn new(
        events: Vec<Arc<Mutex<Event>>>,
        crafter: Box<dyn WeightsCrafter>,
        worker_count: usize,
        max_cycles: u64,
        stop: Arc<AtomicBool>,
    ) -> Self {
        assert!(!events.is_empty(), "a trainer needs at least one event");
        for event in &events {
            assert_eq!(
                event.lock().unwrap().required_weights_count(),
                crafter.weights_count(),
                "event and crafter disagree on the weight count"
            );
        }
        let shared_weights = Arc::new(RwLock::new(crafter.current().to_vec()));
        Self {
            events,
            crafter,
            pool: WorkerPool::new(worker_count),
            shared_weights,
            max_cycles,
            stop,
        }
    }

    /// The weight vector to persist; after [`run`](Self::run) this is the
    /// best vector the search observed.
    #[must_use]
    pub fn final_weights(&self) -> &[Weight] {
        self.crafter.current()
    }

    /// Runs training cycles until the cycle budget is exhausted, the rank
    /// total reaches its floor, or a stop is requested.
    pub fn run(&mut self) -> TrainOutcome {
        let event_count = self.events.len() as u32;

        eprintln!(
            "Training on {event_count} events for up to {} cycles ({} workers)...",
            self.max_cycles,
            self.pool.worker_count(),
        );

        // Measure the starting vector (the loaded seed, or the random
        // initial weights) first, so every proposal is judged against its
        // real total and a seed is never displaced by a worse proposal.
        self.publish_weights(self.crafter.best());
        self.evaluate_all();
        let mut event_ranks: Vec<u32> = self
            .events
            .iter()
            .map(|event| event.lock().unwrap().winner_rank())
            .collect();
        let mut rank_total: u32 = event_ranks.iter().sum();
        eprintln!("  Starting rank total is {rank_total}.");

        self.publish_weights(self.crafter.current());

        let mut window_started = Instant::now();
        let mut window_cycles: u64 = 0;
        let mut cycles: u64 = 0;
        while cycles < self.max_cycles
            && rank_total > event_count
            && !self.stop.load(Ordering::Relaxed)
        {
            cycles += 1;
            window_cycles += 1;

            self.evaluate_all();

            let ranks: Vec<u32> = self
                .events
                .iter()
                .map(|event| event.lock().unwrap().winner_rank())
                .collect();
            let new_total: u32 = ranks.iter().sum();

            let improved = new_total < rank_total;
            if improved {
                rank_total = new_total;
                event_ranks = ranks;
                self.crafter.notify_improved();
            } else {
                self.crafter.notify_no_improvement();
            }
            // The pool is idle here, so the new proposal can be published
            // without racing any evaluation.
            self.publish_weights(self.crafter.current());

            if improved || window_started.elapsed() >= SUMMARY_INTERVAL {
                self.log_progress(cycles, rank_total, window_cycles, window_started.elapsed());
                if improved {
                    self.log_ranks(rank_total, &event_ranks);
                }
                window_started = Instant::now();
                window_cycles = 0;
            }
        }

        let stop_requested = self.stop.load(Ordering::Relaxed);
        if stop_requested {
            eprintln!("Stop requested, finishing up.");
        }
        eprintln!("Trained for {cycles} cycles.");

        self.crafter.restore_best();
        self.publish_weights(self.crafter.current());

        TrainOutcome {
            cycles_run: cycles,
            rank_total,
            event_ranks,
            stop_requested,
        }
    }

    fn evaluate_all(&self) {
        let tasks: Vec<Task> = self
            .events
            .iter()
            .map(|event| {
                let event = Arc::clone(event);
                let weights = Arc::clone(&self.shared_weights);
                Box::new(move || {
                    let mut event = event.lock().unwrap();
                    let weights = weights.read().unwrap();
                    event.evaluate(&weights);
                }) as Task
            })
            .collect();
        self.pool.submit_batch(tasks);
        self.pool.wait_idle();
    }

    fn publish_weights(&self, weights: &[Weight]) {
        self.shared_weights.write().unwrap().copy_from_slice(weights);
    }

    #[expect(clippy::cast_precision_loss)]
    fn log_progress(&self, cycles: u64, rank_total: u32, window_cycles: u64, window_elapsed: Duration) {
        let percent = cycles as f64 * 100.0 / self.max_cycles as f64;
        let rate = window_cycles as f64 / window_elapsed.as_secs_f64().max(f64::EPSILON);
        let seconds_left = (self.max_cycles - cycles) as f64 / rate.max(f64::EPSILON);
        let minutes_left = (seconds_left / 60.0) as u64;

        eprint!("  {cycles} cycles spent ({percent:.1}%), rank total {rank_total}, ");
        if minutes_left > 0 {
            eprint!("{} hr {} min", minutes_left / 60, minutes_left % 60);
        } else {
            eprint!("{seconds_left:.0} seconds");
        }
        eprintln!(" left at {rate:.0} cycles/sec.");
        eprintln!("    {}", self.crafter.state_summary());
    }

    fn log_ranks(&self, rank_total: u32, event_ranks: &[u32]) {
        eprintln!(
            "    The {} ranks totalling {rank_total} are:",
            self.events.len()
        );
        for (event, rank) in self.events.iter().zip(event_ranks) {
            let event = event.lock().unwrap();
            eprintln!(
                "      {rank} for '{}' in '{}'",
                event.winner().name(),
                event.name(),
            );
        }
    }
}
