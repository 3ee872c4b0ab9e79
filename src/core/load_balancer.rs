use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::core::api::LoadBalanceStrategy;

/// Picks one upstream target per request.
pub trait Balancer: Send + Sync + 'static {
    /// Index of the next target out of `len`, `None` when there are none.
    fn next_index(&self, len: usize) -> Option<usize>;

    fn pick<'a, T>(&self, targets: &'a [T]) -> Option<&'a T>
    where
        Self: Sized,
    {
        self.next_index(targets.len()).and_then(|i| targets.get(i))
    }

    fn boxed(self) -> Box<dyn Balancer>
    where
        Self: Sized,
    {
        Box::new(self)
    }
}

/// Cycles through targets in order.
#[derive(Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Balancer for RoundRobin {
    fn next_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.counter.fetch_add(1, Ordering::Relaxed) % len)
    }
}

/// Uniformly random target.
#[derive(Default)]
pub struct Random;

impl Balancer for Random {
    fn next_index(&self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(rand::rng().random_range(0..len))
    }
}

pub fn balancer_for(strategy: LoadBalanceStrategy) -> Box<dyn Balancer> {
    match strategy {
        LoadBalanceStrategy::RoundRobin => RoundRobin::new().boxed(),
        LoadBalanceStrategy::Random => Random.boxed(),
    }
}
