//! Registry of routes currently being executed

use alloy_primitives::Address;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use dexarb_core::{ExchangeId, Route};

/// One pool touched by an execution: exchange plus unordered token pair
pub type FlightKey = (ExchangeId, Address, Address);

fn key(exchange: &ExchangeId, a: Address, b: Address) -> FlightKey {
    if a <= b {
        (exchange.clone(), a, b)
    } else {
        (exchange.clone(), b, a)
    }
}

/// Every pool a route trades through, including intra-exchange hops
pub fn route_keys(route: &Route) -> HashSet<FlightKey> {
    route
        .steps()
        .iter()
        .flat_map(|step| {
            step.tokens()
                .windows(2)
                .map(|w| key(&step.exchange, w[0], w[1]))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Rejects executions that would trade through a pool already in use
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    active: Mutex<HashSet<FlightKey>>,
}

impl InFlightRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Claim every pool of `route`, or nothing if any is taken
    pub fn try_acquire(self: &Arc<Self>, route: &Route) -> Option<InFlightGuard> {
        let keys = route_keys(route);
        let mut active = self.active.lock();
        if keys.iter().any(|k| active.contains(k)) {
            return None;
        }
        active.extend(keys.iter().cloned());
        drop(active);

        Some(InFlightGuard {
            registry: Arc::clone(self),
            keys,
        })
    }

    pub fn is_in_flight(&self, route: &Route) -> bool {
        let active = self.active.lock();
        route_keys(route).iter().any(|k| active.contains(k))
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.lock().is_empty()
    }
}

/// Releases its pools when dropped, whatever path the execution took
#[derive(Debug)]
pub struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    keys: HashSet<FlightKey>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut active = self.registry.active.lock();
        for k in &self.keys {
            active.remove(k);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::U256;
    use dexarb_core::Step;

    fn token(n: u8) -> Address {
        Address::repeat_byte(n)
    }

    fn route(hops: &[(&str, u8, u8)]) -> Route {
        let steps = hops
            .iter()
            .map(|(ex, a, b)| Step::new((*ex).into(), token(*a), token(*b), U256::from(1u64), U256::from(1u64), 1));
        Route::from_steps(token(hops[0].1), U256::from(1u64), U256::ZERO, steps).unwrap()
    }

    #[test]
    fn test_overlapping_route_rejected_until_release() {
        let registry = InFlightRegistry::new();
        let first = route(&[("x", 1, 2), ("y", 2, 1)]);
        // Same x pool traded the other way
        let overlapping = route(&[("x", 2, 1), ("z", 1, 2)]);

        let guard = registry.try_acquire(&first).unwrap();
        assert!(registry.try_acquire(&overlapping).is_none());
        assert!(registry.is_in_flight(&overlapping));

        drop(guard);
        assert!(registry.is_empty());
        assert!(registry.try_acquire(&overlapping).is_some());
    }

    #[test]
    fn test_disjoint_routes_run_together() {
        let registry = InFlightRegistry::new();
        let a = registry.try_acquire(&route(&[("x", 1, 2), ("y", 2, 1)])).unwrap();
        let b = registry.try_acquire(&route(&[("x", 1, 3), ("y", 3, 1)])).unwrap();
        assert_eq!(registry.len(), 4);
        drop(a);
        drop(b);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_failed_acquire_claims_nothing() {
        let registry = InFlightRegistry::new();
        let _held = registry.try_acquire(&route(&[("x", 1, 2), ("x", 2, 1)])).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(registry.try_acquire(&route(&[("y", 1, 3), ("x", 3, 1), ("x", 1, 2)])).is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_multi_hop_step_claims_inner_pools() {
        let step = Step::new("x".into(), token(1), token(1), U256::from(1u64), U256::from(2u64), 1)
            .with_path(vec![token(1), token(2), token(3), token(1)]);
        let route = Route::from_steps(token(1), U256::from(1u64), U256::ZERO, vec![step]).unwrap();
        assert_eq!(route_keys(&route).len(), 3);
    }

    #[test]
    fn test_guard_released_on_panic() {
        let registry = InFlightRegistry::new();
        let r = route(&[("x", 1, 2), ("y", 2, 1)]);
        let reg = registry.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _guard = reg.try_acquire(&r).unwrap();
            panic!("execution blew up");
        }));
        assert!(result.is_err());
        assert!(registry.is_empty());
    }
}
