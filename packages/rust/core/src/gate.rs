//! Concurrency gate bounding the number of active item pipelines.

use std::sync::Arc;

use reportharvest_shared::{HarvestError, Result};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Admits at most `width` holders of a [`GatePermit`] at a time.
///
/// Cloning the gate shares its slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyGate {
    width: usize,
    slots: Arc<Semaphore>,
}

/// One admitted slot. Dropping the permit frees the slot, whatever path the
/// holder exits through.
#[derive(Debug)]
pub struct GatePermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGate {
    pub fn new(width: usize) -> Result<Self> {
        if width == 0 {
            return Err(HarvestError::config("concurrency width must be greater than zero"));
        }
        if width > Semaphore::MAX_PERMITS {
            return Err(HarvestError::config(format!(
                "concurrency width {width} exceeds {}",
                Semaphore::MAX_PERMITS
            )));
        }
        Ok(Self {
            width,
            slots: Arc::new(Semaphore::new(width)),
        })
    }

    /// Maximum number of concurrent permits.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Permits currently held.
    pub fn in_flight(&self) -> usize {
        self.width - self.slots.available_permits()
    }

    /// Wait for a free slot. No fairness or ordering is promised.
    pub async fn acquire(&self) -> Result<GatePermit> {
        let permit = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| HarvestError::validation("concurrency gate is closed"))?;
        Ok(GatePermit { _permit: permit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn zero_width_rejected() {
        assert!(matches!(
            ConcurrencyGate::new(0),
            Err(HarvestError::Config { .. })
        ));
    }

    #[tokio::test]
    async fn permits_are_bounded_and_released_on_drop() {
        let gate = ConcurrencyGate::new(2).unwrap();
        let a = gate.acquire().await.unwrap();
        let _b = gate.acquire().await.unwrap();
        assert_eq!(gate.in_flight(), 2);

        let third = tokio::time::timeout(Duration::from_millis(30), gate.acquire()).await;
        assert!(third.is_err(), "third permit admitted past width 2");

        drop(a);
        assert_eq!(gate.in_flight(), 1);
        let _c = tokio::time::timeout(Duration::from_millis(100), gate.acquire())
            .await
            .expect("slot freed by drop")
            .unwrap();
        assert_eq!(gate.in_flight(), 2);
    }

    #[tokio::test]
    async fn permit_released_when_holder_panics() {
        let gate = ConcurrencyGate::new(1).unwrap();
        let permit = gate.acquire().await.unwrap();

        let handle = tokio::spawn(async move {
            let _held = permit;
            panic!("pipeline bug");
        });
        assert!(handle.await.unwrap_err().is_panic());

        assert_eq!(gate.in_flight(), 0);
    }
}
