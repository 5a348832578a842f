//! The set of endpoints that make up one bus.
//!
//! A registry is built once at startup and handed to every component that
//! needs to reach an endpoint. It owns one inbound endpoint at address 0 and
//! `outbound_count` outbound endpoints at addresses `1..=outbound_count`.

use crate::clock::SharedClock;
use crate::endpoint::{
    EndpointHandle, EndpointStats, QueueEndpoint, StorageBudget, INBOUND_ADDRESS,
};
use crate::error::{BusError, RouteError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Name of the inbound endpoint.
pub const INBOUND_NAME: &str = "bus_in_q";

/// Name of the outbound endpoint at `address` (`bus_out_q1`, `bus_out_q2`, ...).
pub fn outbound_name(address: u32) -> String {
    format!("bus_out_q{}", address)
}

/// Name-addressable collection of bus endpoints.
#[derive(Debug)]
pub struct BusRegistry {
    inbound: Arc<QueueEndpoint>,
    outbound: Vec<Arc<QueueEndpoint>>,
    budget: Arc<StorageBudget>,
    torn_down: AtomicBool,
}

impl BusRegistry {
    /// Allocate every endpoint with unbounded message storage.
    pub fn new(
        capacity: usize,
        outbound_count: usize,
        clock: SharedClock,
    ) -> Result<Self, BusError> {
        Self::with_storage_budget(capacity, outbound_count, clock, Arc::default())
    }

    /// Allocate every endpoint, all charging stored messages to `budget`.
    /// Any failure here is fatal for startup.
    pub fn with_storage_budget(
        capacity: usize,
        outbound_count: usize,
        clock: SharedClock,
        budget: Arc<StorageBudget>,
    ) -> Result<Self, BusError> {
        if outbound_count == 0 {
            return Err(BusError::InvalidConfig {
                message: "at least one outbound endpoint is required".to_string(),
            });
        }
        if outbound_count > u32::MAX as usize - 1 {
            return Err(BusError::InvalidConfig {
                message: format!("too many outbound endpoints: {}", outbound_count),
            });
        }

        let inbound = Arc::new(QueueEndpoint::with_budget(
            INBOUND_NAME,
            INBOUND_ADDRESS,
            capacity,
            Arc::clone(&clock),
            Arc::clone(&budget),
        )?);

        let outbound = (1..=outbound_count as u32)
            .map(|address| {
                QueueEndpoint::with_budget(
                    outbound_name(address),
                    address,
                    capacity,
                    Arc::clone(&clock),
                    Arc::clone(&budget),
                )
                .map(Arc::new)
            })
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Bus initialized: 1 inbound + {} outbound endpoint(s), capacity {}",
            outbound_count, capacity
        );

        Ok(Self {
            inbound,
            outbound,
            budget,
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn inbound(&self) -> &Arc<QueueEndpoint> {
        &self.inbound
    }

    /// Resolve a destination id to its outbound endpoint.
    pub fn outbound(&self, destination: u32) -> Result<&Arc<QueueEndpoint>, RouteError> {
        if destination == INBOUND_ADDRESS {
            return Err(RouteError::UnresolvedDestination { destination });
        }
        self.outbound
            .get(destination as usize - 1)
            .ok_or(RouteError::UnresolvedDestination { destination })
    }

    pub fn storage_budget(&self) -> &Arc<StorageBudget> {
        &self.budget
    }

    pub fn outbound_count(&self) -> usize {
        self.outbound.len()
    }

    /// Valid destination ids, in address order.
    pub fn destinations(&self) -> impl Iterator<Item = u32> + '_ {
        self.outbound.iter().map(|endpoint| endpoint.address())
    }

    /// All endpoints, inbound first.
    pub fn endpoints(&self) -> impl Iterator<Item = &Arc<QueueEndpoint>> {
        std::iter::once(&self.inbound).chain(self.outbound.iter())
    }

    pub fn find(&self, name: &str) -> Option<&Arc<QueueEndpoint>> {
        self.endpoints().find(|endpoint| endpoint.name() == name)
    }

    /// Open a session on the endpoint called `name`.
    pub fn open(&self, name: &str) -> Result<EndpointHandle, BusError> {
        self.find(name)
            .map(|endpoint| endpoint.open())
            .ok_or_else(|| BusError::UnknownEndpoint {
                name: name.to_string(),
            })
    }

    pub fn stats(&self) -> Vec<EndpointStats> {
        self.endpoints().map(|endpoint| endpoint.stats()).collect()
    }

    /// Drain and release every resident message on every endpoint.
    ///
    /// Returns the number of messages released. Only the first call does
    /// any work; later calls return 0.
    pub fn teardown(&self) -> usize {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return 0;
        }

        let released: usize = self.endpoints().map(|endpoint| endpoint.drain()).sum();
        info!("Bus torn down, {} resident message(s) released", released);
        released
    }
}

impl Drop for BusRegistry {
    fn drop(&mut self) {
        debug!("Dropping bus registry");
        self.teardown();
    }
}
