//! Synthetic workload for the `simulate` subcommand
//!
//! Drives every call shape through a client and a server instrumentor with a
//! random mix of successes, classified failures and cancellations, so the
//! resulting exposition shows every metric family populated.

use crate::config::Config;
use crate::error::InstrumentResult;
use crate::instrumentor::{Instrumentor, Role};
use crate::registry::MetricRegistry;
use crate::status::StatusCode;
use futures::future::join_all;
use futures::stream::{self, Stream, StreamExt};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

pub const UNARY_SYNC: &str = "/demo.Greeter/SayHello";
pub const UNARY_ASYNC: &str = "/demo.Greeter/SayHelloAsync";
pub const CLIENT_STREAMING: &str = "/demo.Upload/Collect";
pub const SERVER_STREAMING: &str = "/demo.Feed/Subscribe";
pub const DUPLEX: &str = "/demo.Chat/Talk";

/// Every identifier the simulation calls
pub const IDENTIFIERS: [&str; 5] = [
    UNARY_SYNC,
    UNARY_ASYNC,
    CLIENT_STREAMING,
    SERVER_STREAMING,
    DUPLEX,
];

const FAULTS: [StatusCode; 4] = [
    StatusCode::NotFound,
    StatusCode::InvalidArgument,
    StatusCode::Unavailable,
    StatusCode::DeadlineExceeded,
];

/// What one synthetic call does
#[derive(Debug, Clone, Copy)]
struct Plan {
    latency: Duration,
    fault: Option<StatusCode>,
    cancel: bool,
}

impl Plan {
    fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let latency = Duration::from_millis(rng.random_range(1..=20));
        let roll: u8 = rng.random_range(0..100);
        let fault = if (70..90).contains(&roll) {
            Some(FAULTS[rng.random_range(0..FAULTS.len())])
        } else {
            None
        };
        Self {
            latency,
            fault,
            cancel: roll >= 90,
        }
    }

    /// Time the call takes; cancelled calls outlive their deadline
    fn work(&self) -> Duration {
        if self.cancel {
            self.latency * 4
        } else {
            self.latency
        }
    }

    fn result(&self) -> Result<u32, StatusCode> {
        match self.fault {
            Some(code) => Err(code),
            None => Ok(1),
        }
    }

    /// Three items, the last replaced by the fault if there is one
    fn messages(&self) -> impl Stream<Item = Result<u32, StatusCode>> + use<> {
        let step = self.work() / 3;
        let last = match self.fault {
            Some(code) => Err(code),
            None => Ok(3),
        };
        stream::iter(vec![Ok(1), Ok(2), last]).then(move |item| async move {
            tokio::time::sleep(step).await;
            item
        })
    }
}

/// Instrumentors and registry after a simulation run
#[derive(Debug)]
pub struct Simulation {
    pub registry: MetricRegistry,
    pub server: Instrumentor,
    pub client: Instrumentor,
}

impl Simulation {
    /// Prometheus text exposition of every recorded metric
    pub fn exposition(&self) -> InstrumentResult<String> {
        Ok(self.registry.gather()?)
    }
}

/// Run `calls` synthetic calls per shape and role
///
/// # Errors
///
/// Fails only if the instrumentors cannot register their metric families.
pub async fn run(config: &Config, calls: u32) -> InstrumentResult<Simulation> {
    let registry = MetricRegistry::new();
    let server = Instrumentor::new(&registry, Role::Server, config.for_role(Role::Server))?;
    let client = Instrumentor::new(&registry, Role::Client, config.for_role(Role::Client))?;

    let plans: Vec<Plan> = {
        let mut rng = rand::rng();
        (0..calls).map(|_| Plan::random(&mut rng)).collect()
    };

    tracing::info!(calls = calls, "Starting simulation");
    tokio::join!(drive(&server, &plans), drive(&client, &plans));
    tracing::info!("Simulation complete");

    Ok(Simulation {
        registry,
        server,
        client,
    })
}

async fn drive(instrumentor: &Instrumentor, plans: &[Plan]) {
    for plan in plans {
        let _ = instrumentor.unary(UNARY_SYNC, || plan.result());
    }

    join_all(plans.iter().map(|plan| {
        cancellable(
            plan,
            instrumentor.unary_async(UNARY_ASYNC, async move {
                tokio::time::sleep(plan.work()).await;
                plan.result()
            }),
        )
    }))
    .await;

    join_all(plans.iter().map(|plan| {
        cancellable(
            plan,
            instrumentor.client_streaming(
                CLIENT_STREAMING,
                stream::iter(0..5u32),
                move |inbound| async move {
                    let sum = inbound.fold(0, |acc, n| async move { acc + n }).await;
                    tokio::time::sleep(plan.work()).await;
                    plan.result().map(|_| sum)
                },
            ),
        )
    }))
    .await;

    join_all(plans.iter().map(|plan| {
        cancellable(plan, async move {
            let outbound = instrumentor
                .server_streaming(SERVER_STREAMING, async move {
                    Ok::<_, StatusCode>(plan.messages())
                })
                .await?;
            outbound.for_each(|_| async {}).await;
            Ok::<(), StatusCode>(())
        })
    }))
    .await;

    join_all(plans.iter().map(|plan| {
        cancellable(plan, async move {
            let outbound = instrumentor
                .duplex(DUPLEX, plan.messages(), |inbound| async move {
                    Ok::<_, StatusCode>(inbound.map(|item| item.map(|n| n * 2)))
                })
                .await?;
            outbound.for_each(|_| async {}).await;
            Ok::<(), StatusCode>(())
        })
    }))
    .await;
}

/// Await `call`, abandoning it at its deadline if the plan says so
async fn cancellable<F: Future>(plan: &Plan, call: F) -> Option<F::Output> {
    if plan.cancel {
        tokio::time::timeout(plan.latency, call).await.ok()
    } else {
        Some(call.await)
    }
}
