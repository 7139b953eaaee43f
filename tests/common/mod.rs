//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use tempfile::TempDir;
use tokio::task::JoinHandle;
use token_lease::{
    client::{LeaseClient, RandomSource},
    config::{ClientConfig, ServerConfig, TransportConfig},
    error::Result,
    transport::MemoryTransport,
    util::clock::ManualClock,
    LeaseServer, ServerStats,
};

pub const TTL: i64 = 10;

/// A server running in the background on an in-process transport.
pub struct Harness {
    pub dir: TempDir,
    pub transport: Arc<MemoryTransport>,
    pub clock: Arc<ManualClock>,
    pub server: JoinHandle<Result<ServerStats>>,
}

impl Harness {
    pub async fn start(workers: usize) -> Self {
        let dir = TempDir::new().expect("tempdir");
        let transport = Arc::new(MemoryTransport::new(TransportConfig::default()));
        let clock = Arc::new(ManualClock::new(0));
        let config = ServerConfig::default()
            .with_store_path(dir.path().join("db"))
            .with_workers(workers)
            .with_lease_ttl(TTL);

        let server = LeaseServer::open(config, transport.clone(), clock.clone())
            .await
            .expect("open server");
        Self {
            dir,
            transport,
            clock,
            server: tokio::spawn(server.run()),
        }
    }

    pub async fn client(&self, requester: u32, reply_port: u8) -> LeaseClient {
        LeaseClient::connect(
            self.transport.clone(),
            self.clock.clone(),
            client_config(),
            requester,
            reply_port,
        )
        .await
        .expect("connect client")
    }
}

pub fn client_config() -> ClientConfig {
    ClientConfig {
        runs: 5,
        wait_min: Duration::from_millis(0),
        wait_max: Duration::from_millis(0),
        connect_attempts: 3,
        connect_delay: Duration::from_millis(5),
        reply_timeout: Some(Duration::from_secs(5)),
        ..ClientConfig::default()
    }
}

/// Cycles through a fixed list of tokens without pausing.
pub struct ScriptedRandom {
    tokens: Vec<u16>,
    next: usize,
}

impl ScriptedRandom {
    pub fn new(tokens: Vec<u16>) -> Self {
        Self { tokens, next: 0 }
    }
}

impl RandomSource for ScriptedRandom {
    fn token(&mut self, max_token: u16) -> u16 {
        let token = self.tokens[self.next % self.tokens.len()];
        self.next += 1;
        token.min(max_token)
    }

    fn pause(&mut self, min: Duration, _max: Duration) -> Duration {
        min
    }
}
