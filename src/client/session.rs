use std::time::Duration;

use rand::{rngs::StdRng, Rng, SeedableRng};

use super::LeaseClient;
use crate::{error::Result, interface::ResponseKind};

/// Picks the token and pause for each request of a session.
pub trait RandomSource: Send {
    /// A token in `0..=max_token`.
    fn token(&mut self, max_token: u16) -> u16;

    /// A pause in `[min, max)`, or `min` when the range is empty.
    fn pause(&mut self, min: Duration, max: Duration) -> Duration;
}

/// Deterministic generator seeded per client.
pub struct SeededRandom(StdRng);

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }
}

impl RandomSource for SeededRandom {
    fn token(&mut self, max_token: u16) -> u16 {
        self.0.gen_range(0..=max_token)
    }

    fn pause(&mut self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            min
        } else {
            self.0.gen_range(min..max)
        }
    }
}

/// Outcome counts of a finished session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SessionReport {
    pub granted: usize,
    pub rejected: usize,
    pub unknown: usize,
}

impl SessionReport {
    pub fn total(&self) -> usize {
        self.granted + self.rejected + self.unknown
    }
}

/// Issues `runs` sequential requests for random tokens, then releases the
/// client's reply channel.
pub struct ClientSession<R = SeededRandom> {
    client: LeaseClient,
    random: R,
}

impl ClientSession<SeededRandom> {
    /// Seeds the generator from the requester id.
    pub fn new(client: LeaseClient) -> Self {
        let seed = u64::from(client.requester());
        Self::with_random(client, SeededRandom::new(seed))
    }
}

impl<R: RandomSource> ClientSession<R> {
    pub fn with_random(client: LeaseClient, random: R) -> Self {
        Self { client, random }
    }

    pub async fn run(mut self) -> Result<SessionReport> {
        let config = self.client.config().clone();
        let requester = self.client.requester();
        let mut report = SessionReport::default();

        for run in 0..config.runs {
            tracing::debug!(requester, run, "client run");
            let pause = self.random.pause(config.wait_min, config.wait_max);
            tokio::time::sleep(pause).await;

            let token = self.random.token(config.max_token);
            let response = self.client.request(token).await?;
            match response.kind {
                ResponseKind::Ack => {
                    report.granted += 1;
                    tracing::info!(requester, token, "received token");
                }
                ResponseKind::TokenNotAvailable => {
                    report.rejected += 1;
                    tracing::info!(requester, token, "token not available");
                }
                ResponseKind::Unknown => {
                    report.unknown += 1;
                    tracing::warn!(requester, token, "received unknown response");
                }
            }
        }

        self.client.release().await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_random_is_reproducible_and_in_range() {
        let mut a = SeededRandom::new(4242);
        let mut b = SeededRandom::new(4242);
        for _ in 0..100 {
            let token = a.token(20);
            assert_eq!(token, b.token(20));
            assert!(token <= 20);

            let pause = a.pause(Duration::from_secs(0), Duration::from_secs(3));
            assert_eq!(pause, b.pause(Duration::from_secs(0), Duration::from_secs(3)));
            assert!(pause < Duration::from_secs(3));
        }
    }

    #[test]
    fn empty_pause_range_yields_minimum() {
        let mut random = SeededRandom::new(1);
        let one = Duration::from_secs(1);
        assert_eq!(random.pause(one, one), one);
        assert_eq!(random.token(0), 0);
    }
}
