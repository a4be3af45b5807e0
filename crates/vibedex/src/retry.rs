use std::time::Duration;

/// Bounded retry policy for RPC endpoint rotation.
///
/// One round tries every endpoint once, in order; between rounds we sleep
/// with exponential backoff plus a little jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub rounds: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_max_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            // Bounded so interactive commands stay responsive.
            rounds: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(4),
            jitter_max_ms: 250,
        }
    }
}

impl RetryPolicy {
    fn delay_for_round(&self, round: usize) -> Duration {
        let shift = u32::try_from(round.min(16)).unwrap_or(16_u32);
        let pow2 = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
        let base_ms = u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        let ms = base_ms.saturating_mul(pow2).min(max_ms);
        let jitter = if cfg!(test) || self.jitter_max_ms == 0 {
            0
        } else {
            // Avoid holding a non-Send RNG across await points.
            rand::random::<u64>() % self.jitter_max_ms.saturating_add(1)
        };
        Duration::from_millis(ms.saturating_add(jitter))
    }
}

/// Run `op` against each endpoint in order until one succeeds, retrying the
/// whole rotation up to `policy.rounds` times. The last error wins.
pub async fn rotate_endpoints<T, Fut>(
    endpoints: &[String],
    policy: &RetryPolicy,
    label: &'static str,
    mut op: impl FnMut(&str) -> Fut + Send,
) -> eyre::Result<T>
where
    Fut: std::future::Future<Output = eyre::Result<T>> + Send,
{
    if endpoints.is_empty() {
        eyre::bail!("no endpoints configured");
    }
    if policy.rounds == 0 {
        eyre::bail!("invalid retry policy: rounds=0");
    }

    let mut last_err: Option<eyre::Report> = None;
    for round in 0..policy.rounds {
        for url in endpoints {
            match op(url).await {
                Ok(v) => return Ok(v),
                Err(e) => last_err = Some(e),
            }
        }
        if round + 1 < policy.rounds {
            tokio::time::sleep(policy.delay_for_round(round)).await;
        }
    }

    Err(last_err
        .unwrap_or_else(|| eyre::eyre!("unknown error"))
        .wrap_err(label))
}
