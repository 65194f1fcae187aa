//! Reintentos con backoff exponencial para las llamadas al proveedor LLM.

use std::{future::Future, time::Duration};

use anyhow::Result;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Reintentos tras el primer fallo.
    limit: usize,
    base_delay_ms: u64,
}

impl RetryPolicy {
    pub fn new(limit: usize, base_delay: Duration) -> Self {
        Self {
            limit,
            base_delay_ms: base_delay.as_millis().max(1) as u64,
        }
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(backoff.max(self.base_delay_ms))
    }

    /// Ejecuta `op` hasta que tenga éxito o se agoten los reintentos;
    /// en ese caso devuelve el último error.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0usize;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt > self.limit {
                        return Err(err.context(format!("{what}: agotados {} reintentos", self.limit)));
                    }
                    let backoff = self.delay_for_attempt(attempt);
                    warn!("{what} falló (intento {attempt}/{}): {err}. Reintentando en {backoff:?}", self.limit);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}
