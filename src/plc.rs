//! Modbus TCP client for the breaker PLC.
//!
//! One coil carries the breaker command; the reported position comes from a
//! discrete input when the controller wires one, otherwise from reading the
//! command coil back (OpenPLC-style runtimes mirror %QX outputs as coils).
//! Every call carries a hard timeout and every failure is a typed result —
//! the cycle engine and the mode arbiter decide what to do with them, the
//! client itself only allows one immediate reconnect attempt.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::*;
use tracing::{debug, warn};

use crate::config::PlcConfig;

#[derive(Debug, Error)]
pub enum PlcError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {0}")]
    Protocol(#[source] std::io::Error),
    #[error("no active session")]
    NotConnected,
}

/// Session health, written only by the owning client, read by everyone else
/// through a shared view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PlcSessionStatus {
    pub connected: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub connection_attempts: u64,
}

pub struct PlcClient {
    cfg: PlcConfig,
    ctx: Option<tokio_modbus::client::Context>,
    status: Arc<RwLock<PlcSessionStatus>>,
}

impl PlcClient {
    pub fn new(cfg: PlcConfig) -> Self {
        Self {
            cfg,
            ctx: None,
            status: Arc::new(RwLock::new(PlcSessionStatus::default())),
        }
    }

    /// Shared read-only view of the session status.
    pub fn status_handle(&self) -> Arc<RwLock<PlcSessionStatus>> {
        self.status.clone()
    }

    /// Read the reported breaker position (true = closed).
    pub async fn read_breaker(&mut self) -> Result<bool, PlcError> {
        match self.read_once().await {
            Ok(closed) => {
                self.mark_success();
                Ok(closed)
            }
            Err(first) => {
                debug!(error = %first, "breaker read failed, reconnecting once");
                self.drop_session();
                match self.read_once().await {
                    Ok(closed) => {
                        self.mark_success();
                        Ok(closed)
                    }
                    Err(second) => {
                        self.mark_failure();
                        Err(second)
                    }
                }
            }
        }
    }

    /// Write the breaker command coil (true = close).
    pub async fn write_breaker(&mut self, closed: bool) -> Result<(), PlcError> {
        match self.write_once(closed).await {
            Ok(()) => {
                self.mark_success();
                Ok(())
            }
            Err(first) => {
                debug!(error = %first, "breaker write failed, reconnecting once");
                self.drop_session();
                match self.write_once(closed).await {
                    Ok(()) => {
                        self.mark_success();
                        Ok(())
                    }
                    Err(second) => {
                        self.mark_failure();
                        Err(second)
                    }
                }
            }
        }
    }

    /// Tear the session down. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.drop_session();
        debug!("plc session closed");
    }

    async fn read_once(&mut self) -> Result<bool, PlcError> {
        self.ensure_session().await?;
        let request_timeout = self.cfg.request_timeout();
        let input = self.cfg.breaker_input;
        let coil = self.cfg.breaker_coil;
        let ctx = self.ctx.as_mut().ok_or(PlcError::NotConnected)?;

        let result = match input {
            Some(addr) => timeout(request_timeout, ctx.read_discrete_inputs(addr, 1)).await,
            None => timeout(request_timeout, ctx.read_coils(coil, 1)).await,
        };
        match result {
            Err(_) => {
                // A timed-out transaction leaves the stream desynchronized.
                self.drop_session();
                Err(PlcError::Timeout(request_timeout))
            }
            Ok(Err(e)) => {
                self.drop_session();
                Err(PlcError::Protocol(e))
            }
            Ok(Ok(bits)) => bits.first().copied().ok_or_else(|| {
                PlcError::Protocol(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "empty coil response",
                ))
            }),
        }
    }

    async fn write_once(&mut self, closed: bool) -> Result<(), PlcError> {
        self.ensure_session().await?;
        let request_timeout = self.cfg.request_timeout();
        let coil = self.cfg.breaker_coil;
        let ctx = self.ctx.as_mut().ok_or(PlcError::NotConnected)?;

        match timeout(request_timeout, ctx.write_single_coil(coil, closed)).await {
            Err(_) => {
                self.drop_session();
                Err(PlcError::Timeout(request_timeout))
            }
            Ok(Err(e)) => {
                self.drop_session();
                Err(PlcError::Protocol(e))
            }
            Ok(Ok(())) => Ok(()),
        }
    }

    async fn ensure_session(&mut self) -> Result<(), PlcError> {
        if self.ctx.is_some() {
            return Ok(());
        }
        let addr = self.cfg.addr().map_err(|e| PlcError::Connect {
            addr: format!("{}:{}", self.cfg.host, self.cfg.port),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()),
        })?;
        self.status.write().connection_attempts += 1;
        debug!(%addr, unit_id = self.cfg.unit_id, "connecting to plc");

        let connected = timeout(self.cfg.connect_timeout(), tcp::connect(addr)).await;
        let mut ctx = match connected {
            Err(_) => {
                return Err(PlcError::Timeout(self.cfg.connect_timeout()));
            }
            Ok(Err(e)) => {
                return Err(PlcError::Connect {
                    addr: addr.to_string(),
                    source: e,
                });
            }
            Ok(Ok(ctx)) => ctx,
        };
        ctx.set_slave(Slave(self.cfg.unit_id));
        self.ctx = Some(ctx);
        self.status.write().connected = true;
        Ok(())
    }

    fn drop_session(&mut self) {
        if self.ctx.take().is_some() {
            warn!("dropping plc session");
        }
        self.status.write().connected = false;
    }

    fn mark_success(&mut self) {
        let mut status = self.status.write();
        status.connected = true;
        status.last_success_at = Some(Utc::now());
        status.consecutive_successes = status.consecutive_successes.saturating_add(1);
        status.consecutive_failures = 0;
    }

    fn mark_failure(&mut self) {
        let mut status = self.status.write();
        status.connected = self.ctx.is_some();
        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        status.consecutive_successes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_cfg() -> PlcConfig {
        // Port 1 on localhost refuses immediately on any sane test host.
        serde_json::from_value(serde_json::json!({
            "host": "127.0.0.1",
            "port": 1,
            "connect_timeout_ms": 200,
            "request_timeout_ms": 200,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn read_against_dead_endpoint_is_a_typed_error() {
        let mut client = PlcClient::new(unreachable_cfg());
        let err = client.read_breaker().await.unwrap_err();
        assert!(matches!(err, PlcError::Connect { .. } | PlcError::Timeout(_)));

        let status = client.status_handle().read().clone();
        assert!(!status.connected);
        assert_eq!(status.consecutive_failures, 1);
        // Initial attempt plus the single immediate reconnect.
        assert_eq!(status.connection_attempts, 2);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let mut client = PlcClient::new(unreachable_cfg());
        client.close();
        client.close();
        assert!(!client.status_handle().read().connected);
    }
}
