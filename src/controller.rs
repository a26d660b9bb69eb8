//! Mode-specific execution of a single attempt.
//!
//! The controller turns one attempt of the retry loop into one or two invocations of the unit of
//! work, depending on the [`Mode`]. Whatever happens inside, an attempt yields exactly one
//! outcome: fixup's absorbed first failure is never visible to the retry loop.

use crate::boundary::Boundary;
use crate::connector::Connector;
use crate::error::Failure;
use crate::mode::Mode;
use futures::future::BoxFuture;

/// Runs attempts against a connector under a fixed mode.
pub(crate) struct ModeController<'a, C> {
    connector: &'a mut C,
    mode: Mode,
    reconnected: bool,
}

impl<'a, C: Connector> ModeController<'a, C> {
    pub(crate) fn new(connector: &'a mut C, mode: Mode) -> Self {
        Self { connector, mode, reconnected: false }
    }

    /// Whether the last attempt reconnected for a second invocation. Clears the flag.
    pub(crate) fn take_reconnected(&mut self) -> bool {
        std::mem::take(&mut self.reconnected)
    }

    /// One attempt: at most one externally visible failure.
    pub(crate) async fn invoke<T, F>(
        &mut self,
        boundary: Boundary,
        operation: &mut F,
    ) -> Result<T, Failure<C::Error>>
    where
        F: for<'h> FnMut(&'h mut C::Handle) -> BoxFuture<'h, Result<T, C::Error>> + Send,
    {
        match self.mode {
            Mode::Unchecked => boundary.invoke(self.connector, operation).await,
            Mode::Checked => {
                if !self.connector.probe().await {
                    self.connector.acquire().await.map_err(Failure::Connect)?;
                }
                boundary.invoke(self.connector, operation).await
            }
            Mode::Fixup => match boundary.invoke(self.connector, operation).await {
                Ok(value) => Ok(value),
                Err(first) => {
                    if self.connector.probe().await {
                        return Err(first);
                    }
                    tracing::debug!(error = %first, "handle lost during attempt; reconnecting");
                    self.connector.acquire().await.map_err(Failure::Connect)?;
                    self.reconnected = true;
                    boundary.invoke(self.connector, operation).await
                }
            },
        }
    }
}
