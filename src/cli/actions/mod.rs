//! What the binary does once arguments are parsed.

pub mod server;

use crate::cli::telemetry;

/// A fully validated unit of work produced by [`crate::cli::dispatch::handler`].
#[derive(Debug)]
pub enum Action {
    /// Serve the HTTP API with the configured stores, codec and mailer.
    Server(server::Args),
}

impl Action {
    /// Run the action, then flush pending spans whether it succeeded or not.
    ///
    /// # Errors
    /// Returns the action's own error; telemetry shutdown never fails the run.
    pub async fn execute(self) -> anyhow::Result<()> {
        let result = match self {
            Self::Server(args) => server::execute(args).await,
        };

        telemetry::shutdown_tracer();

        result
    }
}
