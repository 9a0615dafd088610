//! Demo procedures for the in-memory store.

use std::time::Duration;

use async_trait::async_trait;
use spool_core::domain::Argument;
use spool_core::impls::{CallContext, Procedure, ProcedureError, ProcedureRegistry};
use tracing::info;

/// `sleep_ms(n)`: waits `n` milliseconds.
struct SleepMs;

#[async_trait]
impl Procedure for SleepMs {
    async fn call(&self, _ctx: &mut CallContext, args: &[Argument]) -> Result<(), ProcedureError> {
        let millis: u64 = match args.first() {
            Some(arg) => arg
                .as_str()
                .parse()
                .map_err(|e| format!("sleep_ms expects milliseconds: {e}"))?,
            None => 0,
        };
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(())
    }
}

/// `notify(channel, payload)`: raises a notification delivered after commit.
struct Notify;

#[async_trait]
impl Procedure for Notify {
    async fn call(&self, ctx: &mut CallContext, args: &[Argument]) -> Result<(), ProcedureError> {
        let channel = args
            .first()
            .ok_or_else(|| ProcedureError::from("notify expects a channel"))?;
        let payload = args.get(1).map(Argument::as_str).unwrap_or_default();
        ctx.notify(channel.as_str(), payload);
        Ok(())
    }
}

pub fn demo() -> ProcedureRegistry {
    let mut registry = ProcedureRegistry::new();

    registry.register_fn("log_message", |args| {
        let text: Vec<&str> = args.iter().map(Argument::as_str).collect();
        info!(target: "spool::demo", "{}", text.join(" "));
        Ok(())
    });
    registry.register("sleep_ms", SleepMs);
    registry.register("notify", Notify);
    registry.register_fn("fail", |args| {
        let message = args
            .first()
            .map(Argument::as_str)
            .unwrap_or("job asked to fail");
        Err(message.into())
    });

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_every_demo_procedure() {
        assert_eq!(
            demo().names(),
            vec!["fail", "log_message", "notify", "sleep_ms"]
        );
    }
}
