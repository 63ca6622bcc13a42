//! CLI command implementations.

pub mod customer;
pub mod nodes;
pub mod order;
pub mod product;

use anyhow::{Context, Result};
use chash_dispatcher::connect_to_dispatcher;
use chash_proto::DispatcherServiceClient;
use std::future::Future;

/// Run one command against the dispatcher at `addr`.
pub fn with_dispatcher<F, Fut>(addr: &str, command: F) -> Result<()>
where
    F: FnOnce(DispatcherServiceClient) -> Fut,
    Fut: Future<Output = Result<()>>,
{
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let client = connect_to_dispatcher(addr)
            .await
            .with_context(|| format!("Cannot reach dispatcher at {}", addr))?;
        command(client).await
    })
}

/// Format unix milliseconds for display.
pub fn format_millis(millis: Option<u64>) -> String {
    match millis {
        Some(ms) => format!("{}.{:03}s", ms / 1000, ms % 1000),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(Some(1_700_000_000_123)), "1700000000.123s");
        assert_eq!(format_millis(Some(5)), "0.005s");
        assert_eq!(format_millis(None), "-");
    }
}
