use std::fmt::Debug;

use async_trait::async_trait;

use crate::kernel::error::Result;

/// Lifecycle trait shared by the long-lived kernel components.
///
/// The [`Application`](crate::kernel::Application) initializes and starts
/// components in registration order and stops them in reverse order.
#[async_trait]
pub trait KernelComponent: Send + Sync + Debug {
    fn name(&self) -> &'static str;
    async fn initialize(&self) -> Result<()>;
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
}
