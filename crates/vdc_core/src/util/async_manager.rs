// vdcd-rs Source Code File - Virtual Device Controller for digitalSTROM.
//
// Licensed under the BSD 3-Clause license. See LICENSE file in the project root
// for full license information.

//! Thin wrappers around the tokio runtime, so crates spawn/sleep through
//! one chokepoint instead of binding to the runtime directly.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
  F: Future + Send + 'static,
  F::Output: Send + 'static,
{
  tokio::spawn(future)
}

pub async fn sleep(duration: Duration) {
  tokio::time::sleep(duration).await;
}
