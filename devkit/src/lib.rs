/*!
# Purevent DevKit - test doubles for the gateway daemon

- `MockGateway`: scripted serial gateway behind the daemon's `Connector` seam
- `TelegramBuilder`: ESP3-framed radio telegrams as they come off the wire
- `TestHarness`: a complete daemon on a temp data dir, optionally served over HTTP
*/

pub mod mock_gateway;
pub mod telegram_builder;
pub mod test_utils;

pub use mock_gateway::{Ending, MockGateway};
pub use telegram_builder::TelegramBuilder;
pub use test_utils::{InstantSleeper, TestHarness};
