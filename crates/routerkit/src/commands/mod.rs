//! Command dispatch: bridges CLI args -> services -> output formatting.

pub mod discover;
pub mod monitor;
pub mod ports;
pub mod routers;
pub mod util;

use crate::app::App;
use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Dispatch a command that needs the loaded config and store.
pub async fn dispatch(cmd: Command, app: &App, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Start(args) => monitor::start(app, args, global).await,
        Command::Status => monitor::status(app, global).await,
        Command::SyncAll => monitor::sync_all(app, global).await,
        Command::Health => monitor::health(app, global).await,
        Command::Sync(args) => routers::sync(app, &args.router, global).await,
        Command::Test(args) => routers::test(app, &args.router, global).await,
        Command::Devices(args) => routers::devices(app, args, global).await,
        Command::Wifi(args) => routers::wifi(app, args, global).await,
        Command::Reboot(args) => routers::reboot(app, &args.router, global).await,
        Command::Ports(args) => ports::handle(app, args.command, global).await,
        // Handled before the config is loaded
        Command::Stop | Command::Discover(_) | Command::Completions(_) => Ok(()),
    }
}
