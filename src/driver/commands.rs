use super::{DriverCommand, FleetDriver};
use std::ops::ControlFlow;

impl FleetDriver {
    pub(crate) async fn handle_command(&mut self, cmd: DriverCommand) -> ControlFlow<()> {
        match cmd {
            DriverCommand::AddDevice { device, reply } => {
                let _ = reply.send(self.add_device(device).await);
            }
            DriverCommand::UpdateSettings {
                serial,
                settings,
                reply,
            } => {
                let _ = reply.send(self.update_settings(&serial, settings).await);
            }
            DriverCommand::RemoveDevice { serial, reply } => {
                let _ = reply.send(self.remove_device(&serial).await);
            }
            DriverCommand::PollNow { reply } => {
                let _ = reply.send(self.poll_once().await);
            }
            DriverCommand::Shutdown => {
                self.logger.info("Shutdown requested");
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }
}
