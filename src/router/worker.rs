use super::command::{Command, CommandPayload};
use super::command_router::CommandRouter;
use crate::mqtt::message_manager::Publisher;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Work items for the command worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// The broker accepted a (re)connection.
    BrokerConnected,
    Command {
        command: Command,
        payload: CommandPayload,
    },
}

/// Runs the router until cancelled or until the inbound channel closes.
///
/// The router is owned by this task alone, so at most one command is in
/// flight against the instrument. Periodic readings share the same task
/// and the timer is only polled while continuous measurement is on.
pub async fn run_worker<P: Publisher>(
    mut router: CommandRouter<P>,
    mut inbound: mpsc::Receiver<Inbound>,
    measurement_interval: Duration,
    shutdown: CancellationToken,
) {
    info!(
        "Command worker started, measurement interval {:?}",
        measurement_interval
    );
    let mut ticker = tokio::time::interval(measurement_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                router.stop();
                break;
            }
            message = inbound.recv() => match message {
                Some(Inbound::BrokerConnected) => router.announce().await,
                Some(Inbound::Command { command, payload }) => router.handle(command, payload).await,
                None => {
                    debug!("Inbound channel closed");
                    break;
                }
            },
            _ = ticker.tick(), if router.measuring() => router.measure_tick().await,
        }
    }

    info!("Command worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceAdapter, SimulatedConnector};
    use crate::mqtt::message_manager::RecordingPublisher;
    use crate::mqtt::topics::Topics;
    use std::sync::Arc;

    fn spawn_worker(
        interval: Duration,
    ) -> (
        RecordingPublisher,
        mpsc::Sender<Inbound>,
        CancellationToken,
        tokio::task::JoinHandle<()>,
    ) {
        let publisher = RecordingPublisher::default();
        let router = CommandRouter::new(
            DeviceAdapter::new(Arc::new(SimulatedConnector::default())),
            publisher.clone(),
            Topics::new("lab", "em"),
        );
        let (tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_worker(router, rx, interval, shutdown.clone()));
        (publisher, tx, shutdown, handle)
    }

    #[tokio::test]
    async fn processes_commands_in_order_until_closed() {
        let (publisher, tx, _shutdown, handle) = spawn_worker(Duration::from_secs(3600));

        tx.send(Inbound::BrokerConnected).await.unwrap();
        for volts in ["1", "2", "3"] {
            tx.send(Inbound::Command {
                command: Command::SourceVoltage,
                payload: CommandPayload::decode(format!(r#"{{"value": {volts}}}"#).as_bytes()),
            })
            .await
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        let readbacks: Vec<String> = publisher
            .on_topic("lab/response/em/source_voltage")
            .into_iter()
            .map(|m| m.payload)
            .collect();
        assert_eq!(readbacks.len(), 3);
        assert!(readbacks[2].contains("\"value\":3.0"));
        assert_eq!(publisher.on_topic("lab/connected/em")[0].payload, "1");
    }

    #[tokio::test(start_paused = true)]
    async fn measures_periodically_when_enabled() {
        let (publisher, tx, shutdown, handle) = spawn_worker(Duration::from_secs(1));

        tx.send(Inbound::Command {
            command: Command::MeasureContinuously,
            payload: CommandPayload::decode(br#"{"value": true}"#),
        })
        .await
        .unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        shutdown.cancel();
        handle.await.unwrap();

        let readings = publisher.on_topic("lab/response/em/current");
        assert!(readings.len() >= 3, "got {} readings", readings.len());
    }
}
