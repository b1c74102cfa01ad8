use log::{debug, error, info, warn};
use tokio::sync::{broadcast, mpsc};

use crate::adapter::{NfcScanAdapter, ScanError};
use crate::messages::ScanCommand;
use crate::mqtt::MqttClient;
use crate::tag::{TAG_DETECTED_EVENT, TagDetected};

pub struct Manager {
    adapter: NfcScanAdapter,
    mqtt: Option<(MqttClient, rumqttc::EventLoop)>,
    scan_on_start: bool,
}

async fn handle_command(adapter: &NfcScanAdapter, command: ScanCommand) {
    match command {
        ScanCommand::Start => match adapter.start_scan().await {
            Ok(()) => {}
            Err(err @ (ScanError::UnsupportedDevice | ScanError::RadioDisabled)) => {
                warn!("Cannot start scan: {}", err);
            }
            Err(err) => error!("{}", err),
        },
        ScanCommand::Stop => adapter.stop_scan().await,
    }
}

impl Manager {
    pub fn new(
        adapter: NfcScanAdapter,
        mqtt: Option<(MqttClient, rumqttc::EventLoop)>,
        scan_on_start: bool,
    ) -> Self {
        Manager {
            adapter,
            mqtt,
            scan_on_start,
        }
    }

    /// Runs until Ctrl-C, then stops scanning and disconnects.
    pub async fn run_loop(self) -> anyhow::Result<()> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TagDetected>();
        self.adapter.add_listener(TAG_DETECTED_EVENT, move |event| {
            // Receiver only goes away during shutdown.
            let _ = event_tx.send(event.clone());
        });

        let (command_tx, mut command_rx) = broadcast::channel(10);

        let mqtt_client = match self.mqtt {
            Some((client, mut eventloop)) => {
                client.subscribe().await?;
                let loop_client = client.clone();
                let tx = command_tx.clone();
                // Handle incoming MQTT messages (scan start/stop requests)
                tokio::task::spawn(async move {
                    loop_client.event_loop(&mut eventloop, tx).await;
                });
                Some(client)
            }
            None => None,
        };

        if self.scan_on_start {
            handle_command(&self.adapter, ScanCommand::Start).await;
        }

        let shutdown = tokio::signal::ctrl_c();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                received = command_rx.recv() => match received {
                    Ok(command) => {
                        info!("Received scan command {:?}", command);
                        handle_command(&self.adapter, command).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        debug!("Command receiver lagged by {}", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some(event) = event_rx.recv() => {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(err) => error!("Error encoding event: {:?}", err),
                    }
                    if let Some(client) = mqtt_client.as_ref() {
                        if let Err(err) = client.announce_tag(&event).await {
                            error!("Error announcing tag: {}", err);
                        }
                    }
                }
                result = &mut shutdown => {
                    if let Err(err) = result {
                        error!("Error waiting for Ctrl-C: {:?}", err);
                    }
                    info!("Shutting down");
                    break;
                }
            }
        }

        self.adapter.stop_scan().await;
        self.adapter.remove_all_listeners(TAG_DETECTED_EVENT);
        debug!(
            "Exiting manager event loop after {} UI task(s)",
            self.adapter.ui_tasks_submitted()
        );

        if let Some(client) = mqtt_client {
            client.disconnect().await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::radio::Radio;
    use crate::radio::simulated::SimulatedRadio;
    use crate::ui_thread::UiThread;

    #[tokio::test]
    async fn test_handle_command() {
        let radio = SimulatedRadio::new(true);
        let adapter = NfcScanAdapter::load(
            Some(Arc::new(radio.clone()) as Arc<dyn Radio>),
            UiThread::spawn().unwrap(),
        );

        handle_command(&adapter, ScanCommand::Start).await;
        assert!(adapter.is_scanning());
        assert!(radio.is_reader_mode());

        handle_command(&adapter, ScanCommand::Stop).await;
        assert!(!adapter.is_scanning());
        assert!(!radio.is_reader_mode());
    }

    #[tokio::test]
    async fn test_handle_start_without_radio() {
        let adapter = NfcScanAdapter::load(None, UiThread::spawn().unwrap());
        handle_command(&adapter, ScanCommand::Start).await;
        assert!(!adapter.is_scanning());
    }
}
