// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hrv_remote::bluetooth::{BluezTransport, LinkEvent};
use hrv_remote::config::Config;
use hrv_remote::events::EventProcessor;
use hrv_remote::state::ViewState;
use hrv_remote::Controller;

const HELP: &str = "\
commands:
  connect [ADDRESS]   connect to ADDRESS or the configured device
  disconnect          drop the link
  start 20|40|60      start a timed override
  stop                stop the override and the local countdown
  read                read the timer value attribute
  notify on|off       toggle acknowledgement notifications
  attrs               list the bound peripheral's attributes
  status              show connection and countdown state
  quit                exit";

/// One line of user input.
enum Input<'a> {
    Connect(Option<&'a str>),
    Disconnect,
    Start(&'a str),
    Stop,
    Read,
    Notify(&'a str),
    Attrs,
    Status,
    Help,
    Quit,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> Option<Input<'_>> {
    let mut words = line.split_whitespace();
    let command = words.next()?;
    let arg = words.next();
    Some(match (command, arg) {
        ("connect", arg) => Input::Connect(arg),
        ("disconnect", _) => Input::Disconnect,
        ("start", Some(minutes)) => Input::Start(minutes),
        ("stop", _) => Input::Stop,
        ("read", _) => Input::Read,
        ("notify", Some(flag)) => Input::Notify(flag),
        ("attrs", _) => Input::Attrs,
        ("status", _) => Input::Status,
        ("help", _) => Input::Help,
        ("quit" | "exit", _) => Input::Quit,
        _ => Input::Unknown(command),
    })
}

/// Run one user command. Returns `false` to exit.
fn run_input(
    input: Input<'_>,
    controller: &Controller,
    processor: &EventProcessor,
    config: &Config,
) -> bool {
    let result = match input {
        Input::Connect(address) => {
            match address.or(config.device.address.as_deref()) {
                Some(address) => {
                    processor.connecting();
                    controller.connect(address)
                }
                None => {
                    println!("no address given and none configured");
                    Ok(())
                }
            }
        }
        Input::Disconnect => {
            controller.disconnect();
            Ok(())
        }
        Input::Start(minutes) => match minutes.parse::<u8>() {
            Ok(minutes) => controller
                .start_countdown(minutes)
                .map(|()| processor.countdown_requested(minutes)),
            Err(_) => {
                println!("minutes must be 20, 40 or 60");
                Ok(())
            }
        },
        Input::Stop => {
            let result = controller.stop_countdown();
            processor.countdown_stopped();
            result
        }
        Input::Read => controller.read_timer_value(),
        Input::Notify(flag) => controller.set_ack_notifications(flag == "on"),
        Input::Attrs => {
            match controller.supported_attributes() {
                Some(table) => table.describe().iter().for_each(|l| println!("{}", l)),
                None => println!("no attributes bound"),
            }
            Ok(())
        }
        Input::Status => {
            println!("{}", processor.state().summary());
            Ok(())
        }
        Input::Help => {
            println!("{}", HELP);
            Ok(())
        }
        Input::Quit => return false,
        Input::Unknown(command) => {
            println!("unknown command '{}', try 'help'", command);
            Ok(())
        }
    };

    if let Err(e) = result {
        println!("error: {}", e);
    }
    true
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("hrv_remote={}", config.log_filter()).parse()?),
        )
        .init();

    info!("Starting HRV Remote v{}...", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded");

    let settings = config.to_settings()?;

    // Initialize BLE transport
    let (transport_tx, transport_rx) = tokio::sync::mpsc::unbounded_channel::<LinkEvent>();
    let transport = Arc::new(BluezTransport::new(transport_tx).await?);
    let (controller, mut event_rx) = Controller::start(transport, transport_rx, settings);

    let mut processor = EventProcessor::new(ViewState::new());

    if config.device.auto_connect {
        match config.address() {
            Ok(Some(address)) => {
                info!("Auto-connecting to {}", address);
                processor.connecting();
                if let Err(e) = controller.connect(address.as_str()) {
                    error!("Auto-connect failed: {}", e);
                    processor.state().set_disconnected();
                }
            }
            Ok(None) => warn!("auto_connect is set but no device address is configured"),
            Err(e) => error!("{}", e),
        }
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", HELP);
    info!("Ready.");

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                if let Some(notice) = processor.process_event(event) {
                    println!("{}", notice);
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if let Some(input) = parse_input(&line) {
                            if !run_input(input, &controller, &processor, &config) {
                                info!("Quit requested");
                                break;
                            }
                        }
                    }
                    None => {
                        info!("Input closed");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    controller.close();
    info!("HRV Remote stopped");
    Ok(())
}
