//-
// Copyright (c) 2020, the ocmigrate authors
//
// This file is part of ocmigrate.
//
// Ocmigrate is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Ocmigrate is distributed in the hope that it will be useful, but WITHOUT ANY
// WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// ocmigrate. If not, see <http://www.gnu.org/licenses/>.

//! The broker side of the control protocol.
//!
//! One exclusive, auto-delete queue, consumed without acknowledgements: a
//! crashed daemon drops in-flight commands instead of replaying them
//! against rebuilt state. Responses go straight to the request's
//! `reply-to` queue, tagged with its correlation id. Transport failures
//! are fatal; process supervision restarts the daemon.

use amiquip::{
    AmqpProperties, Connection, ConsumerMessage, ConsumerOptions, Publish,
    QueueDeclareOptions,
};
use log::{debug, error, info, warn};

use crate::control::dispatcher::Dispatcher;
use crate::control::state::Status;
use crate::support::error::Error;
use crate::support::system_config::AmqpConfig;

pub fn run(
    config: &AmqpConfig,
    status: &Status,
    dispatcher: &Dispatcher,
) -> Result<(), Error> {
    info!("Connecting to broker at {}", config.url);
    let mut connection = Connection::insecure_open(&config.url)?;
    let channel = connection.open_channel(None)?;
    let queue = channel.queue_declare(
        &*config.control_queue,
        QueueDeclareOptions {
            exclusive: true,
            auto_delete: true,
            ..QueueDeclareOptions::default()
        },
    )?;
    let consumer = queue.consume(ConsumerOptions {
        no_ack: true,
        ..ConsumerOptions::default()
    })?;
    info!("Consuming control messages from {}", config.control_queue);

    for message in consumer.receiver().iter() {
        match message {
            ConsumerMessage::Delivery(delivery) => {
                debug!("Received {} byte control message", delivery.body.len());
                let response = dispatcher.handle(&delivery.body);

                if let Some(reply_to) = delivery.properties.reply_to() {
                    let mut properties = AmqpProperties::default()
                        .with_content_type("text/plain".to_owned())
                        .with_delivery_mode(2);
                    if let Some(correlation_id) =
                        delivery.properties.correlation_id()
                    {
                        properties = properties
                            .with_correlation_id(correlation_id.clone());
                    }
                    channel.basic_publish(
                        "",
                        Publish::with_properties(
                            &response,
                            reply_to.clone(),
                            properties,
                        ),
                    )?;
                } else {
                    warn!("Discarding response; request had no reply-to");
                }

                if !status.rpc_run() {
                    info!("Control loop shutting down");
                    break;
                }
            }
            other => {
                error!("Consumer stopped: {:?}", other);
                break;
            }
        }
    }

    connection.close()?;
    Ok(())
}
