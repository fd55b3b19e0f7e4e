use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use futures::StreamExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::Message;
use shared::db::DbPool;
use shared::{Command, CommandReply, CommandType, ReleaseStockData, ReserveStockData};
use tracing::{error, info, warn};

use crate::models::ProcessedCommand;
use crate::schema::processed_commands;
use crate::service::InventoryService;

const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Serves `ReserveStock`/`ReleaseStock` commands arriving over Kafka.
///
/// Each command is applied at most once per idempotency key; a redelivered
/// command gets the reply that was produced the first time.
pub struct CommandHandler {
    service: Arc<InventoryService>,
    pool: DbPool,
    producer: FutureProducer,
    reply_topic: String,
}

fn decode(message: &BorrowedMessage<'_>) -> Result<Command> {
    let payload = message
        .payload_view::<str>()
        .ok_or_else(|| anyhow!("empty message at offset {}", message.offset()))?
        .context("payload is not UTF-8")?;
    serde_json::from_str(payload).context("payload is not a command")
}

impl CommandHandler {
    pub fn new(service: Arc<InventoryService>, pool: DbPool, producer: FutureProducer, reply_topic: String) -> Self {
        Self { service, pool, producer, reply_topic }
    }

    pub async fn run(&self, consumer: StreamConsumer) {
        let mut messages = consumer.stream();

        while let Some(next) = messages.next().await {
            let message = match next {
                Ok(message) => message,
                Err(e) => {
                    error!("Kafka receive failed: {}", e);
                    continue;
                }
            };

            match decode(&message) {
                Ok(command) => {
                    if let Err(e) = self.process(command).await {
                        error!("Command processing failed: {:#}", e);
                    }
                }
                Err(e) => warn!("Skipping undecodable message: {:#}", e),
            }

            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                error!("Offset commit failed: {}", e);
            }
        }
    }

    async fn process(&self, command: Command) -> Result<()> {
        let mut conn = self.pool.get().await?;

        if let Some(reply) = previous_reply(&mut conn, &command.idempotency_key).await? {
            info!("Replaying reply for already processed command {}", command.id);
            return self.publish(&reply).await;
        }

        let reply = self.apply(&command).await?;
        remember_reply(&mut conn, &command, &reply).await?;
        self.publish(&reply).await
    }

    async fn apply(&self, command: &Command) -> Result<CommandReply> {
        match command.command_type {
            CommandType::ReserveStock => {
                let data: ReserveStockData = serde_json::from_value(command.payload.clone())?;
                let result = self.service.reserve_stock(data).await;
                Ok(CommandReply::reservation(command, &result)?)
            }
            CommandType::ReleaseStock => {
                let data: ReleaseStockData = serde_json::from_value(command.payload.clone())?;
                let outcome = self.service.release_stock(data.reservation_id).await;
                if let Err(e) = &outcome {
                    error!("Failed to release stock for {}: {}", data.reservation_id, e);
                }
                Ok(CommandReply::release(command, outcome.as_ref().copied()))
            }
        }
    }

    async fn publish(&self, reply: &CommandReply) -> Result<()> {
        let body = serde_json::to_string(reply)?;
        let key = reply.correlation_id.to_string();
        let record = FutureRecord::to(&self.reply_topic).key(&key).payload(&body);

        self.producer
            .send(record, REPLY_TIMEOUT)
            .await
            .map_err(|(e, _)| anyhow!("reply to {} not delivered: {}", self.reply_topic, e))?;
        Ok(())
    }
}

async fn previous_reply(conn: &mut AsyncPgConnection, idempotency_key: &str) -> Result<Option<CommandReply>> {
    let stored = processed_commands::table
        .find(idempotency_key)
        .select(processed_commands::result)
        .first::<Option<serde_json::Value>>(conn)
        .await
        .optional()?
        .flatten();

    Ok(stored.map(serde_json::from_value).transpose()?)
}

async fn remember_reply(conn: &mut AsyncPgConnection, command: &Command, reply: &CommandReply) -> Result<()> {
    let row = ProcessedCommand {
        idempotency_key: command.idempotency_key.clone(),
        command_id: command.id,
        result: Some(serde_json::to_value(reply)?),
        processed_at: Some(reply.created_at),
    };

    diesel::insert_into(processed_commands::table)
        .values(&row)
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    Ok(())
}
