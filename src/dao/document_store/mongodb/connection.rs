use std::time::Duration;

use mongodb::{Client, Database, bson::doc, options::ClientOptions};
use tokio::time::sleep;
use tracing::{info, warn};

use super::error::{MongoDaoError, MongoResult};

const PING_ATTEMPTS: u32 = 10;
const FIRST_BACKOFF: Duration = Duration::from_millis(250);
const MAX_BACKOFF: Duration = Duration::from_secs(5);

/// Build a client for `database_name` and wait until the deployment answers a ping.
///
/// Gives up after [`PING_ATTEMPTS`] pings, doubling the pause between them.
pub async fn establish_connection(
    options: &ClientOptions,
    database_name: &str,
) -> MongoResult<(Client, Database)> {
    let client = Client::with_options(options.clone())
        .map_err(|source| MongoDaoError::ClientConstruction { source })?;
    let database = client.database(database_name);

    let mut backoff = FIRST_BACKOFF;
    for attempt in 1..PING_ATTEMPTS {
        match ping(&database).await {
            Ok(()) => {
                if attempt > 1 {
                    info!(attempt, database = database_name, "MongoDB answered");
                }
                return Ok((client, database));
            }
            Err(err) => {
                warn!(
                    attempt,
                    wait_ms = backoff.as_millis(),
                    error = %err,
                    "MongoDB not reachable yet"
                );
                sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    ping(&database)
        .await
        .map_err(|source| MongoDaoError::InitialPing {
            attempts: PING_ATTEMPTS,
            source,
        })?;
    Ok((client, database))
}

async fn ping(database: &Database) -> Result<(), mongodb::error::Error> {
    database.run_command(doc! { "ping": 1 }).await.map(|_| ())
}
