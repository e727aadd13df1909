// services/driver-tour/src/tour.rs
//
// Walks one session through sync, async, callback, batch and mapper usage
//

use anyhow::{anyhow, Result};
use cqlkit::{Batch, BatchType, DriverError, Mapper, ResponseFuture, Session, Statement};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::TourConfig;
use crate::models::{ExampleModel, TeamMember, TEAM_TABLE};

pub async fn run(session: &Session, config: &TourConfig) -> Result<()> {
    let release = session.health_check().await?;
    info!("Connected to cluster, release_version {}", release);

    let keyspace = config.keyspace();
    if config.tour.bootstrap_schema {
        create_keyspace(session, keyspace).await?;
    }
    session.set_keyspace(keyspace).await?;
    if config.tour.bootstrap_schema {
        session.execute(TeamMember::create_table_cql()).await?;
        info!("Schema ready in keyspace {}", keyspace);
    }

    select_members(session).await?;
    insert_member(session).await?;
    single_async_query(session).await?;
    concurrent_queries(session, config.tour.concurrent_queries).await?;
    callbacks(session).await?;
    batch(session).await?;
    object_mapper(session).await?;
    Ok(())
}

async fn create_keyspace(session: &Session, keyspace: &str) -> Result<()> {
    session
        .execute(format!(
            "CREATE KEYSPACE IF NOT EXISTS {} WITH replication = \
             {{'class': 'SimpleStrategy', 'replication_factor': 1}}",
            keyspace
        ))
        .await?;
    Ok(())
}

fn select_all() -> Statement {
    Statement::new(format!("SELECT * FROM \"{}\"", TEAM_TABLE)).idempotent(true)
}

async fn select_members(session: &Session) -> Result<()> {
    let rows = session.execute(select_all()).await?;
    for row in rows.iter() {
        let member = TeamMember::from_row(row)?;
        info!("{} {}", member.team_name, member.member_name);
    }
    Ok(())
}

async fn insert_member(session: &Session) -> Result<()> {
    let member = TeamMember::new("Bobs Team", "Kyiv", "Bob", "Bob");
    session
        .query(&TeamMember::insert_cql(), member.values())
        .await?;
    info!("Inserted {} into {}", member.member_name, member.team_name);
    Ok(())
}

async fn single_async_query(session: &Session) -> Result<()> {
    let future = session.execute_async(select_all());
    info!(" ... do some other work");

    // result() blocks its thread, so it runs off the runtime workers
    let outcome = tokio::task::spawn_blocking(move || future.result()).await?;
    match outcome {
        Ok(rows) => {
            if let Some(row) = rows.first() {
                let member = TeamMember::from_row(row)?;
                info!("{} {}", member.team_name, member.member_name);
            }
        }
        Err(e @ DriverError::TimeoutError(_)) => warn!("Query timed out: {}", e),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

async fn concurrent_queries(session: &Session, count: usize) -> Result<()> {
    let futures: Vec<ResponseFuture> = (0..count)
        .map(|_| session.execute_async(select_all()))
        .collect();

    for future in futures {
        let rows = future.await?;
        if let Some(row) = rows.first() {
            info!("{}", row.get_as::<String>("team_name")?);
        }
    }
    Ok(())
}

async fn callbacks(session: &Session) -> Result<()> {
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();
    let errback_tx = done_tx.clone();

    let future = session.execute_async(select_all());
    future.add_callbacks(
        move |rows| {
            match rows.first().map(|row| row.get_as::<String>("team_name")) {
                Some(Ok(team)) => info!("handle_success {}", team),
                Some(Err(e)) => warn!("Failed to process data: {}", e),
                None => warn!("handle_success called with no rows"),
            }
            let _ = done_tx.send(());
        },
        move |err| {
            warn!("Failed to fetch user info: {}", err);
            let _ = errback_tx.send(());
        },
    );

    done_rx
        .recv()
        .await
        .ok_or_else(|| anyhow!("callbacks dropped without running"))
}

async fn batch(session: &Session) -> Result<()> {
    let second = TeamMember::new("Bobs Team 2", "Kyiv", "Bob", "Bob");
    let third = TeamMember::new("Bobs Team 3", "Kyiv", "Bob", "Bob");

    let batch = Batch::new(BatchType::Logged)
        .with(Statement::new(TeamMember::insert_cql()).bind(second.values()))
        .with(
            Statement::new(TeamMember::insert_cql())
                .bind(third.values())
                .idempotent(true),
        );
    session.batch(&batch).await?;
    info!("Batch of {} inserts applied", batch.len());
    Ok(())
}

async fn object_mapper(session: &Session) -> Result<()> {
    let mapper = Mapper::<ExampleModel>::new(session);
    mapper.sync_table().await?;

    let mut created = Vec::new();
    for (example_type, description) in [
        (0, "example1"),
        (0, "example2"),
        (0, "example3"),
        (0, "example4"),
        (1, "example5"),
    ] {
        created.push(
            mapper
                .create(&ExampleModel::new(example_type, description))
                .await?,
        );
    }
    info!("{} example rows", mapper.objects().count().await?);

    let q = mapper.objects().filter("example_type", 1)?;
    info!("{} rows with example_type 1", q.count().await?);
    for instance in q.fetch().await? {
        info!("{}", instance?.description.unwrap_or_default());
    }

    let em5 = created
        .last()
        .ok_or_else(|| anyhow!("no example rows created"))?;
    // q is unchanged; q2 carries both restrictions
    let q2 = q.filter("example_id", em5.example_id)?;
    for instance in q2.all().await? {
        info!("{}", instance.description.unwrap_or_default());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TourSettings;
    use cqlkit::{Cluster, ClusterConfig, ObservabilityConfig};

    #[tokio::test]
    async fn test_tour_runs_against_memory_cluster() {
        let config = TourConfig {
            cluster: ClusterConfig {
                keyspace: Some("elko".to_string()),
                username: Some("elko".to_string()),
                password: Some("elkoelko".to_string()),
                ..ClusterConfig::default()
            },
            tour: TourSettings::default(),
            observability: ObservabilityConfig::default(),
        };
        let session = Cluster::from_config(&config.cluster)
            .unwrap()
            .connect(None)
            .await
            .unwrap();

        run(&session, &config).await.unwrap();

        let members = session.execute(select_all()).await.unwrap();
        assert_eq!(members.len(), 3);
        assert_eq!(session.in_flight(), 0);
        session.close().await;
    }
}
